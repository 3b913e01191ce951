use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::SecureStore;
use crate::errors::{AuthError, AuthenticatorResult};

/// Process-local store. Cloning the contents via [`MemoryStore::snapshot`]
/// lets tests simulate a restart against the same data.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: HashMap<String, String>) -> Self {
        Self {
            entries: RwLock::new(entries),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries.read().clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Make every subsequent `set`/`remove` fail, to exercise best-effort persistence.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> AuthenticatorResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AuthError::StorageError(
                "memory store is read-only".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn get(&self, key: &str) -> AuthenticatorResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> AuthenticatorResult<()> {
        self.check_writable()?;
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> AuthenticatorResult<()> {
        self.check_writable()?;
        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}
