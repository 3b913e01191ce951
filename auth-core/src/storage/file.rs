use std::path::{Path, PathBuf};

use async_trait::async_trait;
use blake3::Hasher as Blake3;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::SecureStore;
use crate::errors::{AuthError, AuthenticatorResult};

const STORE_VERSION: u16 = 1;
const ENTRY_EXTENSION: &str = "entry";
const MAX_KEY_LENGTH: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryEnvelope {
    version: u16,
    key: String,
    checksum: [u8; 32],
    value: String,
    modified_at_unix: i64,
}

/// Directory-backed store: one checksummed JSON envelope per key, written
/// through a temp file and renamed into place.
#[derive(Debug, Clone)]
pub struct FileSecureStore {
    root: PathBuf,
}

impl FileSecureStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> AuthenticatorResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(format!("{}.{}", key, ENTRY_EXTENSION)))
    }
}

#[async_trait]
impl SecureStore for FileSecureStore {
    async fn get(&self, key: &str) -> AuthenticatorResult<Option<String>> {
        let path = self.entry_path(key)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope: EntryEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != STORE_VERSION {
            return Err(AuthError::StorageError(format!(
                "Unsupported store entry version {}",
                envelope.version
            )));
        }
        if envelope.key != key || checksum(key, &envelope.value) != envelope.checksum {
            return Err(AuthError::StorageError(format!(
                "Integrity verification failed for '{}'",
                key
            )));
        }

        Ok(Some(envelope.value))
    }

    async fn set(&self, key: &str, value: &str) -> AuthenticatorResult<()> {
        let path = self.entry_path(key)?;
        let envelope = EntryEnvelope {
            version: STORE_VERSION,
            key: key.to_string(),
            checksum: checksum(key, value),
            value: value.to_string(),
            modified_at_unix: Utc::now().timestamp(),
        };
        let serialized = serde_json::to_vec(&envelope)?;

        fs::create_dir_all(&self.root).await?;
        let tmp_path = path.with_extension("new");
        {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&serialized).await?;
            file.sync_all().await?;
        }
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> AuthenticatorResult<()> {
        for key in keys {
            let path = self.entry_path(key)?;
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn validate_key(key: &str) -> AuthenticatorResult<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LENGTH
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(AuthError::StorageError(format!(
            "Invalid store key '{}'",
            key
        )));
    }
    Ok(())
}

fn checksum(key: &str, value: &str) -> [u8; 32] {
    let mut hasher = Blake3::new();
    hasher.update(key.as_bytes());
    hasher.update(&[0u8]);
    hasher.update(value.as_bytes());
    let mut output = [0u8; 32];
    output.copy_from_slice(hasher.finalize().as_bytes());
    output
}
