pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::errors::AuthenticatorResult;

pub use file::FileSecureStore;
pub use memory::MemoryStore;

/// Persisted authenticated session.
pub const SESSION_KEY: &str = "auth.session";
/// Aggregate security counters and lockout state.
pub const METRICS_KEY: &str = "security.metrics";
/// Bounded security event log, most recent first.
pub const EVENT_LOG_KEY: &str = "security.events";
/// Sliding-window rate limiter table.
pub const RATE_LIMITS_KEY: &str = "security.rate_limits";

/// Keys erased when a session ends.
pub const SESSION_KEYS: [&str; 1] = [SESSION_KEY];
/// Keys erased when security data is cleared.
pub const SECURITY_KEYS: [&str; 3] = [METRICS_KEY, EVENT_LOG_KEY, RATE_LIMITS_KEY];

/// Async key/value persistence for session and security state.
///
/// Callers treat writes as best-effort: in-memory state stays authoritative
/// when the store fails.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get(&self, key: &str) -> AuthenticatorResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> AuthenticatorResult<()>;

    /// Remove every key in `keys`; missing keys are not an error.
    async fn remove(&self, keys: &[&str]) -> AuthenticatorResult<()>;
}
