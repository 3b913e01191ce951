use crate::errors::AuthError;

/// Sink for normalized authentication failures (UI toasts, remote reporting).
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &AuthError, context: &str);
}

/// Writes every report to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, error: &AuthError, context: &str) {
        match error {
            AuthError::StorageError(_) | AuthError::CryptoError(_) | AuthError::Unknown(_) => {
                log::error!("[{}] {} ({})", context, error, error.code())
            }
            _ => log::warn!("[{}] {} ({})", context, error, error.code()),
        }
    }
}
