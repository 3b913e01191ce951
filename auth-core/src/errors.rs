use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthError {
    // Lockout and throttling
    AccountLocked { remaining_ms: i64 },
    RateLimitExceeded(String),

    // Signature flow
    SignatureRejected(String),
    InvalidSignature(String),
    ChallengeExpired,
    AuthenticationInProgress,

    // Session lifecycle
    SessionExpired,
    SessionCreationFailed(String),
    WalletDisconnected,

    // Input validation
    ValidationError(String),

    // Infrastructure
    StorageError(String),
    CryptoError(String),

    // Generic errors
    Unknown(String),
}

impl AuthError {
    /// Stable machine-readable code, matching the serialized `code` tag.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::AccountLocked { .. } => "ACCOUNT_LOCKED",
            AuthError::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            AuthError::SignatureRejected(_) => "SIGNATURE_REJECTED",
            AuthError::InvalidSignature(_) => "INVALID_SIGNATURE",
            AuthError::ChallengeExpired => "CHALLENGE_EXPIRED",
            AuthError::AuthenticationInProgress => "AUTHENTICATION_IN_PROGRESS",
            AuthError::SessionExpired => "SESSION_EXPIRED",
            AuthError::SessionCreationFailed(_) => "SESSION_CREATION_FAILED",
            AuthError::WalletDisconnected => "WALLET_DISCONNECTED",
            AuthError::ValidationError(_) => "VALIDATION_ERROR",
            AuthError::StorageError(_) => "STORAGE_ERROR",
            AuthError::CryptoError(_) => "CRYPTO_ERROR",
            AuthError::Unknown(_) => "UNKNOWN",
        }
    }

    /// Default text the UI layer shows for this error kind.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::AccountLocked { remaining_ms } => {
                let minutes = ((*remaining_ms).max(0) + 59_999) / 60_000;
                format!(
                    "Too many failed attempts. Your account is locked for {} more minute{}.",
                    minutes,
                    if minutes == 1 { "" } else { "s" }
                )
            }
            AuthError::RateLimitExceeded(_) => {
                "Too many requests. Please wait a few minutes and try again.".to_string()
            }
            AuthError::SignatureRejected(_) => {
                "The signature request was declined in your wallet.".to_string()
            }
            AuthError::InvalidSignature(_) => {
                "The signature could not be verified for this wallet.".to_string()
            }
            AuthError::ChallengeExpired => {
                "The sign-in request expired. Please try again.".to_string()
            }
            AuthError::AuthenticationInProgress => {
                "A sign-in request is already waiting for your wallet.".to_string()
            }
            AuthError::SessionExpired => "Your session expired. Please sign in again.".to_string(),
            AuthError::SessionCreationFailed(_) => {
                "Could not start a session. Please try again.".to_string()
            }
            AuthError::WalletDisconnected => "Connect your wallet to continue.".to_string(),
            AuthError::ValidationError(msg) => msg.clone(),
            AuthError::StorageError(_) | AuthError::CryptoError(_) | AuthError::Unknown(_) => {
                "Something went wrong. Please try again.".to_string()
            }
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::AccountLocked { remaining_ms } => {
                write!(f, "Account locked for another {} ms", remaining_ms)
            }
            AuthError::RateLimitExceeded(msg) => write!(f, "Rate limit exceeded: {}", msg),

            AuthError::SignatureRejected(msg) => write!(f, "Signature rejected: {}", msg),
            AuthError::InvalidSignature(msg) => write!(f, "Invalid signature: {}", msg),
            AuthError::ChallengeExpired => write!(f, "Challenge expired"),
            AuthError::AuthenticationInProgress => write!(f, "Authentication already in progress"),

            AuthError::SessionExpired => write!(f, "Session expired"),
            AuthError::SessionCreationFailed(msg) => write!(f, "Session creation failed: {}", msg),
            AuthError::WalletDisconnected => write!(f, "Wallet disconnected"),

            AuthError::ValidationError(msg) => write!(f, "Validation error: {}", msg),

            AuthError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            AuthError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),

            AuthError::Unknown(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

pub type AuthenticatorResult<T> = Result<T, AuthError>;

// Conversion helpers
impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        AuthError::StorageError(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        AuthError::StorageError(format!("JSON error: {}", error))
    }
}
