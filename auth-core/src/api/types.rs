use crate::errors::AuthError;
use crate::policy::SecurityMetrics;
use crate::session::{AuthUser, Session};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    pub success: bool,
    #[serde(default)]
    pub user: Option<AuthUser>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub error: Option<AuthError>,
}

impl AuthResult {
    pub fn from_session(session: &Session) -> Self {
        Self {
            success: true,
            user: Some(session.user.clone()),
            token: Some(session.token.clone()),
            expires_at: Some(session.expires_at),
            error: None,
        }
    }

    pub fn failure(error: AuthError) -> Self {
        Self {
            success: false,
            user: None,
            token: None,
            expires_at: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<AuthError>,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: AuthError) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }
}

impl<T> From<Result<T, AuthError>> for OperationResult {
    fn from(result: Result<T, AuthError>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(error) => Self::failure(error),
        }
    }
}

/// Outgoing transfer as requested by the UI, before it reaches the chain client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub to: String,
    /// Decimal amount in native-currency units.
    pub value: String,
    #[serde(default)]
    pub data: Option<String>,
}

/// Snapshot of the account security state for status screens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStatusResponse {
    pub is_authenticated: bool,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub session_expires_at: Option<i64>,
    pub is_locked: bool,
    #[serde(default)]
    pub lockout_remaining_ms: Option<i64>,
    pub metrics: SecurityMetrics,
}
