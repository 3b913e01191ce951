//! Opaque session token handed to the UI layer.
//!
//! The token is self-describing (`wst1.<claims>.<digest>`) so it can be
//! inspected without external state. The digest only detects corruption; the
//! wallet signature challenge is what establishes identity.

use serde::{Deserialize, Serialize};

use crate::errors::{AuthError, AuthenticatorResult};

const PREFIX: &str = "wst1";
const DIGEST_HEX_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Lowercase wallet address.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    /// Session id.
    pub sid: String,
}

impl SessionClaims {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.exp
    }
}

pub struct SessionToken;

impl SessionToken {
    pub fn encode(claims: &SessionClaims) -> AuthenticatorResult<String> {
        let payload = serde_json::to_vec(claims)?;
        Ok(format!(
            "{}.{}.{}",
            PREFIX,
            hex::encode(&payload),
            digest(&payload)
        ))
    }

    pub fn decode(token: &str) -> AuthenticatorResult<SessionClaims> {
        let mut parts = token.trim().split('.');
        let (prefix, payload_hex, checksum) = match (parts.next(), parts.next(), parts.next()) {
            (Some(prefix), Some(payload), Some(checksum)) if parts.next().is_none() => {
                (prefix, payload, checksum)
            }
            _ => return Err(malformed("expected three segments")),
        };

        if prefix != PREFIX {
            return Err(malformed("unknown token version"));
        }

        let payload = hex::decode(payload_hex).map_err(|_| malformed("claims are not hex"))?;
        if digest(&payload) != checksum.to_ascii_lowercase() {
            return Err(malformed("digest mismatch"));
        }

        serde_json::from_slice(&payload).map_err(|e| malformed(&e.to_string()))
    }
}

fn digest(payload: &[u8]) -> String {
    let mut hex = blake3::hash(payload).to_hex().to_string();
    hex.truncate(DIGEST_HEX_LEN);
    hex
}

fn malformed(reason: &str) -> AuthError {
    AuthError::ValidationError(format!("Malformed session token: {}", reason))
}
