use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::random_hex;
use crate::errors::{AuthError, AuthenticatorResult};

const HEADER: &str = "Sign this message to prove you own this wallet.";
const FOOTER: &str =
    "This request will not trigger a blockchain transaction or cost any gas fees.";
const NONCE_BYTES: usize = 16;

/// One-shot message the wallet signs to prove it controls `address`.
///
/// Lives only between issuance and verification and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub message: String,
    pub address: String,
    /// Issuance time, unix ms.
    pub timestamp: i64,
    pub nonce: String,
}

impl Challenge {
    /// Build a challenge for `address` at `now` with a fresh OS-RNG nonce.
    pub fn issue(address: &str, now: i64) -> AuthenticatorResult<Self> {
        Self::with_nonce(address, now, random_hex(NONCE_BYTES))
    }

    fn with_nonce(address: &str, now: i64, nonce: String) -> AuthenticatorResult<Self> {
        let issued_at = Utc
            .timestamp_millis_opt(now)
            .single()
            .ok_or_else(|| {
                AuthError::ValidationError(format!("Challenge timestamp {} out of range", now))
            })?
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let message = format!(
            "{HEADER}\n\nAddress: {address}\nIssued At: {issued_at}\nTimestamp: {now}\nNonce: {nonce}\n\n{FOOTER}"
        );

        Ok(Self {
            message,
            address: address.to_string(),
            timestamp: now,
            nonce,
        })
    }

    /// Recover the fields of a previously issued challenge message.
    pub fn parse(message: &str) -> AuthenticatorResult<Self> {
        let mut lines = message.lines();
        if lines.next() != Some(HEADER) {
            return Err(invalid("missing header"));
        }

        let mut address = None;
        let mut timestamp = None;
        let mut nonce = None;
        for line in lines {
            if let Some(value) = line.strip_prefix("Address: ") {
                address = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("Timestamp: ") {
                timestamp = Some(
                    value
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| invalid("timestamp is not a number"))?,
                );
            } else if let Some(value) = line.strip_prefix("Nonce: ") {
                nonce = Some(value.trim().to_string());
            }
        }

        let nonce = nonce.ok_or_else(|| invalid("missing nonce"))?;
        if nonce.len() != NONCE_BYTES * 2 || !nonce.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("nonce is malformed"));
        }

        Ok(Self {
            message: message.to_string(),
            address: address.ok_or_else(|| invalid("missing address"))?,
            timestamp: timestamp.ok_or_else(|| invalid("missing timestamp"))?,
            nonce,
        })
    }

    pub fn age_ms(&self, now: i64) -> i64 {
        now - self.timestamp
    }

    /// Whether the challenge is still acceptable at `now`. The bound is inclusive.
    pub fn is_valid_at(&self, now: i64, expiry_ms: i64) -> bool {
        self.age_ms(now) <= expiry_ms
    }
}

fn invalid(reason: &str) -> AuthError {
    AuthError::ValidationError(format!("Malformed challenge: {}", reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "0xF39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
    const NOW: i64 = 1_700_000_000_123;

    #[test]
    fn message_layout() {
        let challenge =
            Challenge::with_nonce(ADDRESS, NOW, "00112233445566778899aabbccddeeff".to_string())
                .unwrap();
        let expected = format!(
            "Sign this message to prove you own this wallet.\n\n\
             Address: {ADDRESS}\n\
             Issued At: 2023-11-14T22:13:20.123Z\n\
             Timestamp: {NOW}\n\
             Nonce: 00112233445566778899aabbccddeeff\n\n\
             This request will not trigger a blockchain transaction or cost any gas fees."
        );
        assert_eq!(challenge.message, expected);
    }

    #[test]
    fn parse_recovers_fields() {
        let issued = Challenge::issue(ADDRESS, NOW).unwrap();
        let parsed = Challenge::parse(&issued.message).unwrap();
        assert_eq!(parsed, issued);
        assert_eq!(parsed.nonce.len(), 32);
    }

    #[test]
    fn nonces_are_unique() {
        let a = Challenge::issue(ADDRESS, NOW).unwrap();
        let b = Challenge::issue(ADDRESS, NOW).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.message, b.message);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let challenge = Challenge::issue(ADDRESS, NOW).unwrap();
        let five_minutes = 5 * 60 * 1000;
        assert!(challenge.is_valid_at(NOW + five_minutes, five_minutes));
        assert!(!challenge.is_valid_at(NOW + five_minutes + 1, five_minutes));
    }

    #[test]
    fn parse_rejects_foreign_text() {
        assert!(Challenge::parse("hello").is_err());
        let issued = Challenge::issue(ADDRESS, NOW).unwrap();
        let tampered = issued.message.replace("Timestamp: ", "Timestamp: x");
        assert!(Challenge::parse(&tampered).is_err());
        let no_nonce: String = issued
            .message
            .lines()
            .filter(|line| !line.starts_with("Nonce:"))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(Challenge::parse(&no_nonce).is_err());
    }
}
