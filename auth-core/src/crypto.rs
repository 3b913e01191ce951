//! Wallet-ownership cryptography: EIP-191 `personal_sign` hashing and
//! secp256k1 signer recovery.
//!
//! The authenticator never holds a user's key; it only recovers the address
//! that produced a signature and compares it with the challenged address.

use crate::errors::{AuthError, AuthenticatorResult};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha3::{Digest, Keccak256};

const SIGNATURE_LEN: usize = 65;
const ADDRESS_HEX_LEN: usize = 40;

/// Hash `message` the way wallets do for `personal_sign`.
pub fn eip191_hash(message: &str) -> [u8; 32] {
    let bytes = message.as_bytes();
    let prefix = format!("\x19Ethereum Signed Message:\n{}", bytes.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Recover the lowercase `0x` address that signed `message`.
pub fn recover_address(message: &str, signature_hex: &str) -> AuthenticatorResult<String> {
    let bytes = decode_hex_prefixed(signature_hex)?;
    if bytes.len() != SIGNATURE_LEN {
        return Err(AuthError::InvalidSignature(format!(
            "signature must be {} bytes, got {}",
            SIGNATURE_LEN,
            bytes.len()
        )));
    }

    let signature = Signature::try_from(&bytes[..64])
        .map_err(|e| AuthError::InvalidSignature(format!("malformed ECDSA signature: {}", e)))?;
    let recovery_id = normalize_recovery_id(bytes[64])?;
    let prehash = eip191_hash(message);
    let key = VerifyingKey::recover_from_prehash(&prehash, &signature, recovery_id)
        .map_err(|e| AuthError::InvalidSignature(format!("signer recovery failed: {}", e)))?;
    address_from_verifying_key(&key)
}

/// Canonical lowercase form of an EVM address, or `None` when malformed.
pub fn normalize_address(address: &str) -> Option<String> {
    let trimmed = address.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))?;
    if hex.len() != ADDRESS_HEX_LEN || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", hex.to_ascii_lowercase()))
}

/// Case-insensitive address equality.
pub fn addresses_match(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}

pub fn address_from_verifying_key(key: &VerifyingKey) -> AuthenticatorResult<String> {
    let encoded = key.to_encoded_point(false);
    let public_key = encoded.as_bytes();
    if public_key.len() != 65 || public_key[0] != 0x04 {
        return Err(AuthError::CryptoError(
            "unexpected public key encoding".to_string(),
        ));
    }

    let digest = Keccak256::digest(&public_key[1..]);
    Ok(format!("0x{}", hex::encode(&digest[12..])))
}

/// Hex string of `len` bytes from the OS RNG.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn normalize_recovery_id(raw: u8) -> AuthenticatorResult<RecoveryId> {
    let id = match raw {
        27 | 28 => raw - 27,
        0 | 1 => raw,
        _ => {
            return Err(AuthError::InvalidSignature(
                "recovery id must be 0/1 or 27/28".to_string(),
            ))
        }
    };
    RecoveryId::try_from(id)
        .map_err(|_| AuthError::InvalidSignature("recovery id is invalid".to_string()))
}

fn decode_hex_prefixed(value: &str) -> AuthenticatorResult<Vec<u8>> {
    let trimmed = value.trim();
    let hex_part = trimmed.strip_prefix("0x").ok_or_else(|| {
        AuthError::InvalidSignature("signature must be 0x-prefixed hex".to_string())
    })?;
    hex::decode(hex_part)
        .map_err(|e| AuthError::InvalidSignature(format!("signature is not valid hex: {}", e)))
}

/// A secp256k1 key that signs like a browser or mobile wallet does.
pub struct PersonalSigningKey {
    key: SigningKey,
    address: String,
}

impl PersonalSigningKey {
    pub fn generate() -> AuthenticatorResult<Self> {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    pub fn from_hex(private_key_hex: &str) -> AuthenticatorResult<Self> {
        let raw = private_key_hex.trim();
        let raw = raw.strip_prefix("0x").unwrap_or(raw);
        let bytes = hex::decode(raw)
            .map_err(|e| AuthError::CryptoError(format!("invalid private key hex: {}", e)))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| AuthError::CryptoError(format!("invalid private key: {}", e)))?;
        Self::from_signing_key(key)
    }

    fn from_signing_key(key: SigningKey) -> AuthenticatorResult<Self> {
        let address = address_from_verifying_key(key.verifying_key())?;
        Ok(Self { key, address })
    }

    /// Lowercase `0x` address controlled by this key.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// 65-byte `r || s || v` signature (v in {27, 28}), `0x` hex encoded.
    pub fn sign_personal(&self, message: &str) -> AuthenticatorResult<String> {
        let prehash = eip191_hash(message);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&prehash)
            .map_err(|e| AuthError::CryptoError(format!("signing failed: {}", e)))?;
        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte() + 27);
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

impl std::fmt::Debug for PersonalSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonalSigningKey")
            .field("address", &self.address)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known development key (first Hardhat/Anvil account).
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    #[test]
    fn dev_key_derives_known_address() {
        let key = PersonalSigningKey::from_hex(DEV_KEY).unwrap();
        assert_eq!(key.address(), DEV_ADDRESS);
    }

    #[test]
    fn recovers_signer_of_personal_message() {
        let key = PersonalSigningKey::from_hex(DEV_KEY).unwrap();
        let signature = key.sign_personal("hello remit").unwrap();
        assert_eq!(recover_address("hello remit", &signature).unwrap(), DEV_ADDRESS);
    }

    #[test]
    fn different_message_recovers_different_address() {
        let key = PersonalSigningKey::generate().unwrap();
        let signature = key.sign_personal("original").unwrap();
        let recovered = recover_address("tampered", &signature).unwrap_or_default();
        assert_ne!(recovered, key.address());
    }

    #[test]
    fn accepts_raw_recovery_ids() {
        let key = PersonalSigningKey::generate().unwrap();
        let signature = key.sign_personal("v normalisation").unwrap();
        let mut bytes = hex::decode(&signature[2..]).unwrap();
        bytes[64] -= 27;
        let raw = format!("0x{}", hex::encode(bytes));
        assert_eq!(recover_address("v normalisation", &raw).unwrap(), key.address());
    }

    #[test]
    fn malformed_signatures_are_invalid() {
        let short = format!("0x{}", "ab".repeat(64));
        for signature in ["", "0x", "deadbeef", "0xzz", short.as_str()] {
            assert!(matches!(
                recover_address("msg", signature),
                Err(AuthError::InvalidSignature(_))
            ));
        }
        let bad_v = format!("0x{}{}", "11".repeat(64), "05");
        assert!(matches!(
            recover_address("msg", &bad_v),
            Err(AuthError::InvalidSignature(_))
        ));
    }

    #[test]
    fn address_normalization() {
        let mixed = "0xF39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
        assert_eq!(normalize_address(mixed).as_deref(), Some(DEV_ADDRESS));
        assert!(normalize_address("0x123").is_none());
        assert!(normalize_address("f39fd6e51aad88f6f4ce6ab8827279cfffb92266").is_none());
        assert!(addresses_match(mixed, DEV_ADDRESS));
        assert!(!addresses_match(mixed, "0x0000000000000000000000000000000000000001"));
    }
}
