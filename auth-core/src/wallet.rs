use std::fmt;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::crypto::PersonalSigningKey;
use crate::errors::AuthenticatorResult;

/// Why a wallet did not return a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// The user declined the request in their wallet.
    Rejected(String),
    /// The wallet could not be reached (connectivity loss, app closed).
    Unavailable(String),
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignerError::Rejected(msg) => write!(f, "request rejected: {}", msg),
            SignerError::Unavailable(msg) => write!(f, "wallet unavailable: {}", msg),
        }
    }
}

impl std::error::Error for SignerError {}

/// Connected wallet; the only source of proof-of-ownership.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Ask the wallet to `personal_sign` `message`. May wait on the user indefinitely.
    async fn sign_message(&self, message: &str) -> Result<String, SignerError>;

    /// Address currently exposed by the wallet, if any.
    fn address(&self) -> Option<String>;

    fn is_connected(&self) -> bool;

    /// Drop the wallet connection.
    async fn disconnect(&self) -> Result<(), SignerError>;
}

/// In-process signer backed by a secp256k1 key.
#[derive(Debug)]
pub struct LocalKeySigner {
    key: PersonalSigningKey,
    connected: RwLock<bool>,
}

impl LocalKeySigner {
    pub fn new(key: PersonalSigningKey) -> Self {
        Self {
            key,
            connected: RwLock::new(true),
        }
    }

    pub fn generate() -> AuthenticatorResult<Self> {
        Ok(Self::new(PersonalSigningKey::generate()?))
    }

    pub fn from_hex(private_key_hex: &str) -> AuthenticatorResult<Self> {
        Ok(Self::new(PersonalSigningKey::from_hex(private_key_hex)?))
    }

    pub fn connect(&self) {
        *self.connected.write() = true;
    }
}

#[async_trait]
impl WalletSigner for LocalKeySigner {
    async fn sign_message(&self, message: &str) -> Result<String, SignerError> {
        if !self.is_connected() {
            return Err(SignerError::Unavailable("signer disconnected".to_string()));
        }
        self.key
            .sign_personal(message)
            .map_err(|e| SignerError::Unavailable(e.to_string()))
    }

    fn address(&self) -> Option<String> {
        if self.is_connected() {
            Some(self.key.address().to_string())
        } else {
            None
        }
    }

    fn is_connected(&self) -> bool {
        *self.connected.read()
    }

    async fn disconnect(&self) -> Result<(), SignerError> {
        *self.connected.write() = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::recover_address;

    #[tokio::test]
    async fn local_signer_produces_recoverable_signatures() {
        let signer = LocalKeySigner::generate().unwrap();
        let address = signer.address().unwrap();
        let signature = signer.sign_message("prove it").await.unwrap();
        assert_eq!(recover_address("prove it", &signature).unwrap(), address);
    }

    #[tokio::test]
    async fn disconnected_signer_refuses_to_sign() {
        let signer = LocalKeySigner::generate().unwrap();
        signer.disconnect().await.unwrap();
        assert!(!signer.is_connected());
        assert!(signer.address().is_none());
        assert!(matches!(
            signer.sign_message("x").await,
            Err(SignerError::Unavailable(_))
        ));

        signer.connect();
        assert!(signer.sign_message("x").await.is_ok());
    }
}
