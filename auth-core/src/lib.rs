// lib.rs - Wallet ownership authentication and account security policy

pub mod api;
pub mod app_state;
pub mod challenge;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod events;
pub mod policy;
pub mod reporter;
pub mod session;
pub mod storage;
pub mod token;
pub mod validation;
pub mod wallet;

// Re-export common types
pub use api::types::*;
pub use app_state::{AuthContext, AuthContextBuilder};
pub use challenge::Challenge;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Environment, PolicySettings, SecurityConfig, SessionSettings};
pub use errors::{AuthError, AuthenticatorResult};
pub use events::{AuthEvent, EventBus, EventKind, ListenerId, LogoutReason};
pub use policy::{
    SecurityAlert, SecurityEvent, SecurityEventKind, SecurityMetrics, SecurityPolicyEngine,
};
pub use reporter::{ErrorReporter, LogErrorReporter};
pub use session::{AuthUser, Session, SessionAuthenticator};
pub use storage::{FileSecureStore, MemoryStore, SecureStore};
pub use token::{SessionClaims, SessionToken};
pub use validation::{AddressDenyList, InputValidator, StaticDenyList};
pub use wallet::{LocalKeySigner, SignerError, WalletSigner};
