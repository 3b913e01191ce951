use std::sync::Arc;

use crate::api::SecurityStatusResponse;
use crate::clock::{Clock, SystemClock};
use crate::config::{Environment, PolicySettings, SecurityConfig, SessionSettings};
use crate::errors::AuthenticatorResult;
use crate::events::EventBus;
use crate::policy::SecurityPolicyEngine;
use crate::reporter::{ErrorReporter, LogErrorReporter};
use crate::session::SessionAuthenticator;
use crate::storage::SecureStore;
use crate::validation::{AddressDenyList, StaticDenyList};
use crate::wallet::WalletSigner;

/// Owns the authentication services for one wallet connection.
#[derive(Clone)]
pub struct AuthContext {
    authenticator: Arc<SessionAuthenticator>,
    policy: Arc<SecurityPolicyEngine>,
    events: Arc<EventBus>,
    environment: Environment,
}

impl AuthContext {
    /// Wire up services with the system clock, log reporter and an empty deny-list.
    pub async fn initialize(
        signer: Arc<dyn WalletSigner>,
        store: Arc<dyn SecureStore>,
        config: SecurityConfig,
    ) -> AuthenticatorResult<Self> {
        Self::builder(signer, store, config).build().await
    }

    pub fn builder(
        signer: Arc<dyn WalletSigner>,
        store: Arc<dyn SecureStore>,
        config: SecurityConfig,
    ) -> AuthContextBuilder {
        AuthContextBuilder {
            signer,
            store,
            config,
            clock: Arc::new(SystemClock),
            reporter: Arc::new(LogErrorReporter),
            deny_list: Arc::new(StaticDenyList::empty()),
        }
    }

    pub fn authenticator(&self) -> &Arc<SessionAuthenticator> {
        &self.authenticator
    }

    pub fn policy(&self) -> &Arc<SecurityPolicyEngine> {
        &self.policy
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Session and lockout snapshot for status screens.
    pub async fn security_status(&self) -> SecurityStatusResponse {
        let is_locked = self.policy.is_account_locked().await;
        let session = self
            .authenticator
            .session()
            .filter(|_| self.authenticator.is_session_valid());
        SecurityStatusResponse {
            is_authenticated: session.is_some(),
            address: session.as_ref().map(|s| s.user.address.clone()),
            session_expires_at: session.as_ref().map(|s| s.expires_at),
            is_locked,
            lockout_remaining_ms: self.policy.lockout_remaining_ms(),
            metrics: self.policy.metrics(),
        }
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("environment", &self.environment)
            .field("authenticator", &self.authenticator)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Overrides for the collaborators [`AuthContext::initialize`] picks by default.
pub struct AuthContextBuilder {
    signer: Arc<dyn WalletSigner>,
    store: Arc<dyn SecureStore>,
    config: SecurityConfig,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn ErrorReporter>,
    deny_list: Arc<dyn AddressDenyList>,
}

impl AuthContextBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn deny_list(mut self, deny_list: Arc<dyn AddressDenyList>) -> Self {
        self.deny_list = deny_list;
        self
    }

    pub async fn build(self) -> AuthenticatorResult<AuthContext> {
        self.config.validate_required_configs()?;
        log::set_max_level(self.config.log_level()?);

        let policy_settings = PolicySettings::from_config(&self.config)?;
        let session_settings = SessionSettings::from_config(&self.config)?;
        let events = Arc::new(EventBus::new());

        let policy = Arc::new(
            SecurityPolicyEngine::restore(
                policy_settings,
                Arc::clone(&self.store),
                Arc::clone(&events),
                Arc::clone(&self.clock),
                self.deny_list,
            )
            .await?,
        );

        let authenticator = Arc::new(
            SessionAuthenticator::restore(
                self.signer,
                self.store,
                Arc::clone(&policy),
                Arc::clone(&events),
                self.reporter,
                self.clock,
                session_settings,
            )
            .await,
        );

        log::info!(
            "Auth context ready ({:?}, authenticated={})",
            self.config.environment(),
            authenticator.is_authenticated()
        );

        Ok(AuthContext {
            authenticator,
            policy,
            events,
            environment: self.config.environment(),
        })
    }
}
