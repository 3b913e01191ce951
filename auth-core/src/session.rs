use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::{AuthResult, OperationResult};
use crate::challenge::Challenge;
use crate::clock::Clock;
use crate::config::SessionSettings;
use crate::crypto::{addresses_match, normalize_address, random_hex, recover_address};
use crate::errors::{AuthError, AuthenticatorResult};
use crate::events::{AuthEvent, EventBus, LogoutReason};
use crate::policy::{SecurityEventKind, SecurityPolicyEngine};
use crate::reporter::ErrorReporter;
use crate::storage::{SecureStore, SESSION_KEY, SESSION_KEYS};
use crate::token::{SessionClaims, SessionToken};
use crate::wallet::{SignerError, WalletSigner};

const REFRESH_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    /// Always lowercase.
    pub address: String,
    #[serde(default)]
    pub ens_name: Option<String>,
    pub is_verified: bool,
    pub login_time: i64,
    pub last_activity: i64,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user: AuthUser,
    pub token: String,
    pub expires_at: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Session {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct AuthState {
    session: Option<Session>,
    pending: Option<Challenge>,
}

/// Clears the in-flight flag when `authenticate` finishes or its future is dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Proves wallet ownership through a signed challenge and manages the
/// resulting session.
///
/// Every sign-in outcome is reported to the [`SecurityPolicyEngine`], which
/// may lock the account for subsequent attempts. Logout and account switches
/// bump a generation counter so that an `authenticate` call still waiting on
/// the wallet discards its result instead of resurrecting a session.
pub struct SessionAuthenticator {
    signer: Arc<dyn WalletSigner>,
    store: Arc<dyn SecureStore>,
    policy: Arc<SecurityPolicyEngine>,
    events: Arc<EventBus>,
    reporter: Arc<dyn ErrorReporter>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    state: Mutex<AuthState>,
    in_flight: AtomicBool,
    generation: AtomicU64,
}

impl SessionAuthenticator {
    pub fn new(
        signer: Arc<dyn WalletSigner>,
        store: Arc<dyn SecureStore>,
        policy: Arc<SecurityPolicyEngine>,
        events: Arc<EventBus>,
        reporter: Arc<dyn ErrorReporter>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            signer,
            store,
            policy,
            events,
            reporter,
            clock,
            settings,
            state: Mutex::new(AuthState::default()),
            in_flight: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Build an authenticator and pick up a persisted session if it is still usable.
    pub async fn restore(
        signer: Arc<dyn WalletSigner>,
        store: Arc<dyn SecureStore>,
        policy: Arc<SecurityPolicyEngine>,
        events: Arc<EventBus>,
        reporter: Arc<dyn ErrorReporter>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        let authenticator = Self::new(signer, store, policy, events, reporter, clock, settings);
        if let Some(session) = authenticator.load_session().await {
            authenticator.state.lock().session = Some(session);
        }
        authenticator
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Sign in with the connected wallet, or return the current session if it is still valid.
    pub async fn authenticate(&self) -> AuthResult {
        if let Some(session) = self.valid_session() {
            return AuthResult::from_session(&session);
        }

        let _guard = match InFlightGuard::acquire(&self.in_flight) {
            Some(guard) => guard,
            None => {
                let error = AuthError::AuthenticationInProgress;
                self.report(&error, "authenticate");
                return AuthResult::failure(error);
            }
        };
        self.end_if_switched().await;
        let generation = self.generation.load(Ordering::SeqCst);
        let claimed = self.signer.address();

        if self.policy.is_account_locked().await {
            let error = self.policy.locked_error();
            return self.fail(error, claimed.as_deref()).await;
        }

        let address = match claimed.as_deref() {
            Some(address) if self.signer.is_connected() => address,
            _ => return self.fail(AuthError::WalletDisconnected, None).await,
        };

        match self.sign_in(address, generation).await {
            Ok(session) => {
                log::info!("Authenticated wallet {}", session.user.address);
                self.policy
                    .record_event(
                        SecurityEventKind::LoginSuccess,
                        Some(json!({ "address": session.user.address })),
                    )
                    .await;
                self.events.emit(&AuthEvent::Authenticated {
                    user: session.user.clone(),
                });
                AuthResult::from_session(&session)
            }
            Err(error) => self.fail(error, Some(address)).await,
        }
    }

    /// Session is unexpired and the connected wallet still owns it.
    pub fn is_session_valid(&self) -> bool {
        self.valid_session().is_some()
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_session_valid()
    }

    /// Extend the session lifetime, reissuing both tokens.
    pub async fn refresh_session(&self) -> AuthResult {
        let refreshed = if self.end_if_switched().await {
            Err(AuthError::WalletDisconnected)
        } else {
            self.renew()
        };
        match refreshed {
            Ok(session) => {
                self.persist_session(&session).await;
                log::info!("Refreshed session for {}", session.user.address);
                AuthResult::from_session(&session)
            }
            Err(error) => {
                self.report(&error, "refresh_session");
                AuthResult::failure(error)
            }
        }
    }

    /// Record user activity on the current session. No-op without one.
    pub async fn update_activity(&self) {
        if self.end_if_switched().await {
            return;
        }
        let now = self.clock.now_millis();
        let connected = self.signer.address();
        let updated = {
            let mut state = self.state.lock();
            match state.session.as_mut() {
                Some(session)
                    if !session.is_expired_at(now)
                        && owns(connected.as_deref(), &session.user.address) =>
                {
                    session.user.last_activity = now;
                    Some(session.clone())
                }
                _ => None,
            }
        };
        if let Some(session) = updated {
            self.persist_session(&session).await;
        }
    }

    /// End the session and disconnect the wallet. Succeeds without a session.
    pub async fn logout(&self) -> OperationResult {
        self.end_session(LogoutReason::UserRequested).await;
        if let Err(e) = self.signer.disconnect().await {
            log::warn!("Wallet disconnect failed: {}", e);
        }
        OperationResult::ok()
    }

    /// React to the wallet reporting a new active address; `None` means it disconnected.
    pub async fn handle_account_changed(&self, new_address: Option<&str>) {
        let current = {
            let mut state = self.state.lock();
            let unchanged = |address: &str| {
                new_address
                    .map(|new| addresses_match(new, address))
                    .unwrap_or(false)
            };
            if state
                .pending
                .as_ref()
                .map(|challenge| !unchanged(&challenge.address))
                .unwrap_or(false)
            {
                self.generation.fetch_add(1, Ordering::SeqCst);
                state.pending = None;
            }
            state.session.as_ref().map(|s| s.user.address.clone())
        };

        let Some(current) = current else {
            return;
        };
        if let Some(new) = new_address {
            if addresses_match(new, &current) {
                return;
            }
        }

        let reason = match new_address {
            Some(_) => LogoutReason::AccountChanged,
            None => LogoutReason::WalletDisconnected,
        };
        log::info!(
            "Wallet account changed from {} to {}; invalidating session",
            current,
            new_address.unwrap_or("<disconnected>")
        );
        self.end_session(reason).await;
    }

    pub fn session(&self) -> Option<Session> {
        self.state.lock().session.clone()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.state.lock().session.as_ref().map(|s| s.user.clone())
    }

    /// Decoded claims of the current session token.
    pub fn session_token_claims(&self) -> Option<SessionClaims> {
        let token = self.state.lock().session.as_ref()?.token.clone();
        SessionToken::decode(&token).ok()
    }

    async fn sign_in(&self, address: &str, generation: u64) -> AuthenticatorResult<Session> {
        let challenge = Challenge::issue(address, self.clock.now_millis())?;
        self.state.lock().pending = Some(challenge.clone());

        let signed = self.signer.sign_message(&challenge.message).await;
        self.state.lock().pending = None;
        self.ensure_generation(generation)?;

        let signature = signed.map_err(|e| match e {
            SignerError::Rejected(msg) | SignerError::Unavailable(msg) => {
                log::warn!("Wallet {} declined the challenge: {}", address, msg);
                AuthError::SignatureRejected(msg)
            }
        })?;

        let recovered = recover_address(&challenge.message, &signature)?;
        if !addresses_match(&recovered, address) {
            log::warn!("Signature for {} was produced by {}", address, recovered);
            return Err(AuthError::InvalidSignature(
                "Signature does not match the wallet address".to_string(),
            ));
        }

        let now = self.clock.now_millis();
        if !challenge.is_valid_at(now, self.settings.challenge_expiry_ms) {
            return Err(AuthError::ChallengeExpired);
        }

        let session = self.issue_session(address, now)?;
        self.persist_session(&session).await;

        let committed = {
            let mut state = self.state.lock();
            if self.generation.load(Ordering::SeqCst) == generation {
                state.session = Some(session.clone());
                true
            } else {
                false
            }
        };
        if !committed {
            self.erase_session().await;
            return Err(invalidated());
        }
        Ok(session)
    }

    fn issue_session(&self, address: &str, now: i64) -> AuthenticatorResult<Session> {
        let address = normalize_address(address).unwrap_or_else(|| address.to_ascii_lowercase());
        let user = AuthUser {
            address,
            ens_name: None,
            is_verified: true,
            login_time: now,
            last_activity: now,
            session_id: Uuid::new_v4().to_string(),
        };
        let expires_at = now.saturating_add(self.settings.session_duration_ms);
        let token = mint_token(&user, now, expires_at)?;
        Ok(Session {
            user,
            token,
            expires_at,
            refresh_token: Some(random_hex(REFRESH_TOKEN_BYTES)),
        })
    }

    fn renew(&self) -> AuthenticatorResult<Session> {
        let now = self.clock.now_millis();
        let connected = self
            .signer
            .address()
            .filter(|_| self.signer.is_connected());
        let mut state = self.state.lock();

        let Some(session) = state.session.as_mut() else {
            return Err(AuthError::SessionExpired);
        };
        if session.is_expired_at(now) {
            log::info!("Session for {} expired before refresh", session.user.address);
            state.session = None;
            return Err(AuthError::SessionExpired);
        }
        if !owns(connected.as_deref(), &session.user.address) {
            return Err(AuthError::WalletDisconnected);
        }

        let expires_at = now.saturating_add(self.settings.session_duration_ms);
        session.token = mint_token(&session.user, now, expires_at)?;
        session.user.last_activity = now;
        session.expires_at = expires_at;
        session.refresh_token = Some(random_hex(REFRESH_TOKEN_BYTES));
        Ok(session.clone())
    }

    fn valid_session(&self) -> Option<Session> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        let session = state.session.as_ref()?;

        if session.is_expired_at(now) {
            log::info!("Session for {} expired", session.user.address);
            state.session = None;
            return None;
        }
        if !self.signer.is_connected() {
            return None;
        }
        let connected = self.signer.address();
        owns(connected.as_deref(), &session.user.address).then(|| session.clone())
    }

    /// End the session if the wallet now reports a different address. Returns
    /// whether a session was ended.
    async fn end_if_switched(&self) -> bool {
        let Some(connected) = self.signer.address() else {
            return false;
        };
        let stale = self
            .state
            .lock()
            .session
            .as_ref()
            .filter(|session| !addresses_match(&connected, &session.user.address))
            .map(|session| session.user.address.clone());

        match stale {
            Some(previous) => {
                log::info!(
                    "Wallet now reports {} instead of {}; ending session",
                    connected,
                    previous
                );
                self.end_session(LogoutReason::AccountChanged).await;
                true
            }
            None => false,
        }
    }

    /// Drop the in-memory session and its persisted copy, cancelling any in-flight sign-in.
    async fn end_session(&self, reason: LogoutReason) {
        let ended = {
            let mut state = self.state.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            state.pending = None;
            state.session.take()
        };

        self.erase_session().await;

        if let Some(session) = ended {
            log::info!("Logged out {} ({:?})", session.user.address, reason);
            self.events.emit(&AuthEvent::LoggedOut {
                address: session.user.address,
                reason,
            });
        }
    }

    fn ensure_generation(&self, generation: u64) -> AuthenticatorResult<()> {
        if self.generation.load(Ordering::SeqCst) == generation {
            Ok(())
        } else {
            Err(invalidated())
        }
    }

    async fn fail(&self, error: AuthError, address: Option<&str>) -> AuthResult {
        self.policy
            .record_event(
                SecurityEventKind::LoginFailure,
                Some(json!({
                    "address": address.map(str::to_ascii_lowercase),
                    "code": error.code(),
                })),
            )
            .await;
        self.report(&error, "authenticate");
        AuthResult::failure(error)
    }

    fn report(&self, error: &AuthError, context: &'static str) {
        self.reporter.report(error, context);
        self.events.emit(&AuthEvent::Error {
            error: error.clone(),
            context,
        });
    }

    async fn persist_session(&self, session: &Session) {
        let result = match serde_json::to_string(session) {
            Ok(raw) => self.store.set(SESSION_KEY, &raw).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            log::error!("Failed to persist session: {}", e);
        }
    }

    async fn erase_session(&self) {
        if let Err(e) = self.store.remove(&SESSION_KEYS).await {
            log::error!("Failed to erase persisted session: {}", e);
        }
    }

    async fn load_session(&self) -> Option<Session> {
        let raw = match self.store.get(SESSION_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log::error!("Failed to load persisted session: {}", e);
                return None;
            }
        };

        let restored = serde_json::from_str::<Session>(&raw)
            .map_err(|e| format!("unreadable ({})", e))
            .and_then(|session| self.check_restored(&session).map(|_| session));

        match restored {
            Ok(session) => {
                log::info!("Restored session for {}", session.user.address);
                Some(session)
            }
            Err(reason) => {
                log::warn!("Discarding persisted session: {}", reason);
                self.erase_session().await;
                None
            }
        }
    }

    fn check_restored(&self, session: &Session) -> Result<(), String> {
        if session.is_expired_at(self.clock.now_millis()) {
            return Err("expired".to_string());
        }
        let claims = SessionToken::decode(&session.token).map_err(|e| e.to_string())?;
        if claims.sub != session.user.address || claims.sid != session.user.session_id {
            return Err("token does not belong to the session".to_string());
        }
        if let Some(connected) = self.signer.address() {
            if !addresses_match(&connected, &session.user.address) {
                return Err(format!(
                    "bound to {} but {} is connected",
                    session.user.address, connected
                ));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SessionAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAuthenticator")
            .field("settings", &self.settings)
            .field("user", &self.current_user())
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

fn mint_token(user: &AuthUser, issued_at: i64, expires_at: i64) -> AuthenticatorResult<String> {
    SessionToken::encode(&SessionClaims {
        sub: user.address.clone(),
        iat: issued_at,
        exp: expires_at,
        sid: user.session_id.clone(),
    })
    .map_err(|e| AuthError::SessionCreationFailed(e.to_string()))
}

fn owns(connected: Option<&str>, address: &str) -> bool {
    connected
        .map(|connected| addresses_match(connected, address))
        .unwrap_or(false)
}

fn invalidated() -> AuthError {
    AuthError::SessionCreationFailed("session was invalidated during sign-in".to_string())
}
