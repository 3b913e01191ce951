use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use remit_wallet_auth::crypto::PersonalSigningKey;
use remit_wallet_auth::{
    AuthContext, AuthError, AuthEvent, Environment, EventKind, FileSecureStore, LogoutReason,
    ManualClock, MemoryStore, SecureStore, SecurityConfig, SecurityEventKind, SignerError,
    TransactionRequest, WalletSigner,
};

const T0: i64 = 1_700_000_000_000;
const MINUTE: i64 = 60 * 1000;
const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const DEV_ADDRESS_UPPER: &str = "0xF39FD6E51AAD88F6F4CE6AB8827279CFFFB92266";
const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
const SECOND_ADDRESS: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

/// Browser-wallet stand-in: reports whatever address the test chooses and can
/// be told to sign with a different key.
struct TestWallet {
    key: PersonalSigningKey,
    impostor: PersonalSigningKey,
    reported: Mutex<Option<String>>,
    use_impostor: AtomicBool,
    signatures: AtomicUsize,
}

impl TestWallet {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            key: PersonalSigningKey::from_hex(DEV_KEY).unwrap(),
            impostor: PersonalSigningKey::generate().unwrap(),
            reported: Mutex::new(Some(DEV_ADDRESS_UPPER.to_string())),
            use_impostor: AtomicBool::new(false),
            signatures: AtomicUsize::new(0),
        })
    }

    fn sign_with_impostor(&self, enabled: bool) {
        self.use_impostor.store(enabled, Ordering::SeqCst);
    }

    fn report(&self, address: Option<&str>) {
        *self.reported.lock() = address.map(str::to_string);
    }

    fn signatures(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletSigner for TestWallet {
    async fn sign_message(&self, message: &str) -> Result<String, SignerError> {
        self.signatures.fetch_add(1, Ordering::SeqCst);
        let key = if self.use_impostor.load(Ordering::SeqCst) {
            &self.impostor
        } else {
            &self.key
        };
        key.sign_personal(message)
            .map_err(|e| SignerError::Unavailable(e.to_string()))
    }

    fn address(&self) -> Option<String> {
        self.reported.lock().clone()
    }

    fn is_connected(&self) -> bool {
        self.reported.lock().is_some()
    }

    async fn disconnect(&self) -> Result<(), SignerError> {
        self.report(None);
        Ok(())
    }
}

async fn context(
    wallet: Arc<TestWallet>,
    store: Arc<dyn SecureStore>,
    clock: Arc<ManualClock>,
) -> AuthContext {
    AuthContext::builder(wallet, store, SecurityConfig::new(Environment::Test))
        .clock(clock)
        .build()
        .await
        .expect("context should initialize")
}

#[tokio::test]
async fn checksummed_address_signs_in_lowercased() {
    let clock = Arc::new(ManualClock::new(T0));
    let wallet = TestWallet::new();
    let ctx = context(wallet.clone(), Arc::new(MemoryStore::new()), clock).await;

    let result = ctx.authenticator().authenticate().await;
    assert!(result.success, "{:?}", result.error);
    let user = result.user.expect("user");
    assert_eq!(user.address, DEV_ADDRESS);
    assert_eq!(result.expires_at, Some(T0 + 24 * 60 * MINUTE));
    assert!(result.token.expect("token").starts_with("wst1."));

    let again = ctx.authenticator().authenticate().await;
    assert_eq!(again.user.map(|u| u.session_id), Some(user.session_id));
    assert_eq!(wallet.signatures(), 1);
}

#[tokio::test]
async fn repeated_failures_lock_out_valid_signatures() {
    let clock = Arc::new(ManualClock::new(T0));
    let wallet = TestWallet::new();
    let ctx = context(wallet.clone(), Arc::new(MemoryStore::new()), clock.clone()).await;
    let alerts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&alerts);
    ctx.events().on(EventKind::SecurityAlert, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    wallet.sign_with_impostor(true);
    for _ in 0..5 {
        let result = ctx.authenticator().authenticate().await;
        assert!(matches!(result.error, Some(AuthError::InvalidSignature(_))));
        clock.advance_secs(10);
    }
    assert_eq!(alerts.load(Ordering::SeqCst), 1);

    wallet.sign_with_impostor(false);
    let signatures_before = wallet.signatures();
    let locked = ctx.authenticator().authenticate().await;
    match locked.error {
        Some(AuthError::AccountLocked { remaining_ms }) => {
            assert!(remaining_ms > 14 * MINUTE && remaining_ms <= 15 * MINUTE)
        }
        other => panic!("expected lockout, got {:?}", other),
    }
    assert_eq!(wallet.signatures(), signatures_before);

    let status = ctx.security_status().await;
    assert!(status.is_locked);
    assert!(!status.is_authenticated);
}

#[tokio::test]
async fn four_failures_do_not_lock_and_lockout_lifts_lazily() {
    let clock = Arc::new(ManualClock::new(T0));
    let wallet = TestWallet::new();
    let ctx = context(wallet.clone(), Arc::new(MemoryStore::new()), clock.clone()).await;

    wallet.sign_with_impostor(true);
    for _ in 0..4 {
        ctx.authenticator().authenticate().await;
    }
    assert!(!ctx.policy().is_account_locked().await);

    ctx.authenticator().authenticate().await;
    assert!(ctx.policy().is_account_locked().await);

    wallet.sign_with_impostor(false);
    clock.advance_millis(15 * MINUTE);
    assert!(ctx.policy().is_account_locked().await);

    clock.advance_millis(1);
    let result = ctx.authenticator().authenticate().await;
    assert!(result.success, "{:?}", result.error);

    let kinds: Vec<SecurityEventKind> = ctx
        .policy()
        .recent_events(3)
        .into_iter()
        .map(|event| event.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            SecurityEventKind::LoginSuccess,
            SecurityEventKind::AccountUnlocked,
            SecurityEventKind::AccountLocked,
        ]
    );
}

#[tokio::test]
async fn persisted_session_survives_restart() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let wallet = TestWallet::new();

    let issued = {
        let store = Arc::new(FileSecureStore::new(dir.path()));
        let ctx = context(wallet.clone(), store, clock.clone()).await;
        ctx.authenticator().authenticate().await
    };
    assert!(issued.success);

    clock.advance_millis(23 * 60 * MINUTE);
    let store = Arc::new(FileSecureStore::new(dir.path()));
    let ctx = context(wallet.clone(), store, clock.clone()).await;
    assert!(ctx.authenticator().is_authenticated());
    assert_eq!(ctx.authenticator().session().map(|s| s.token), issued.token);
    assert_eq!(wallet.signatures(), 1);
    assert_eq!(ctx.policy().metrics().successful_logins, 1);

    clock.advance_millis(60 * MINUTE);
    let store = Arc::new(FileSecureStore::new(dir.path()));
    let ctx = context(wallet.clone(), store.clone(), clock).await;
    assert!(!ctx.authenticator().is_authenticated());
    assert!(ctx.authenticator().session().is_none());
    assert_eq!(store.get("auth.session").await.unwrap(), None);
}

#[tokio::test]
async fn switching_accounts_logs_out_once() {
    let clock = Arc::new(ManualClock::new(T0));
    let wallet = TestWallet::new();
    let ctx = context(wallet.clone(), Arc::new(MemoryStore::new()), clock).await;
    let logouts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&logouts);
    ctx.events().on(EventKind::LoggedOut, move |event| {
        if let AuthEvent::LoggedOut { address, reason } = event {
            seen.lock().push((address.clone(), *reason));
        }
    });

    assert!(ctx.authenticator().authenticate().await.success);

    wallet.report(Some(SECOND_ADDRESS));
    ctx.authenticator()
        .handle_account_changed(Some(SECOND_ADDRESS))
        .await;
    ctx.authenticator()
        .handle_account_changed(Some(SECOND_ADDRESS))
        .await;

    assert!(!ctx.authenticator().is_authenticated());
    assert_eq!(
        *logouts.lock(),
        vec![(DEV_ADDRESS.to_string(), LogoutReason::AccountChanged)]
    );
}

#[tokio::test]
async fn logout_disconnects_wallet() {
    let clock = Arc::new(ManualClock::new(T0));
    let wallet = TestWallet::new();
    let store = Arc::new(MemoryStore::new());
    let ctx = context(wallet.clone(), store.clone(), clock).await;

    ctx.authenticator().authenticate().await;
    assert!(store.contains("auth.session"));

    assert!(ctx.authenticator().logout().await.success);
    assert!(!store.contains("auth.session"));
    assert!(!wallet.is_connected());

    let result = ctx.authenticator().authenticate().await;
    assert_eq!(result.error, Some(AuthError::WalletDisconnected));
}

#[tokio::test]
async fn rate_limiter_slides_with_time() {
    let clock = Arc::new(ManualClock::new(T0));
    let ctx = context(TestWallet::new(), Arc::new(MemoryStore::new()), clock.clone()).await;
    let policy = ctx.policy();

    assert!(policy.check_rate_limit(DEV_ADDRESS, "transfer").await);
    clock.advance_secs(60);
    assert!(policy.check_rate_limit(DEV_ADDRESS, "transfer").await);
    assert!(policy.check_rate_limit(DEV_ADDRESS, "transfer").await);
    assert!(!policy.check_rate_limit(DEV_ADDRESS, "transfer").await);
    assert!(policy.check_rate_limit(DEV_ADDRESS, "export").await);

    clock.advance_secs(4 * 60);
    assert!(policy.check_rate_limit(DEV_ADDRESS, "transfer").await);
    assert!(!policy.check_rate_limit(DEV_ADDRESS, "transfer").await);
}

#[tokio::test]
async fn transaction_checks_follow_lock_state() {
    let clock = Arc::new(ManualClock::new(T0));
    let ctx = context(TestWallet::new(), Arc::new(MemoryStore::new()), clock).await;
    let transfer = TransactionRequest {
        to: SECOND_ADDRESS.to_string(),
        value: "25.5".to_string(),
        data: None,
    };

    assert!(ctx.policy().validate_transaction(&transfer).await.success);

    ctx.policy().lock_account(15).await;
    let locked = ctx.policy().validate_transaction(&transfer).await;
    assert_eq!(locked.error.map(|e| e.code()), Some("ACCOUNT_LOCKED"));

    ctx.policy().unlock_account().await;
    assert!(ctx.policy().validate_transaction(&transfer).await.success);
    assert_eq!(ctx.policy().metrics().transactions_attempted, 2);
}

#[tokio::test]
async fn unannounced_switch_ends_session_before_reuse() {
    let clock = Arc::new(ManualClock::new(T0));
    let wallet = TestWallet::new();
    let store = Arc::new(MemoryStore::new());
    let ctx = context(wallet.clone(), store.clone(), clock.clone()).await;
    let logouts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&logouts);
    ctx.events().on(EventKind::LoggedOut, move |event| {
        if let AuthEvent::LoggedOut { reason, .. } = event {
            seen.lock().push(*reason);
        }
    });

    assert!(ctx.authenticator().authenticate().await.success);
    wallet.report(Some(SECOND_ADDRESS));
    clock.advance_millis(60 * MINUTE);

    let refreshed = ctx.authenticator().refresh_session().await;
    assert_eq!(refreshed.error, Some(AuthError::WalletDisconnected));
    ctx.authenticator().update_activity().await;
    assert!(!store.contains("auth.session"));

    let second = ctx.authenticator().authenticate().await;
    assert!(!second.success);
    assert_eq!(*logouts.lock(), vec![LogoutReason::AccountChanged]);

    wallet.report(Some(DEV_ADDRESS_UPPER));
    assert!(!ctx.authenticator().is_authenticated());
}

#[tokio::test]
async fn sign_in_after_unannounced_switch_logs_out_once() {
    let clock = Arc::new(ManualClock::new(T0));
    let wallet = TestWallet::new();
    let ctx = context(wallet.clone(), Arc::new(MemoryStore::new()), clock).await;
    let logouts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&logouts);
    ctx.events().on(EventKind::LoggedOut, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(ctx.authenticator().authenticate().await.success);
    wallet.report(Some(SECOND_ADDRESS));

    let result = ctx.authenticator().authenticate().await;
    assert!(matches!(result.error, Some(AuthError::InvalidSignature(_))));
    assert_eq!(logouts.load(Ordering::SeqCst), 1);
    assert!(ctx.authenticator().session().is_none());
}
