use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use super::state::{
    LockCheck, PolicyState, RateLimitDecision, RateLimitEntry, RecordOutcome, SecurityEvent,
    SecurityEventKind, SecurityMetrics,
};
use crate::api::{OperationResult, TransactionRequest};
use crate::clock::Clock;
use crate::config::{minutes_to_ms, PolicySettings};
use crate::errors::{AuthError, AuthenticatorResult};
use crate::events::{AuthEvent, EventBus};
use crate::storage::{SecureStore, EVENT_LOG_KEY, METRICS_KEY, RATE_LIMITS_KEY, SECURITY_KEYS};
use crate::validation::{AddressDenyList, InputValidator};

/// Tracks login and transaction activity, detects abuse and locks the account.
///
/// Decisions are made by [`PolicyState`]; this type adds the clock, storage
/// and listeners around it. Storage failures are logged and ignored since the
/// in-memory state is authoritative for the life of the process.
pub struct SecurityPolicyEngine {
    state: Mutex<PolicyState>,
    settings: PolicySettings,
    validator: InputValidator,
    deny_list: Arc<dyn AddressDenyList>,
    store: Arc<dyn SecureStore>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    /// Serializes snapshots and writes so a newer snapshot is never overwritten by an older one.
    writer: tokio::sync::Mutex<()>,
}

impl SecurityPolicyEngine {
    pub fn new(
        settings: PolicySettings,
        store: Arc<dyn SecureStore>,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        deny_list: Arc<dyn AddressDenyList>,
    ) -> AuthenticatorResult<Self> {
        Ok(Self {
            state: Mutex::new(PolicyState::new()),
            settings,
            validator: InputValidator::new()?,
            deny_list,
            store,
            events,
            clock,
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// Build an engine and load metrics, event log and rate limits from `store`.
    pub async fn restore(
        settings: PolicySettings,
        store: Arc<dyn SecureStore>,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        deny_list: Arc<dyn AddressDenyList>,
    ) -> AuthenticatorResult<Self> {
        let engine = Self::new(settings, store, events, clock, deny_list)?;

        let event_log: VecDeque<SecurityEvent> = engine.load_or_default(EVENT_LOG_KEY).await;
        let metrics: SecurityMetrics = engine.load_or_default(METRICS_KEY).await;
        let rate_limits: Vec<RateLimitEntry> = engine.load_or_default(RATE_LIMITS_KEY).await;

        {
            let mut state = engine.state.lock();
            *state = PolicyState::from_parts(
                event_log,
                metrics,
                rate_limits,
                engine.settings.event_log_capacity,
            );
            state.prune_rate_limits(engine.clock.now_millis(), &engine.settings);
            log::debug!(
                "Restored security state: {} events, locked={}",
                state.events().len(),
                state.metrics().is_locked
            );
        }
        Ok(engine)
    }

    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    /// Record an event, re-evaluate the policy, persist and notify listeners.
    pub async fn record_event(&self, kind: SecurityEventKind, details: Option<Value>) {
        let outcome = {
            let now = self.clock.now_millis();
            self.state.lock().record(now, kind, details, &self.settings)
        };
        self.persist().await;
        self.publish(&outcome);
    }

    /// Whether authentication is currently suspended. Lifts an expired lock.
    pub async fn is_account_locked(&self) -> bool {
        let check = {
            let now = self.clock.now_millis();
            self.state.lock().check_lock(now, &self.settings)
        };
        match check {
            LockCheck::Unlocked => false,
            LockCheck::Locked { .. } => true,
            LockCheck::Lifted(event) => {
                log::info!("Account lockout expired");
                self.persist().await;
                self.publish(&RecordOutcome {
                    events: vec![event],
                    alert: None,
                });
                false
            }
        }
    }

    /// Milliseconds left on the current lockout, if locked.
    pub fn lockout_remaining_ms(&self) -> Option<i64> {
        let now = self.clock.now_millis();
        self.state.lock().lockout_remaining(now)
    }

    /// `ACCOUNT_LOCKED` error carrying the remaining lockout time.
    pub fn locked_error(&self) -> AuthError {
        AuthError::AccountLocked {
            remaining_ms: self.lockout_remaining_ms().unwrap_or(0),
        }
    }

    pub async fn lock_account(&self, minutes: u32) {
        let event = {
            let now = self.clock.now_millis();
            self.state
                .lock()
                .lock(now, minutes_to_ms(minutes), &self.settings)
        };
        log::info!("Account locked for {} minutes", minutes);
        self.persist().await;
        self.publish(&RecordOutcome {
            events: vec![event],
            alert: None,
        });
    }

    pub async fn unlock_account(&self) {
        let event = {
            let now = self.clock.now_millis();
            self.state.lock().unlock(now, &self.settings)
        };
        if let Some(event) = event {
            log::info!("Account unlocked");
            self.persist().await;
            self.publish(&RecordOutcome {
                events: vec![event],
                alert: None,
            });
        }
    }

    /// Sliding-window throttle for `(identifier, action)`. Returns `false` when denied.
    pub async fn check_rate_limit(&self, identifier: &str, action: &str) -> bool {
        let (decision, outcome) = {
            let now = self.clock.now_millis();
            self.state
                .lock()
                .check_rate_limit(now, identifier, action, &self.settings)
        };

        match decision {
            RateLimitDecision::Allowed { remaining } => {
                log::debug!(
                    "Rate limit ok for {}/{} ({} remaining)",
                    identifier,
                    action,
                    remaining
                );
            }
            RateLimitDecision::Denied { retry_after_ms } => {
                log::warn!(
                    "Rate limit exceeded for {}/{}; retry in {} ms",
                    identifier,
                    action,
                    retry_after_ms
                );
            }
        }

        self.persist().await;
        if let Some(outcome) = outcome {
            self.publish(&outcome);
        }
        decision.is_allowed()
    }

    pub async fn reset_rate_limit(&self, identifier: &str, action: &str) {
        self.state.lock().reset_rate_limit(identifier, action);
        self.persist().await;
    }

    /// Pre-flight checks for an outgoing transfer.
    pub async fn validate_transaction(&self, tx: &TransactionRequest) -> OperationResult {
        if self.is_account_locked().await {
            return OperationResult::failure(self.locked_error());
        }

        match self.check_transaction(tx) {
            Ok(value) => {
                self.record_event(
                    SecurityEventKind::TransactionAttempt,
                    Some(json!({ "to": tx.to.to_ascii_lowercase(), "value": value })),
                )
                .await;
                OperationResult::ok()
            }
            Err(err) => {
                log::warn!("Transaction rejected: {}", err);
                OperationResult::failure(err)
            }
        }
    }

    /// Address format check plus deny-list lookup.
    pub fn validate_address(&self, address: &str) -> AuthenticatorResult<()> {
        self.validator.validate_address(address)?;
        if self.deny_list.is_denied(address) {
            return Err(AuthError::ValidationError(
                "Address is on the deny list".to_string(),
            ));
        }
        Ok(())
    }

    pub fn metrics(&self) -> SecurityMetrics {
        self.state.lock().metrics().clone()
    }

    pub fn recent_events(&self, limit: usize) -> Vec<SecurityEvent> {
        self.state.lock().recent_events(limit)
    }

    /// Reset counters, event log, rate limits and lockout, in memory and in the store.
    pub async fn clear_security_data(&self) {
        let _writer = self.writer.lock().await;
        self.state.lock().clear();
        if let Err(e) = self.store.remove(&SECURITY_KEYS).await {
            log::error!("Failed to erase security state: {}", e);
        }
    }

    fn check_transaction(&self, tx: &TransactionRequest) -> AuthenticatorResult<f64> {
        self.validate_address(tx.to.trim())?;
        let value = self.validator.validate_amount(&tx.value)?;
        if value > self.settings.max_transaction_value {
            return Err(AuthError::ValidationError(format!(
                "Transaction value {} exceeds the maximum of {}",
                value, self.settings.max_transaction_value
            )));
        }
        Ok(value)
    }

    fn publish(&self, outcome: &RecordOutcome) {
        for event in &outcome.events {
            self.events.emit(&AuthEvent::SecurityEvent(event.clone()));
        }
        if let Some(alert) = &outcome.alert {
            log::warn!(
                "Suspicious activity: {}; locked until {}",
                alert.message,
                alert.lockout_until
            );
            self.events.emit(&AuthEvent::SecurityAlert(alert.clone()));
        }
    }

    async fn persist(&self) {
        let _writer = self.writer.lock().await;
        let serialized = {
            let state = self.state.lock();
            (
                serde_json::to_string(state.metrics()),
                serde_json::to_string(state.events()),
                serde_json::to_string(&state.rate_limit_entries()),
            )
        };

        let entries = [
            (METRICS_KEY, serialized.0),
            (EVENT_LOG_KEY, serialized.1),
            (RATE_LIMITS_KEY, serialized.2),
        ];
        for (key, value) in entries {
            let result = match value {
                Ok(value) => self.store.set(key, &value).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                log::error!("Failed to persist {}: {}", key, e);
            }
        }
    }

    async fn load_or_default<T>(&self, key: &str) -> T
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match self.store.get(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                log::warn!("Discarding unreadable {}: {}", key, e);
                T::default()
            }),
            Ok(None) => T::default(),
            Err(e) => {
                log::error!("Failed to load {}: {}", key, e);
                T::default()
            }
        }
    }
}

impl std::fmt::Debug for SecurityPolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityPolicyEngine")
            .field("settings", &self.settings)
            .field("metrics", self.state.lock().metrics())
            .finish()
    }
}
