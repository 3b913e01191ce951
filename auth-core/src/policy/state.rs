//! Side-effect-free security policy: event log, counters, lockout and rate
//! limiting as a function of `(now, state, input)`.
//!
//! Nothing here touches storage, clocks or listeners; [`super::engine`]
//! wraps it with persistence and notifications.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::PolicySettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventKind {
    LoginSuccess,
    LoginFailure,
    TransactionAttempt,
    RateLimitExceeded,
    SuspiciousActivity,
    AccountLocked,
    AccountUnlocked,
}

impl SecurityEventKind {
    /// Events the policy raises about itself rather than user activity.
    pub fn is_policy_generated(self) -> bool {
        matches!(
            self,
            SecurityEventKind::SuspiciousActivity
                | SecurityEventKind::AccountLocked
                | SecurityEventKind::AccountUnlocked
        )
    }

    fn is_lock_transition(self) -> bool {
        matches!(
            self,
            SecurityEventKind::AccountLocked | SecurityEventKind::AccountUnlocked
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    #[serde(rename = "type")]
    pub kind: SecurityEventKind,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityMetrics {
    pub login_attempts: u64,
    pub failed_logins: u64,
    pub successful_logins: u64,
    pub transactions_attempted: u64,
    pub suspicious_activities: u64,
    pub last_activity: i64,
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockout_until: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyViolation {
    ExcessiveFailedLogins { count: usize },
    ExcessiveTransactions { count: usize },
    RapidFire { count: usize },
}

impl PolicyViolation {
    pub fn describe(&self) -> String {
        match self {
            PolicyViolation::ExcessiveFailedLogins { count } => {
                format!("{} failed logins inside the monitoring window", count)
            }
            PolicyViolation::ExcessiveTransactions { count } => {
                format!("{} transaction attempts inside the monitoring window", count)
            }
            PolicyViolation::RapidFire { count } => {
                format!("{} rapid consecutive security events", count)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAlert {
    pub violation: PolicyViolation,
    pub message: String,
    pub timestamp: i64,
    pub lockout_until: i64,
}

/// Everything a single policy mutation appended, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordOutcome {
    pub events: Vec<SecurityEvent>,
    pub alert: Option<SecurityAlert>,
}

impl RecordOutcome {
    fn merge(&mut self, other: RecordOutcome) {
        self.events.extend(other.events);
        if other.alert.is_some() {
            self.alert = other.alert;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LockCheck {
    Unlocked,
    Locked { until: i64 },
    /// The lock had run out and was lifted by this check.
    Lifted(SecurityEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: usize },
    Denied { retry_after_ms: i64 },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub identifier: String,
    pub action: String,
}

/// Persisted form of one rate limiter bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub identifier: String,
    pub action: String,
    pub attempts: Vec<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct PolicyState {
    events: VecDeque<SecurityEvent>,
    metrics: SecurityMetrics,
    rate_limits: HashMap<RateLimitKey, Vec<i64>>,
}

impl PolicyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted parts, repairing anything that breaks invariants.
    pub fn from_parts(
        mut events: VecDeque<SecurityEvent>,
        mut metrics: SecurityMetrics,
        rate_limits: Vec<RateLimitEntry>,
        capacity: usize,
    ) -> Self {
        events.truncate(capacity);
        if metrics.is_locked && metrics.lockout_until.is_none() {
            metrics.is_locked = false;
        }
        if !metrics.is_locked {
            metrics.lockout_until = None;
        }
        let rate_limits = rate_limits
            .into_iter()
            .filter(|entry| !entry.attempts.is_empty())
            .map(|entry| {
                (
                    RateLimitKey {
                        identifier: entry.identifier,
                        action: entry.action,
                    },
                    entry.attempts,
                )
            })
            .collect();
        Self {
            events,
            metrics,
            rate_limits,
        }
    }

    pub fn metrics(&self) -> &SecurityMetrics {
        &self.metrics
    }

    pub fn events(&self) -> &VecDeque<SecurityEvent> {
        &self.events
    }

    pub fn recent_events(&self, limit: usize) -> Vec<SecurityEvent> {
        self.events.iter().take(limit).cloned().collect()
    }

    pub fn rate_limit_entries(&self) -> Vec<RateLimitEntry> {
        let mut entries: Vec<RateLimitEntry> = self
            .rate_limits
            .iter()
            .map(|(key, attempts)| RateLimitEntry {
                identifier: key.identifier.clone(),
                action: key.action.clone(),
                attempts: attempts.clone(),
            })
            .collect();
        entries.sort_by(|a, b| (&a.identifier, &a.action).cmp(&(&b.identifier, &b.action)));
        entries
    }

    /// Append an activity event, update counters and re-evaluate the policy.
    pub fn record(
        &mut self,
        now: i64,
        kind: SecurityEventKind,
        details: Option<Value>,
        settings: &PolicySettings,
    ) -> RecordOutcome {
        let mut outcome = RecordOutcome::default();
        if let LockCheck::Lifted(event) = self.check_lock(now, settings) {
            outcome.events.push(event);
        }

        outcome
            .events
            .push(self.push_event(now, kind, details, settings));

        if !self.metrics.is_locked {
            if let Some(violation) = self.evaluate(now, settings) {
                outcome.merge(self.raise_violation(now, violation, settings));
            }
        }
        outcome
    }

    /// Check the lock, lifting it when `now` is past `lockout_until`.
    pub fn check_lock(&mut self, now: i64, settings: &PolicySettings) -> LockCheck {
        if !self.metrics.is_locked {
            return LockCheck::Unlocked;
        }
        match self.metrics.lockout_until {
            Some(until) if now <= until => LockCheck::Locked { until },
            _ => match self.unlock(now, settings) {
                Some(event) => LockCheck::Lifted(event),
                None => LockCheck::Unlocked,
            },
        }
    }

    /// Milliseconds until the lock lifts, without lifting it.
    pub fn lockout_remaining(&self, now: i64) -> Option<i64> {
        match (self.metrics.is_locked, self.metrics.lockout_until) {
            (true, Some(until)) if now <= until => Some(until - now),
            _ => None,
        }
    }

    pub fn lock(&mut self, now: i64, duration_ms: i64, settings: &PolicySettings) -> SecurityEvent {
        let until = now.saturating_add(duration_ms.max(0));
        self.metrics.is_locked = true;
        self.metrics.lockout_until = Some(until);
        self.push_event(
            now,
            SecurityEventKind::AccountLocked,
            Some(json!({ "lockoutUntil": until })),
            settings,
        )
    }

    /// Clear the lock. Returns the unlock event, or `None` if nothing was locked.
    pub fn unlock(&mut self, now: i64, settings: &PolicySettings) -> Option<SecurityEvent> {
        let was_locked = self.metrics.is_locked;
        self.metrics.is_locked = false;
        self.metrics.lockout_until = None;
        if !was_locked {
            return None;
        }
        Some(self.push_event(now, SecurityEventKind::AccountUnlocked, None, settings))
    }

    /// Sliding-window limiter for `(identifier, action)`.
    pub fn check_rate_limit(
        &mut self,
        now: i64,
        identifier: &str,
        action: &str,
        settings: &PolicySettings,
    ) -> (RateLimitDecision, Option<RecordOutcome>) {
        let key = RateLimitKey {
            identifier: identifier.to_string(),
            action: action.to_string(),
        };
        let window_start = now - settings.rate_limit_window_ms;
        let attempts = self.rate_limits.entry(key).or_default();
        attempts.retain(|timestamp| *timestamp > window_start);

        if attempts.len() >= settings.rate_limit_max_attempts {
            let oldest = attempts.iter().copied().min().unwrap_or(now);
            let retry_after_ms = (oldest + settings.rate_limit_window_ms - now).max(0);
            let outcome = self.record(
                now,
                SecurityEventKind::RateLimitExceeded,
                Some(json!({ "identifier": identifier, "action": action })),
                settings,
            );
            return (RateLimitDecision::Denied { retry_after_ms }, Some(outcome));
        }

        attempts.push(now);
        let remaining = settings.rate_limit_max_attempts - attempts.len();
        (RateLimitDecision::Allowed { remaining }, None)
    }

    pub fn reset_rate_limit(&mut self, identifier: &str, action: &str) {
        self.rate_limits.remove(&RateLimitKey {
            identifier: identifier.to_string(),
            action: action.to_string(),
        });
    }

    /// Drop buckets whose attempts have all aged out.
    pub fn prune_rate_limits(&mut self, now: i64, settings: &PolicySettings) {
        let window_start = now - settings.rate_limit_window_ms;
        self.rate_limits.retain(|_, attempts| {
            attempts.retain(|timestamp| *timestamp > window_start);
            !attempts.is_empty()
        });
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Apply the suspicious-activity rules to the trailing window.
    ///
    /// Counting restarts at the most recent lock transition so activity from
    /// before (or during) a served lockout cannot immediately re-lock.
    pub fn evaluate(&self, now: i64, settings: &PolicySettings) -> Option<PolicyViolation> {
        let window_start = now - settings.suspicious_window_ms;
        let window: Vec<&SecurityEvent> = self
            .events
            .iter()
            .take_while(|event| !event.kind.is_lock_transition())
            .filter(|event| event.timestamp >= window_start && event.timestamp <= now)
            .collect();

        let failed = window
            .iter()
            .filter(|event| event.kind == SecurityEventKind::LoginFailure)
            .count();
        if failed >= settings.max_failed_logins {
            return Some(PolicyViolation::ExcessiveFailedLogins { count: failed });
        }

        let transactions = window
            .iter()
            .filter(|event| event.kind == SecurityEventKind::TransactionAttempt)
            .count();
        if transactions >= settings.max_transactions_per_window {
            return Some(PolicyViolation::ExcessiveTransactions {
                count: transactions,
            });
        }

        let activity: Vec<i64> = window
            .iter()
            .filter(|event| !event.kind.is_policy_generated())
            .map(|event| event.timestamp)
            .collect();
        let rapid = activity
            .windows(2)
            .filter(|pair| (pair[0] - pair[1]).abs() < settings.rapid_fire_interval_ms)
            .count();
        if rapid >= settings.rapid_fire_threshold {
            return Some(PolicyViolation::RapidFire { count: rapid });
        }

        None
    }

    fn raise_violation(
        &mut self,
        now: i64,
        violation: PolicyViolation,
        settings: &PolicySettings,
    ) -> RecordOutcome {
        let message = violation.describe();
        let suspicious = self.push_event(
            now,
            SecurityEventKind::SuspiciousActivity,
            Some(json!({ "violation": violation, "message": message })),
            settings,
        );
        let locked = self.lock(now, settings.lockout_ms(), settings);
        let lockout_until = self.metrics.lockout_until.unwrap_or(now);
        RecordOutcome {
            events: vec![suspicious, locked],
            alert: Some(SecurityAlert {
                violation,
                message,
                timestamp: now,
                lockout_until,
            }),
        }
    }

    fn push_event(
        &mut self,
        now: i64,
        kind: SecurityEventKind,
        details: Option<Value>,
        settings: &PolicySettings,
    ) -> SecurityEvent {
        let event = SecurityEvent {
            kind,
            timestamp: now,
            details,
        };
        self.events.push_front(event.clone());
        self.events.truncate(settings.event_log_capacity);

        match kind {
            SecurityEventKind::LoginSuccess => {
                self.metrics.login_attempts += 1;
                self.metrics.successful_logins += 1;
            }
            SecurityEventKind::LoginFailure => {
                self.metrics.login_attempts += 1;
                self.metrics.failed_logins += 1;
            }
            SecurityEventKind::TransactionAttempt => self.metrics.transactions_attempted += 1,
            SecurityEventKind::SuspiciousActivity => self.metrics.suspicious_activities += 1,
            SecurityEventKind::RateLimitExceeded
            | SecurityEventKind::AccountLocked
            | SecurityEventKind::AccountUnlocked => {}
        }
        self.metrics.last_activity = now;
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;
    const SECOND: i64 = 1_000;
    const MINUTE: i64 = 60 * SECOND;

    fn settings() -> PolicySettings {
        PolicySettings::default()
    }

    fn fail(state: &mut PolicyState, now: i64) -> RecordOutcome {
        state.record(now, SecurityEventKind::LoginFailure, None, &settings())
    }

    #[test]
    fn five_failures_in_window_lock_for_fifteen_minutes() {
        let mut state = PolicyState::new();
        for i in 0..4 {
            let outcome = fail(&mut state, T0 + i * 10 * SECOND);
            assert!(outcome.alert.is_none());
        }
        assert!(!state.metrics().is_locked);

        let now = T0 + 40 * SECOND;
        let outcome = fail(&mut state, now);
        let alert = outcome.alert.expect("fifth failure must alert");
        assert_eq!(
            alert.violation,
            PolicyViolation::ExcessiveFailedLogins { count: 5 }
        );
        assert_eq!(alert.lockout_until, now + 15 * MINUTE);
        assert!(state.metrics().is_locked);
        assert_eq!(state.metrics().lockout_until, Some(now + 15 * MINUTE));
        assert_eq!(state.metrics().suspicious_activities, 1);
        assert_eq!(state.metrics().failed_logins, 5);
        assert_eq!(state.metrics().login_attempts, 5);

        let kinds: Vec<_> = outcome.events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SecurityEventKind::LoginFailure,
                SecurityEventKind::SuspiciousActivity,
                SecurityEventKind::AccountLocked
            ]
        );
    }

    #[test]
    fn failures_spread_beyond_window_do_not_lock() {
        let mut state = PolicyState::new();
        for i in 0..8 {
            let outcome = fail(&mut state, T0 + i * 2 * MINUTE);
            assert!(outcome.alert.is_none(), "failure {} locked", i);
        }
        assert!(!state.metrics().is_locked);
    }

    #[test]
    fn lock_lifts_lazily_after_expiry() {
        let mut state = PolicyState::new();
        state.lock(T0, 15 * MINUTE, &settings());
        assert_eq!(
            state.check_lock(T0 + 15 * MINUTE, &settings()),
            LockCheck::Locked {
                until: T0 + 15 * MINUTE
            }
        );
        assert_eq!(state.lockout_remaining(T0 + 5 * MINUTE), Some(10 * MINUTE));

        match state.check_lock(T0 + 15 * MINUTE + 1, &settings()) {
            LockCheck::Lifted(event) => assert_eq!(event.kind, SecurityEventKind::AccountUnlocked),
            other => panic!("expected lifted lock, got {:?}", other),
        }
        assert!(!state.metrics().is_locked);
        assert_eq!(state.metrics().lockout_until, None);
        assert_eq!(state.check_lock(T0 + 16 * MINUTE, &settings()), LockCheck::Unlocked);
    }

    #[test]
    fn failures_before_lock_transition_are_not_recounted() {
        let mut state = PolicyState::new();
        for i in 0..5 {
            fail(&mut state, T0 + i * SECOND);
        }
        assert!(state.metrics().is_locked);
        state.unlock(T0 + 10 * SECOND, &settings());

        let outcome = state.record(
            T0 + 11 * SECOND,
            SecurityEventKind::LoginSuccess,
            None,
            &settings(),
        );
        assert!(outcome.alert.is_none());
        assert!(!state.metrics().is_locked);
    }

    #[test]
    fn no_re_evaluation_while_locked() {
        let mut state = PolicyState::new();
        for i in 0..5 {
            fail(&mut state, T0 + i * SECOND);
        }
        let until = state.metrics().lockout_until;
        let outcome = fail(&mut state, T0 + 6 * SECOND);
        assert!(outcome.alert.is_none());
        assert_eq!(state.metrics().lockout_until, until);
        assert_eq!(state.metrics().suspicious_activities, 1);
    }

    #[test]
    fn ten_transactions_in_window_lock() {
        let mut state = PolicyState::new();
        let mut last = RecordOutcome::default();
        for i in 0..10 {
            last = state.record(
                T0 + i * 40 * SECOND / 2,
                SecurityEventKind::TransactionAttempt,
                None,
                &settings(),
            );
            if i < 9 {
                assert!(last.alert.is_none(), "transaction {} locked early", i);
            }
        }
        assert_eq!(
            last.alert.map(|alert| alert.violation),
            Some(PolicyViolation::ExcessiveTransactions { count: 10 })
        );
    }

    #[test]
    fn rapid_fire_mixed_activity_locks() {
        let mut state = PolicyState::new();
        let kinds = [
            SecurityEventKind::LoginSuccess,
            SecurityEventKind::TransactionAttempt,
            SecurityEventKind::RateLimitExceeded,
        ];
        let mut alert = None;
        for i in 0..11 {
            let outcome = state.record(T0 + i * SECOND, kinds[i as usize % 3], None, &settings());
            if outcome.alert.is_some() {
                alert = outcome.alert;
                assert_eq!(i, 10, "rapid fire must trip on the tenth rapid pair");
            }
        }
        assert_eq!(
            alert.map(|alert| alert.violation),
            Some(PolicyViolation::RapidFire { count: 10 })
        );
    }

    #[test]
    fn event_log_is_capped_oldest_first() {
        let mut custom = settings();
        custom.event_log_capacity = 3;
        custom.rapid_fire_threshold = 100;
        let mut state = PolicyState::new();
        for i in 0..5 {
            state.record(T0 + i * MINUTE, SecurityEventKind::LoginSuccess, None, &custom);
        }
        let timestamps: Vec<i64> = state.events().iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![T0 + 4 * MINUTE, T0 + 3 * MINUTE, T0 + 2 * MINUTE]);
        assert_eq!(state.metrics().successful_logins, 5);
    }

    #[test]
    fn rate_limit_allows_three_then_denies_until_window_slides() {
        let mut state = PolicyState::new();
        let s = settings();
        for i in 0..3 {
            let (decision, record) = state.check_rate_limit(T0 + i * SECOND, "0xabc", "send", &s);
            assert!(decision.is_allowed());
            assert!(record.is_none());
        }

        let (decision, record) = state.check_rate_limit(T0 + 3 * SECOND, "0xabc", "send", &s);
        assert_eq!(
            decision,
            RateLimitDecision::Denied {
                retry_after_ms: 5 * MINUTE - 3 * SECOND
            }
        );
        let record = record.expect("denial is recorded");
        assert_eq!(record.events[0].kind, SecurityEventKind::RateLimitExceeded);

        // Other keys are independent.
        assert!(state
            .check_rate_limit(T0 + 3 * SECOND, "0xabc", "login", &s)
            .0
            .is_allowed());

        let (decision, _) = state.check_rate_limit(T0 + 5 * MINUTE + 1, "0xabc", "send", &s);
        assert!(decision.is_allowed());
    }

    #[test]
    fn from_parts_repairs_inconsistent_lock() {
        let metrics = SecurityMetrics {
            is_locked: true,
            lockout_until: None,
            ..SecurityMetrics::default()
        };
        let state = PolicyState::from_parts(VecDeque::new(), metrics, Vec::new(), 1000);
        assert!(!state.metrics().is_locked);
    }

    #[test]
    fn event_serialization_uses_type_tag() {
        let event = SecurityEvent {
            kind: SecurityEventKind::LoginFailure,
            timestamp: T0,
            details: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "LOGIN_FAILURE");
        assert!(value.get("details").is_none());
    }
}
