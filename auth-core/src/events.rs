use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::AuthError;
use crate::policy::{SecurityAlert, SecurityEvent};
use crate::session::AuthUser;

/// Notification channels exposed to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Authenticated,
    LoggedOut,
    SecurityEvent,
    SecurityAlert,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogoutReason {
    UserRequested,
    AccountChanged,
    WalletDisconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    Authenticated {
        user: AuthUser,
    },
    LoggedOut {
        address: String,
        reason: LogoutReason,
    },
    SecurityEvent(SecurityEvent),
    SecurityAlert(SecurityAlert),
    Error {
        error: AuthError,
        context: &'static str,
    },
}

impl AuthEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AuthEvent::Authenticated { .. } => EventKind::Authenticated,
            AuthEvent::LoggedOut { .. } => EventKind::LoggedOut,
            AuthEvent::SecurityEvent(_) => EventKind::SecurityEvent,
            AuthEvent::SecurityAlert(_) => EventKind::SecurityAlert,
            AuthEvent::Error { .. } => EventKind::Error,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&AuthEvent) + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    kind: EventKind,
    handler: EventHandler,
}

/// Observer list shared by the authenticator and the policy engine.
///
/// Handlers run synchronously in registration order. A panicking handler is
/// contained and logged; the remaining handlers still run.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Listener>>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&AuthEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.sequence.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push(Listener {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a listener. Returns `false` if it was not registered for `kind`.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|listener| !(listener.id == id && listener.kind == kind));
        listeners.len() != before
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|listener| listener.kind == kind)
            .count()
    }

    pub fn emit(&self, event: &AuthEvent) {
        let kind = event.kind();
        // Snapshot so handlers may register or remove listeners re-entrantly.
        let handlers: Vec<EventHandler> = self
            .listeners
            .lock()
            .iter()
            .filter(|listener| listener.kind == kind)
            .map(|listener| Arc::clone(&listener.handler))
            .collect();

        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("{:?} listener panicked: {}", kind, reason);
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}
