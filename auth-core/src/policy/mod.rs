pub mod engine;
pub mod state;

pub use engine::SecurityPolicyEngine;
pub use state::{
    LockCheck, PolicyState, PolicyViolation, RateLimitDecision, RateLimitEntry, RecordOutcome,
    SecurityAlert, SecurityEvent, SecurityEventKind, SecurityMetrics,
};
