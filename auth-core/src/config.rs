use crate::errors::{AuthError, AuthenticatorResult};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const KEY_LOG_LEVEL: &str = "LOG_LEVEL";
pub const KEY_CHALLENGE_EXPIRY_SECONDS: &str = "CHALLENGE_EXPIRY_SECONDS";
pub const KEY_SESSION_DURATION_HOURS: &str = "SESSION_DURATION_HOURS";
pub const KEY_LOCKOUT_MINUTES: &str = "LOCKOUT_MINUTES";
pub const KEY_SUSPICIOUS_WINDOW_SECONDS: &str = "SUSPICIOUS_WINDOW_SECONDS";
pub const KEY_MAX_FAILED_LOGINS: &str = "MAX_FAILED_LOGINS";
pub const KEY_MAX_TRANSACTIONS_PER_WINDOW: &str = "MAX_TRANSACTIONS_PER_WINDOW";
pub const KEY_RAPID_FIRE_INTERVAL_SECONDS: &str = "RAPID_FIRE_INTERVAL_SECONDS";
pub const KEY_RAPID_FIRE_THRESHOLD: &str = "RAPID_FIRE_THRESHOLD";
pub const KEY_RATE_LIMIT_MAX_ATTEMPTS: &str = "RATE_LIMIT_MAX_ATTEMPTS";
pub const KEY_RATE_LIMIT_WINDOW_SECONDS: &str = "RATE_LIMIT_WINDOW_SECONDS";
pub const KEY_MAX_TRANSACTION_VALUE: &str = "MAX_TRANSACTION_VALUE";
pub const KEY_EVENT_LOG_CAPACITY: &str = "EVENT_LOG_CAPACITY";

/// Policy defaults shared by every environment.
const POLICY_DEFAULTS: [(&str, &str); 12] = [
    (KEY_CHALLENGE_EXPIRY_SECONDS, "300"),
    (KEY_SESSION_DURATION_HOURS, "24"),
    (KEY_LOCKOUT_MINUTES, "15"),
    (KEY_SUSPICIOUS_WINDOW_SECONDS, "300"),
    (KEY_MAX_FAILED_LOGINS, "5"),
    (KEY_MAX_TRANSACTIONS_PER_WINDOW, "10"),
    (KEY_RAPID_FIRE_INTERVAL_SECONDS, "30"),
    (KEY_RAPID_FIRE_THRESHOLD, "10"),
    (KEY_RATE_LIMIT_MAX_ATTEMPTS, "3"),
    (KEY_RATE_LIMIT_WINDOW_SECONDS, "300"),
    (KEY_MAX_TRANSACTION_VALUE, "1000"),
    (KEY_EVENT_LOG_CAPACITY, "1000"),
];

/// Environment types for different security configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" | "testing" => Environment::Test,
            _ => Environment::Development,
        }
    }
}

/// Security configuration manager
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    environment: Environment,
    config_map: HashMap<String, String>,
}

impl SecurityConfig {
    /// Create a configuration populated with the defaults for `environment`.
    pub fn new(environment: Environment) -> Self {
        let mut config = SecurityConfig {
            environment,
            config_map: HashMap::new(),
        };
        config.load_defaults();
        config
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let environment = std::env::var("REMIT_ENVIRONMENT")
            .map(|value| Environment::parse(&value))
            .unwrap_or(Environment::Development);
        Self::from_environment(environment)
    }

    /// Construct a configuration for the provided environment and apply overrides.
    pub fn from_environment(environment: Environment) -> Self {
        let mut config = Self::new(environment);
        config.load_from_env_vars();
        config
    }

    /// Get a configuration value
    pub fn get(&self, key: &str) -> Option<&String> {
        self.config_map.get(key)
    }

    /// Get a required configuration value
    pub fn get_required(&self, key: &str) -> AuthenticatorResult<&String> {
        self.config_map.get(key).ok_or_else(|| {
            AuthError::ValidationError(format!("Required config key '{}' not found", key))
        })
    }

    /// Retrieve an unsigned 32-bit value with a default fallback.
    pub fn get_u32_with_default(&self, key: &str, default: u32) -> AuthenticatorResult<u32> {
        debug_assert!(!key.is_empty(), "configuration key must not be empty");
        match self.config_map.get(key) {
            Some(value) => parse_u32_value(value, key),
            None => Ok(default),
        }
    }

    /// Retrieve a positive decimal value with a default fallback.
    pub fn get_f64_with_default(&self, key: &str, default: f64) -> AuthenticatorResult<f64> {
        match self.config_map.get(key) {
            Some(value) => parse_positive_f64(value, key),
            None => Ok(default),
        }
    }

    /// Configured log verbosity.
    pub fn log_level(&self) -> AuthenticatorResult<LevelFilter> {
        let raw = self.get_required(KEY_LOG_LEVEL)?;
        raw.trim().parse::<LevelFilter>().map_err(|_| {
            AuthError::ValidationError(format!("Invalid log level '{}'", raw))
        })
    }

    /// Set a configuration value (for testing purposes)
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.config_map.insert(key.into(), value.into());
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Validate that every policy key is present and parses.
    pub fn validate_required_configs(&self) -> AuthenticatorResult<()> {
        self.log_level()?;
        for (key, _) in POLICY_DEFAULTS {
            let value = self.get_required(key).map_err(|_| {
                AuthError::ValidationError(format!(
                    "Required configuration key '{}' is missing for {} environment",
                    key,
                    format!("{:?}", self.environment).to_lowercase()
                ))
            })?;
            if key == KEY_MAX_TRANSACTION_VALUE {
                parse_positive_f64(value, key)?;
            } else {
                parse_u32_value(value, key)?;
            }
        }
        Ok(())
    }

    fn load_defaults(&mut self) {
        for (key, value) in POLICY_DEFAULTS {
            self.config_map.insert(key.to_string(), value.to_string());
        }

        let log_level = match self.environment {
            Environment::Production => "INFO",
            Environment::Development => "DEBUG",
            Environment::Test => "WARN",
        };
        self.config_map
            .insert(KEY_LOG_LEVEL.to_string(), log_level.to_string());
    }

    fn load_from_env_vars(&mut self) {
        let env_mappings = [
            ("REMIT_LOG_LEVEL", KEY_LOG_LEVEL),
            ("REMIT_CHALLENGE_EXPIRY_SECONDS", KEY_CHALLENGE_EXPIRY_SECONDS),
            ("REMIT_SESSION_DURATION_HOURS", KEY_SESSION_DURATION_HOURS),
            ("REMIT_LOCKOUT_MINUTES", KEY_LOCKOUT_MINUTES),
            ("REMIT_SUSPICIOUS_WINDOW_SECONDS", KEY_SUSPICIOUS_WINDOW_SECONDS),
            ("REMIT_MAX_FAILED_LOGINS", KEY_MAX_FAILED_LOGINS),
            (
                "REMIT_MAX_TRANSACTIONS_PER_WINDOW",
                KEY_MAX_TRANSACTIONS_PER_WINDOW,
            ),
            (
                "REMIT_RAPID_FIRE_INTERVAL_SECONDS",
                KEY_RAPID_FIRE_INTERVAL_SECONDS,
            ),
            ("REMIT_RAPID_FIRE_THRESHOLD", KEY_RAPID_FIRE_THRESHOLD),
            ("REMIT_RATE_LIMIT_MAX_ATTEMPTS", KEY_RATE_LIMIT_MAX_ATTEMPTS),
            ("REMIT_RATE_LIMIT_WINDOW_SECONDS", KEY_RATE_LIMIT_WINDOW_SECONDS),
            ("REMIT_MAX_TRANSACTION_VALUE", KEY_MAX_TRANSACTION_VALUE),
            ("REMIT_EVENT_LOG_CAPACITY", KEY_EVENT_LOG_CAPACITY),
        ];

        for (env_var, config_key) in &env_mappings {
            if let Ok(value) = std::env::var(env_var) {
                if value.trim().is_empty() {
                    log::warn!("Environment variable {} is empty", env_var);
                    continue;
                }

                if value.chars().any(|c| c.is_control()) {
                    log::warn!(
                        "Environment variable {} contains control characters, ignoring",
                        env_var
                    );
                    continue;
                }

                self.config_map.insert(config_key.to_string(), value);
                log::debug!(
                    "Loaded configuration {} from environment variable {}",
                    config_key,
                    env_var
                );
            }
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self::new(Environment::Development)
    }
}

fn parse_u32_value(value: &str, key: &str) -> AuthenticatorResult<u32> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AuthError::ValidationError(format!(
            "Configuration key '{}' cannot be empty",
            key
        )));
    }

    trimmed.parse::<u32>().map_err(|_| {
        AuthError::ValidationError(format!(
            "Invalid numeric value '{}' for key '{}'",
            value, key
        ))
    })
}

fn parse_positive_f64(value: &str, key: &str) -> AuthenticatorResult<f64> {
    let parsed = value.trim().parse::<f64>().map_err(|_| {
        AuthError::ValidationError(format!(
            "Invalid decimal value '{}' for key '{}'",
            value, key
        ))
    })?;
    if !parsed.is_finite() || parsed <= 0.0 {
        return Err(AuthError::ValidationError(format!(
            "Configuration key '{}' must be a positive number",
            key
        )));
    }
    Ok(parsed)
}

/// Typed thresholds consumed by the security policy engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySettings {
    pub suspicious_window_ms: i64,
    pub max_failed_logins: usize,
    pub max_transactions_per_window: usize,
    pub rapid_fire_interval_ms: i64,
    pub rapid_fire_threshold: usize,
    pub lockout_minutes: u32,
    pub rate_limit_max_attempts: usize,
    pub rate_limit_window_ms: i64,
    pub max_transaction_value: f64,
    pub event_log_capacity: usize,
}

impl PolicySettings {
    pub fn from_config(config: &SecurityConfig) -> AuthenticatorResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            suspicious_window_ms: seconds_to_ms(
                config.get_u32_with_default(KEY_SUSPICIOUS_WINDOW_SECONDS, 300)?,
            ),
            max_failed_logins: config
                .get_u32_with_default(KEY_MAX_FAILED_LOGINS, 5)?
                .max(1) as usize,
            max_transactions_per_window: config
                .get_u32_with_default(KEY_MAX_TRANSACTIONS_PER_WINDOW, 10)?
                .max(1) as usize,
            rapid_fire_interval_ms: seconds_to_ms(
                config.get_u32_with_default(KEY_RAPID_FIRE_INTERVAL_SECONDS, 30)?,
            ),
            rapid_fire_threshold: config
                .get_u32_with_default(KEY_RAPID_FIRE_THRESHOLD, 10)?
                .max(1) as usize,
            lockout_minutes: config.get_u32_with_default(KEY_LOCKOUT_MINUTES, 15)?.max(1),
            rate_limit_max_attempts: config
                .get_u32_with_default(KEY_RATE_LIMIT_MAX_ATTEMPTS, 3)?
                .max(1) as usize,
            rate_limit_window_ms: seconds_to_ms(
                config.get_u32_with_default(KEY_RATE_LIMIT_WINDOW_SECONDS, 300)?,
            ),
            max_transaction_value: config
                .get_f64_with_default(KEY_MAX_TRANSACTION_VALUE, defaults.max_transaction_value)?,
            event_log_capacity: config
                .get_u32_with_default(KEY_EVENT_LOG_CAPACITY, 1000)?
                .clamp(1, 100_000) as usize,
        })
    }

    pub fn lockout_ms(&self) -> i64 {
        minutes_to_ms(self.lockout_minutes)
    }
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            suspicious_window_ms: 5 * 60 * 1000,
            max_failed_logins: 5,
            max_transactions_per_window: 10,
            rapid_fire_interval_ms: 30 * 1000,
            rapid_fire_threshold: 10,
            lockout_minutes: 15,
            rate_limit_max_attempts: 3,
            rate_limit_window_ms: 5 * 60 * 1000,
            max_transaction_value: 1000.0,
            event_log_capacity: 1000,
        }
    }
}

/// Typed lifetimes consumed by the session authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub challenge_expiry_ms: i64,
    pub session_duration_ms: i64,
}

impl SessionSettings {
    pub fn from_config(config: &SecurityConfig) -> AuthenticatorResult<Self> {
        let challenge_secs = config
            .get_u32_with_default(KEY_CHALLENGE_EXPIRY_SECONDS, 300)?
            .max(1);
        let session_hours = config
            .get_u32_with_default(KEY_SESSION_DURATION_HOURS, 24)?
            .max(1);
        Ok(Self {
            challenge_expiry_ms: seconds_to_ms(challenge_secs),
            session_duration_ms: minutes_to_ms(session_hours.saturating_mul(60)),
        })
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            challenge_expiry_ms: 5 * 60 * 1000,
            session_duration_ms: 24 * 60 * 60 * 1000,
        }
    }
}

fn seconds_to_ms(seconds: u32) -> i64 {
    i64::from(seconds.max(1)) * 1000
}

pub(crate) fn minutes_to_ms(minutes: u32) -> i64 {
    i64::from(minutes) * 60 * 1000
}
