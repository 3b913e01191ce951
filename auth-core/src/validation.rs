use crate::errors::{AuthError, AuthenticatorResult};
use regex::Regex;
use std::collections::HashSet;

/// Externally supplied list of addresses the wallet must refuse to interact with.
pub trait AddressDenyList: Send + Sync {
    fn is_denied(&self, address: &str) -> bool;
}

/// Fixed deny-list, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaticDenyList {
    addresses: HashSet<String>,
}

impl StaticDenyList {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            addresses: addresses
                .into_iter()
                .map(|address| address.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl AddressDenyList for StaticDenyList {
    fn is_denied(&self, address: &str) -> bool {
        self.addresses
            .contains(&address.trim().to_ascii_lowercase())
    }
}

/// Input validation for addresses and transfer amounts
#[derive(Debug, Clone)]
pub struct InputValidator {
    address_pattern: Regex,
    amount_pattern: Regex,

    // Blocked patterns for injected markup
    malicious_patterns: Vec<Regex>,
}

impl InputValidator {
    pub fn new() -> AuthenticatorResult<Self> {
        let address_pattern = Regex::new(r"^0x[a-fA-F0-9]{40}$")
            .map_err(|e| AuthError::ValidationError(format!("Invalid address regex: {}", e)))?;

        let amount_pattern = Regex::new(r"^\d+(\.\d{1,18})?$")
            .map_err(|e| AuthError::ValidationError(format!("Invalid amount regex: {}", e)))?;

        let malicious_patterns = [
            r"<script",
            r"javascript:",
            r"data:text/html",
            r"vbscript:",
            r"onload=",
            r"onerror=",
        ]
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| {
                AuthError::ValidationError(format!("Invalid security pattern: {}", e))
            })
        })
        .collect::<AuthenticatorResult<Vec<_>>>()?;

        Ok(InputValidator {
            address_pattern,
            amount_pattern,
            malicious_patterns,
        })
    }

    /// Validate the format of an EVM address
    pub fn validate_address(&self, address: &str) -> AuthenticatorResult<()> {
        self.check_basic_security(address)?;

        if address.is_empty() {
            return Err(AuthError::ValidationError(
                "Address cannot be empty".to_string(),
            ));
        }

        if address.len() > 100 {
            return Err(AuthError::ValidationError("Address too long".to_string()));
        }

        if !self.address_pattern.is_match(address) {
            return Err(AuthError::ValidationError(
                "Address format is invalid".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate a decimal amount and return its numeric value
    pub fn validate_amount(&self, amount: &str) -> AuthenticatorResult<f64> {
        let amount = amount.trim();
        self.check_basic_security(amount)?;

        if amount.is_empty() {
            return Err(AuthError::ValidationError(
                "Amount cannot be empty".to_string(),
            ));
        }

        if !self.amount_pattern.is_match(amount) {
            return Err(AuthError::ValidationError(
                "Amount format is invalid".to_string(),
            ));
        }

        let parsed: f64 = amount
            .parse()
            .map_err(|_| AuthError::ValidationError("Invalid number format".to_string()))?;

        if parsed <= 0.0 {
            return Err(AuthError::ValidationError(
                "Amount must be positive".to_string(),
            ));
        }

        Ok(parsed)
    }

    fn check_basic_security(&self, input: &str) -> AuthenticatorResult<()> {
        if input.len() > 1000 {
            return Err(AuthError::ValidationError("Input too long".to_string()));
        }

        let lowered = input.to_lowercase();
        if self
            .malicious_patterns
            .iter()
            .any(|pattern| pattern.is_match(&lowered))
        {
            return Err(AuthError::ValidationError(
                "Input contains potentially malicious content".to_string(),
            ));
        }

        Ok(())
    }
}
