//! Disk encryption gate.
//!
//! Captures the passphrase for automatic layouts and evaluates the password
//! rules after every update, the way the encryption step does on each
//! keystroke. Strength classification is delegated to a `StrengthEstimator`.
//!
//! # Security Model
//!
//! Passphrases live in `Passphrase`, whose `Debug` output never contains the
//! secret. Nothing in this module logs a passphrase, only its length.

use std::fmt;
use std::sync::Arc;

use crate::config_file::DEFAULT_PASSWORD_MIN_LENGTH;
use crate::types::{PasswordStrength, RuleState};

/// A secret passphrase.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passphrase(<redacted, {} chars>)", self.len())
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Passphrase {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Pluggable password strength policy.
pub trait StrengthEstimator: Send + Sync {
    fn estimate(&self, password: &str) -> PasswordStrength;
}

/// Default estimator: scores length and character-class variety.
///
/// | Score | Bucket |
/// |-------|--------|
/// | 0-2   | weak   |
/// | 3-4   | medium |
/// | 5+    | strong |
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicStrengthEstimator;

impl StrengthEstimator for HeuristicStrengthEstimator {
    fn estimate(&self, password: &str) -> PasswordStrength {
        let len = password.chars().count();
        let mut score = match len {
            0..=7 => 0,
            8..=11 => 1,
            12..=15 => 2,
            _ => 3,
        };

        let classes = [
            password.chars().any(|c| c.is_lowercase()),
            password.chars().any(|c| c.is_uppercase()),
            password.chars().any(|c| c.is_ascii_digit()),
            password.chars().any(|c| !c.is_alphanumeric()),
        ];
        score += classes.iter().filter(|&&present| present).count().saturating_sub(1);

        // A single repeated character carries almost no entropy
        let mut chars = password.chars();
        if let Some(first) = chars.next() {
            if chars.all(|c| c == first) {
                score = 0;
            }
        }

        match score {
            0..=2 => PasswordStrength::Weak,
            3..=4 => PasswordStrength::Medium,
            _ => PasswordStrength::Strong,
        }
    }
}

/// Current state of both password rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PasswordRules {
    /// Minimum length rule
    pub length: RuleState,
    /// Password and confirmation match
    pub matches: RuleState,
}

impl PasswordRules {
    pub fn all_satisfied(&self) -> bool {
        self.length == RuleState::Success && self.matches == RuleState::Success
    }
}

/// Encryption settings of an automatic layout.
#[derive(Clone)]
pub struct EncryptionGate {
    enabled: bool,
    password: Passphrase,
    confirm: Passphrase,
    min_length: usize,
    estimator: Arc<dyn StrengthEstimator>,
}

impl fmt::Debug for EncryptionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionGate")
            .field("enabled", &self.enabled)
            .field("password", &self.password)
            .field("confirm", &self.confirm)
            .field("min_length", &self.min_length)
            .finish()
    }
}

impl Default for EncryptionGate {
    fn default() -> Self {
        Self::new(DEFAULT_PASSWORD_MIN_LENGTH, Arc::new(HeuristicStrengthEstimator))
    }
}

impl EncryptionGate {
    pub fn new(min_length: usize, estimator: Arc<dyn StrengthEstimator>) -> Self {
        Self {
            enabled: false,
            password: Passphrase::default(),
            confirm: Passphrase::default(),
            min_length,
            estimator,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        tracing::info!("Disk encryption {}", if enabled { "enabled" } else { "disabled" });
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_password(&mut self, password: impl Into<Passphrase>) {
        self.password = password.into();
        tracing::debug!("Encryption password updated ({} chars)", self.password.len());
    }

    pub fn set_password_confirm(&mut self, password: impl Into<Passphrase>) {
        self.confirm = password.into();
        tracing::debug!("Encryption password confirmation updated ({} chars)", self.confirm.len());
    }

    /// The captured passphrase, if encryption is enabled and the rules pass.
    pub fn passphrase(&self) -> Option<&Passphrase> {
        (self.enabled && self.rules().all_satisfied()).then_some(&self.password)
    }

    /// Evaluate both rules against the current input.
    pub fn rules(&self) -> PasswordRules {
        let length = if self.password.is_empty() {
            RuleState::Indeterminate
        } else if self.password.len() < self.min_length {
            RuleState::Error
        } else {
            RuleState::Success
        };

        let matches = if self.password.is_empty() || self.confirm.is_empty() {
            RuleState::Indeterminate
        } else if self.password == self.confirm {
            RuleState::Success
        } else {
            RuleState::Error
        };

        PasswordRules { length, matches }
    }

    /// Strength bucket, only defined once both rules succeed.
    pub fn strength(&self) -> Option<PasswordStrength> {
        self.rules()
            .all_satisfied()
            .then(|| self.estimator.estimate(self.password.as_str()))
    }

    /// Why forward navigation is blocked, if it is.
    pub fn blocking_reason(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let rules = self.rules();
        if rules.length != RuleState::Success {
            return Some(format!(
                "The passphrase must be at least {} characters long.",
                self.min_length
            ));
        }
        if rules.matches != RuleState::Success {
            return Some("The passphrases must match.".to_string());
        }
        None
    }

    /// Restore defaults: disabled, empty fields, indeterminate rules.
    pub fn reset(&mut self) {
        self.enabled = false;
        self.password = Passphrase::default();
        self.confirm = Passphrase::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passphrase_debug_is_redacted() {
        let p = Passphrase::from("hunter22");
        let debug = format!("{:?}", p);
        assert!(!debug.contains("hunter22"));
        assert!(debug.contains("8 chars"));
    }

    #[test]
    fn test_rules_start_indeterminate() {
        let gate = EncryptionGate::default();
        assert_eq!(gate.rules(), PasswordRules::default());
        assert_eq!(gate.strength(), None);
    }

    #[test]
    fn test_rule_progression() {
        let mut gate = EncryptionGate::default();
        gate.set_enabled(true);

        gate.set_password("abcd");
        assert_eq!(gate.rules().length, RuleState::Error);
        assert_eq!(gate.strength(), None);

        gate.set_password("abcdefgh");
        gate.set_password_confirm("abcdefg");
        assert_eq!(gate.rules().length, RuleState::Success);
        assert_eq!(gate.rules().matches, RuleState::Error);
        assert!(gate.blocking_reason().is_some());

        gate.set_password_confirm("abcdefgh");
        assert!(gate.rules().all_satisfied());
        assert_eq!(gate.strength(), Some(PasswordStrength::Weak));
        assert!(gate.blocking_reason().is_none());
        assert!(gate.passphrase().is_some());
    }

    #[test]
    fn test_disabled_gate_never_blocks() {
        let mut gate = EncryptionGate::default();
        gate.set_password("abc");
        assert!(gate.blocking_reason().is_none());
        assert!(gate.passphrase().is_none());
    }

    #[test]
    fn test_heuristic_buckets() {
        let est = HeuristicStrengthEstimator;
        assert_eq!(est.estimate("abcdefgh"), PasswordStrength::Weak);
        assert_eq!(est.estimate("aaaaaaaaaaaaaaaaaaaa"), PasswordStrength::Weak);
        assert_eq!(est.estimate("abcdefgh1234"), PasswordStrength::Medium);
        assert_eq!(est.estimate("Rf4gWi8!nl@p"), PasswordStrength::Strong);
    }

    #[test]
    fn test_custom_estimator() {
        struct AlwaysStrong;
        impl StrengthEstimator for AlwaysStrong {
            fn estimate(&self, _: &str) -> PasswordStrength {
                PasswordStrength::Strong
            }
        }

        let mut gate = EncryptionGate::new(4, Arc::new(AlwaysStrong));
        gate.set_enabled(true);
        gate.set_password("abcd");
        gate.set_password_confirm("abcd");
        assert_eq!(gate.strength(), Some(PasswordStrength::Strong));
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut gate = EncryptionGate::default();
        gate.set_enabled(true);
        gate.set_password("abcdefgh");
        gate.set_password_confirm("abcdefgh");
        gate.reset();
        assert!(!gate.is_enabled());
        assert_eq!(gate.rules(), PasswordRules::default());
    }
}
