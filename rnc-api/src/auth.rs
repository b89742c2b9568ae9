//! Quality Authentication
//!
//! Every operation that writes a case (opening, importing, closing,
//! reopening, cancelling, deleting) is reserved to the quality team,
//! identified by a shared password. A successful login yields a
//! [`QualityAccess`] token and each of those operations takes one by
//! reference, so holding the token is the only way to reach them.

use rnc_core::AuthError;
use secrecy::{ExposeSecret, SecretString};

// ============================================================================
// QUALITY PASSWORD (TYPE-SAFE)
// ============================================================================

/// Shared password that prevents accidental logging.
#[derive(Clone)]
pub struct QualityPassword(SecretString);

impl QualityPassword {
    /// Blank values count as "not configured".
    pub fn new(password: String) -> Option<Self> {
        if password.trim().is_empty() {
            return None;
        }
        Some(Self(SecretString::new(password.into())))
    }

    fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    fn matches(&self, attempt: &str) -> bool {
        constant_time_eq(self.0.expose_secret().as_bytes(), attempt.as_bytes())
    }
}

impl std::fmt::Debug for QualityPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "QualityPassword([REDACTED, {} chars])", self.len())
    }
}

// ============================================================================
// CAPABILITY TOKEN
// ============================================================================

/// Proof of a successful quality login.
///
/// Only [`QualityGate::authenticate`] creates one.
#[derive(Debug)]
pub struct QualityAccess {
    _private: (),
}

// ============================================================================
// GATE
// ============================================================================

/// Checks password attempts against the configured quality password.
///
/// A gate without a password refuses every attempt.
#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    password: Option<QualityPassword>,
}

impl QualityGate {
    pub fn new(password: Option<QualityPassword>) -> Self {
        Self { password }
    }

    /// Gate configured from a plain string, as read from the environment.
    pub fn with_password(password: impl Into<String>) -> Self {
        Self::new(QualityPassword::new(password.into()))
    }

    pub fn is_configured(&self) -> bool {
        self.password.is_some()
    }

    pub fn authenticate(&self, attempt: &str) -> Result<QualityAccess, AuthError> {
        let Some(password) = &self.password else {
            tracing::warn!("Quality login attempted but no password is configured");
            return Err(AuthError::NotConfigured);
        };
        if !password.matches(attempt) {
            tracing::warn!("Quality login rejected");
            return Err(AuthError::InvalidPassword);
        }
        tracing::info!("Quality login accepted");
        Ok(QualityAccess { _private: () })
    }
}

fn constant_time_eq(expected: &[u8], attempt: &[u8]) -> bool {
    if expected.len() != attempt.len() {
        return false;
    }
    expected
        .iter()
        .zip(attempt)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_password_grants_access() {
        let gate = QualityGate::with_password("segredo");
        assert!(gate.is_configured());
        assert!(gate.authenticate("segredo").is_ok());
    }

    #[test]
    fn test_wrong_password_is_rejected() {
        let gate = QualityGate::with_password("segredo");
        assert_eq!(
            gate.authenticate("Segredo").unwrap_err(),
            AuthError::InvalidPassword
        );
        assert_eq!(gate.authenticate("").unwrap_err(), AuthError::InvalidPassword);
        assert_eq!(
            gate.authenticate("segredo ").unwrap_err(),
            AuthError::InvalidPassword
        );
    }

    #[test]
    fn test_unconfigured_gate_refuses_everything() {
        let gate = QualityGate::default();
        assert!(!gate.is_configured());
        assert_eq!(gate.authenticate("").unwrap_err(), AuthError::NotConfigured);
        assert_eq!(
            gate.authenticate("anything").unwrap_err(),
            AuthError::NotConfigured
        );
    }

    #[test]
    fn test_blank_password_is_not_configured() {
        assert!(QualityPassword::new("   ".to_string()).is_none());
        assert!(!QualityGate::with_password("").is_configured());
    }

    #[test]
    fn test_debug_redacts_password() {
        let gate = QualityGate::with_password("segredo");
        let debug = format!("{:?}", gate);
        assert!(!debug.contains("segredo"));
        assert!(debug.contains("REDACTED"));
    }
}
