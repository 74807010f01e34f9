//! Error Types
//!
//! Three layers: [`BackendError`] for anything a positioning backend
//! reports, [`BridgeError`] for structural problems surfaced from
//! `init()`, and [`BridgeFault`], the `{code, message}` payload handed to
//! the consumer's `on_error`.

use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Stable error codes reported through `on_error`.
pub mod codes {
    /// Bounded-retry recovery gave up.
    pub const RECOVERY_FAILED: &str = "RECOVERY_FAILED";
    /// Location permission denied.
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    /// Positioning hardware or service unavailable.
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
    /// Backend did not answer in time.
    pub const TIMEOUT: &str = "TIMEOUT";
    /// Native consent calls were refused.
    pub const CONSENT_REQUIRED: &str = "CONSENT_REQUIRED";
    /// Native client was force-destroyed after an unconfirmed stop.
    pub const FORCE_DESTROY: &str = "FORCE_DESTROY";
    /// Backend failure without a more specific code.
    pub const BACKEND: &str = "BACKEND";
}

/// Failures reported by a positioning backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The user or OS denied location access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Positioning hardware or service unavailable.
    #[error("positioning unavailable: {0}")]
    Unavailable(String),
    /// No answer within the requested time.
    #[error("timed out")]
    Timeout,
    /// Consent calls were refused or failed.
    #[error("consent required: {0}")]
    ConsentRequired(String),
    /// Native plugin error with its vendor code.
    #[error("native error {code}: {message}")]
    Native {
        /// Vendor error code.
        code: i32,
        /// Vendor message.
        message: String,
    },
    /// The backend was reset and no longer accepts calls for this session.
    #[error("backend reset")]
    Reset,
}

impl BackendError {
    /// Stable `on_error` code.
    pub fn code(&self) -> String {
        match self {
            BackendError::PermissionDenied(_) => codes::PERMISSION_DENIED.to_string(),
            BackendError::Unavailable(_) => codes::UNAVAILABLE.to_string(),
            BackendError::Timeout => codes::TIMEOUT.to_string(),
            BackendError::ConsentRequired(_) => codes::CONSENT_REQUIRED.to_string(),
            BackendError::Native { code, .. } => format!("NATIVE_{code}"),
            BackendError::Reset => codes::FORCE_DESTROY.to_string(),
        }
    }

    /// Hard failures cross the public boundary; everything else is routine
    /// sensor unreliability absorbed by the bridge.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            BackendError::PermissionDenied(_)
                | BackendError::Unavailable(_)
                | BackendError::ConsentRequired(_)
        )
    }
}

/// Structural bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Neither backend can be used on this platform.
    #[error("no positioning backend available")]
    NoBackend,
    /// The bridge was destroyed.
    #[error("bridge destroyed")]
    Destroyed,
    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The only usable backend failed to come up.
    #[error("backend failed to start: {0}")]
    Backend(#[from] BackendError),
}

/// `on_error` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeFault {
    /// Stable code, see [`codes`].
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl BridgeFault {
    /// Build a fault from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&BackendError> for BridgeFault {
    fn from(err: &BackendError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl fmt::Display for BridgeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(BackendError::Timeout.code(), codes::TIMEOUT);
        assert_eq!(
            BackendError::Native { code: 12, message: "no perm".into() }.code(),
            "NATIVE_12"
        );
    }

    #[test]
    fn test_hard_classification() {
        assert!(BackendError::PermissionDenied("x".into()).is_hard());
        assert!(BackendError::Unavailable("x".into()).is_hard());
        assert!(!BackendError::Timeout.is_hard());
        assert!(!BackendError::Native { code: 4, message: "net".into() }.is_hard());
    }

    #[test]
    fn test_fault_from_backend_error() {
        let fault = BridgeFault::from(&BackendError::PermissionDenied("denied by user".into()));
        assert_eq!(fault.code, codes::PERMISSION_DENIED);
        assert_eq!(fault.to_string(), "PERMISSION_DENIED: permission denied: denied by user");
    }
}
