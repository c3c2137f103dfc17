//! Errors-as-values result type for broker-facing operations.
//!
//! Every operation a remote caller can invoke answers with an `Outcome`
//! rather than a protocol-level error, so a calling script can branch on a
//! failure without any exception-style handling.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of an operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Operation or application kind not available here
    Unsupported,

    /// Target resource already exists
    AlreadyExists,

    /// Target resource or object reference does not exist
    NotFound,

    /// Method is not on the object's capability allow-list
    CapabilityDenied,

    /// No free port could be found in the reserved range
    AllocationExhausted,

    /// Spawning a host, application or launcher failed
    Launch,

    /// Other filesystem or process I/O failure
    Io,

    /// The application handle itself reported an error
    Application,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unsupported => "unsupported",
            Self::AlreadyExists => "already exists",
            Self::NotFound => "not found",
            Self::CapabilityDenied => "capability denied",
            Self::AllocationExhausted => "allocation exhausted",
            Self::Launch => "launch failed",
            Self::Io => "i/o error",
            Self::Application => "application error",
        };
        write!(f, "{s}")
    }
}

/// A failed operation: kind plus a human readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unsupported, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(FailureKind::AlreadyExists, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn io(err: impl fmt::Display) -> Self {
        Self::new(FailureKind::Io, err.to_string())
    }
}

/// Result of a broker-facing operation.
///
/// Serialized as `{"status":"success","value":...}` or
/// `{"status":"failure","failure":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome<T> {
    Success { value: T },
    Failure { failure: Failure },
}

impl<T> Outcome<T> {
    pub fn success(value: T) -> Self {
        Self::Success { value }
    }

    pub fn failure(failure: Failure) -> Self {
        Self::Failure { failure }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns the failure kind, if this is a failure.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { failure } => Some(failure.kind),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Self::Success { value } => Outcome::Success { value: f(value) },
            Self::Failure { failure } => Outcome::Failure { failure },
        }
    }

    /// Converts into a standard `Result`.
    pub fn into_result(self) -> Result<T, Failure> {
        match self {
            Self::Success { value } => Ok(value),
            Self::Failure { failure } => Err(failure),
        }
    }
}

impl<T> From<Result<T, Failure>> for Outcome<T> {
    fn from(result: Result<T, Failure>) -> Self {
        match result {
            Ok(value) => Self::Success { value },
            Err(failure) => Self::Failure { failure },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization_shape() {
        let ok: Outcome<u16> = Outcome::success(18734);
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"status\":\"success\""));
        assert!(json.contains("18734"));

        let err: Outcome<u16> = Outcome::failure(Failure::already_exists("/tmp/x"));
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"status\":\"failure\""));
        assert!(json.contains("\"already_exists\""));
    }

    #[test]
    fn test_outcome_from_result() {
        let outcome: Outcome<bool> = Err(Failure::unsupported("no")).into();
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Unsupported));
        assert!(!outcome.is_success());

        let outcome: Outcome<bool> = Ok(true).into();
        assert_eq!(outcome.into_result(), Ok(true));
    }

    #[test]
    fn test_failure_display() {
        let failure = Failure::new(FailureKind::CapabilityDenied, "write on read handle");
        assert_eq!(
            failure.to_string(),
            "capability denied: write on read handle"
        );
    }

    #[test]
    fn test_failure_is_std_error() {
        let failure = Failure::not_found("object 7");
        let err: Box<dyn std::error::Error + Send + Sync> = Box::new(failure.clone());
        assert_eq!(err.to_string(), "not found: object 7");
        assert!(err.source().is_none());
    }
}
