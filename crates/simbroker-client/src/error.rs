//! Error types for the simbroker client.

use simbroker_core::{Failure, FailureKind};
use simbroker_protocol::{CodecError, ProtocolVersion, ServiceRole};
use thiserror::Error;

/// Errors returned by client operations.
///
/// Operation failures reported by the server arrive as [`ClientError::Failed`]
/// and keep their [`FailureKind`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not reach the server after all retry attempts.
    #[error("Failed to connect to {addr} after {attempts} attempts: {message}")]
    Connect {
        addr: String,
        attempts: u32,
        message: String,
    },

    /// Server rejected the handshake.
    #[error("Connection rejected (server protocol {server}): {reason}")]
    Rejected {
        reason: String,
        server: ProtocolVersion,
    },

    /// Connected to the wrong kind of service.
    #[error("Expected a {expected:?} service, connected to {actual:?}")]
    WrongRole {
        expected: ServiceRole,
        actual: ServiceRole,
    },

    /// The server answered with a protocol-level error.
    #[error("Server error: {message}")]
    Server {
        message: String,
        code: Option<String>,
    },

    /// Unexpected message or reply shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The operation ran and failed on the server.
    #[error("{0}")]
    Failed(#[from] Failure),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No reply within the configured request timeout.
    #[error("Request timed out")]
    Timeout,

    /// The server closed the connection.
    #[error("Connection closed by server")]
    Closed,
}

impl ClientError {
    /// Kind of a server-side operation failure, if this is one.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failed(failure) => Some(failure.kind),
            _ => None,
        }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
