//! Registry actor commands and errors.
//!
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations

use simbroker_core::{Failure, FailureKind};
use simbroker_protocol::ServiceInfo;
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command carries a oneshot channel for the response. The actor
/// processes commands one at a time, so the check for a free port and the
/// insertion of the new entry can never interleave with another start.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Allocate a port and launch a session host on it.
    ///
    /// # Errors
    /// - `RegistryError::AllocationExhausted` if no free port was found
    /// - `RegistryError::Launch` if the host failed for another reason
    StartService {
        /// Hostname the session host binds to
        hostname: String,
        respond_to: oneshot::Sender<Result<u16, RegistryError>>,
    },

    /// Stop the host on a port and forget it.
    ///
    /// Always answers `true`; unknown ports are ignored.
    StopService {
        port: u16,
        respond_to: oneshot::Sender<bool>,
    },

    /// Snapshot of the live hosts, after reaping exited ones.
    ListServices {
        respond_to: oneshot::Sender<Vec<ServiceInfo>>,
    },

    /// Terminate every terminable host and clear the registry.
    ///
    /// Answers with the number of hosts that were terminated.
    Shutdown { respond_to: oneshot::Sender<usize> },
}

// ============================================================================
// Registry Errors
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No free session port after {attempts} attempts")]
    AllocationExhausted { attempts: u32 },

    #[error("Failed to launch session host: {0}")]
    Launch(String),

    #[error("Registry channel closed")]
    ChannelClosed,
}

impl From<RegistryError> for Failure {
    fn from(err: RegistryError) -> Self {
        let kind = match &err {
            RegistryError::AllocationExhausted { .. } => FailureKind::AllocationExhausted,
            RegistryError::Launch(_) => FailureKind::Launch,
            RegistryError::ChannelClosed => FailureKind::Io,
        };
        Failure::new(kind, err.to_string())
    }
}
