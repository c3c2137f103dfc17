//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` is a cheap-to-clone interface for sending commands
//! to the registry actor. Every broker connection holds a clone.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use simbroker_protocol::ServiceInfo;
use tokio::sync::{mpsc, oneshot};

use super::commands::{RegistryCommand, RegistryError};

/// Handle for interacting with the registry actor.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Launches a session host on a freshly drawn port.
    ///
    /// # Errors
    ///
    /// - `RegistryError::AllocationExhausted` if no free port was found
    /// - `RegistryError::Launch` if the host could not be started
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn start_service(&self, hostname: impl Into<String>) -> Result<u16, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::StartService {
                hostname: hostname.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Stops the host on `port`. Unknown ports still answer `true`.
    pub async fn stop_service(&self, port: u16) -> Result<bool, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::StopService {
                port,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Lists live session hosts.
    ///
    /// Returns an empty list if the actor has shut down.
    pub async fn list_services(&self) -> Vec<ServiceInfo> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::ListServices { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Terminates every terminable host; returns how many were terminated.
    pub async fn shutdown(&self) -> Result<usize, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Shutdown { respond_to: tx })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }
}
