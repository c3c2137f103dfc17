//! Ephemeral session hosts.
//!
//! A session host is a short-lived server dedicated to one client. The
//! registry launches hosts through a [`HostLauncher`] and keeps the
//! returned [`EphemeralHost`] so it can stop the host later.
//!
//! Two execution modes exist:
//!
//! - [`ProcessLauncher`]: a child process running `simbrokerd serve-session`.
//!   Can be terminated.
//! - [`ThreadLauncher`]: a thread in the broker process with its own
//!   runtime. Cannot be terminated; stopping only forgets the entry and the
//!   thread keeps its port until the broker exits.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` in production code
//! - Bind and spawn failures are reported as `HostError`

mod process;
mod thread;

pub use process::{ProcessHost, ProcessLauncher};
pub use thread::{ThreadHost, ThreadLauncher};

use std::io;
use std::net::TcpListener;

use simbroker_core::HostingMode;
use thiserror::Error;

/// A running session host.
pub trait EphemeralHost: Send {
    fn mode(&self) -> HostingMode;

    /// OS process id, if the host is a separate process.
    fn pid(&self) -> Option<u32>;

    /// Whether the host has already stopped on its own.
    fn has_exited(&mut self) -> bool;

    /// Stops the host. A no-op for hosts that cannot be terminated.
    fn terminate(&mut self) -> Result<(), HostError>;
}

/// Starts session hosts on a given port.
pub trait HostLauncher: Send + Sync {
    fn mode(&self) -> HostingMode;

    /// Starts a host bound to `hostname:port`.
    ///
    /// Returns `HostError::PortUnavailable` when the port is taken, so the
    /// caller can draw another one.
    fn launch(&self, hostname: &str, port: u16) -> Result<Box<dyn EphemeralHost>, HostError>;
}

/// Errors raised while starting or stopping a host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Port {port} is already in use")]
    PortUnavailable { port: u16 },

    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("Failed to spawn session host: {0}")]
    Spawn(String),

    #[error("Failed to terminate session host: {0}")]
    Terminate(String),
}

/// Binds a std listener, mapping "address in use" to `PortUnavailable`.
pub(crate) fn bind_listener(hostname: &str, port: u16) -> Result<TcpListener, HostError> {
    TcpListener::bind((hostname, port)).map_err(|e| match e.kind() {
        io::ErrorKind::AddrInUse => HostError::PortUnavailable { port },
        _ => HostError::Bind {
            addr: format!("{hostname}:{port}"),
            error: e.to_string(),
        },
    })
}
