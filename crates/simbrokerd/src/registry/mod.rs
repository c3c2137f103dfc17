//! Port registry using the Actor pattern.
//!
//! The registry maps each allocated session port to the host serving it.
//! It receives commands via a tokio mpsc channel; since one task processes
//! them in order, concurrent `start_service` calls can never be handed the
//! same port.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ BrokerService   │────▶│  RegistryActor  │────▶│  HostLauncher   │
//! │ (per client)    │     │                 │     │ process/thread  │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!         │                       │
//!         │   RegistryCommand     │   BTreeMap<port, ServiceEntry>
//!         │   (mpsc + oneshot)    │
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::sync::Arc;

use simbroker_core::PortRange;
use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, RegistryError};
pub use handle::RegistryHandle;

/// Channel buffer size
const COMMAND_BUFFER: usize = 100;

/// Spawns the registry actor and returns a handle for interaction.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use simbroker_core::PortRange;
/// use simbrokerd::host::ProcessLauncher;
/// use simbrokerd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let launcher = Arc::new(ProcessLauncher::current_exe(None).unwrap());
///     let handle = spawn_registry(launcher, PortRange::default(), 64);
///     let port = handle.start_service("localhost").await;
/// }
/// ```
pub fn spawn_registry(
    launcher: Arc<dyn crate::host::HostLauncher>,
    range: PortRange,
    max_attempts: u32,
) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(cmd_rx, launcher, range, max_attempts);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx)
}
