//! simbroker Core - Shared types for the remote session broker
//!
//! This crate provides the domain types shared between the broker
//! daemon (simbrokerd), the client library and the wire protocol.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod capability;
pub mod kind;
pub mod object;
pub mod outcome;
pub mod platform;
pub mod port;

// Re-exports for convenience
pub use capability::{Capability, BUILTIN_METHODS, READ_HANDLE_METHODS, WRITE_HANDLE_METHODS};
pub use kind::{AppKind, AppRequest, DesignParams, LayoutParams, ScriptConfig};
pub use object::{ObjectId, ObjectKind, ObjectRef};
pub use outcome::{Failure, FailureKind, Outcome};
pub use platform::{HostingMode, Platform};
pub use port::{PortRange, DEFAULT_BROKER_PORT, DEFAULT_SESSION_PORT_RANGE};
