//! simbroker Client - connect to the broker and drive remote sessions
//!
//! This crate provides:
//! - `BrokerClient` - start, stop and list session hosts
//! - `SessionClient` - create applications and run scripts on a session host
//! - `RemoteObject` - proxy for a file handle or application living on the server
//! - [`connect`] - the usual entry point: ask the broker for a session and
//!   open a connection to it
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use simbroker_client::{connect, ClientConfig, RemoteFiles};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), simbroker_client::ClientError> {
//!     let session = connect("localhost", 18000, ClientConfig::default()).await?;
//!     let exists = session.path_exists(Path::new("/tmp")).await?;
//!     println!("exists: {exists}");
//!     session.disconnect().await
//! }
//! ```
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside of tests.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod remote;

pub use client::{connect, BrokerClient, RemoteFiles, SessionClient};
pub use config::ClientConfig;
pub use connection::{Connection, SharedConnection};
pub use error::{ClientError, Result};
pub use remote::RemoteObject;
