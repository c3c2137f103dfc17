//! simbroker daemon - session broker and ephemeral session hosts
//!
//! This crate provides the serving side of simbroker:
//! - `registry` - Port registry actor mapping session ports to their hosts
//! - `host` - Process and thread launchers for session hosts
//! - `server` - TCP server and per-connection handler shared by both roles
//! - `broker` - The global broker service (start/stop/list session hosts)
//! - `session` - The per-session service (applications, scripts)
//! - `objects` / `files` - Remote object table and file primitives
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    simbrokerd (broker)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ Server (broker) │────▶│     RegistryActor           │   │
//! │  │   TCP :18000    │     │  (port → host table owner)  │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │ launch            │
//! │           │ connections                 ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ BrokerService   │     │  HostLauncher               │   │
//! │  │  (per client)   │     │  process or thread          │   │
//! │  └─────────────────┘     └──────────────┬──────────────┘   │
//! │                                         │                   │
//! └─────────────────────────────────────────┼───────────────────┘
//!                                           ▼
//!                           ┌─────────────────────────────┐
//!                           │ Server (session) :185xx     │
//!                           │  SessionService per client  │
//!                           └─────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Operation failures reach clients as `Outcome::Failure` values

pub mod broker;
pub mod config;
pub mod files;
pub mod host;
pub mod objects;
pub mod registry;
pub mod server;
pub mod session;
