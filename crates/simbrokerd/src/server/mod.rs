//! TCP server shared by the broker and the session hosts.
//!
//! The server:
//! - Listens on a TCP port for client connections
//! - Creates a fresh service per connection and spawns a ConnectionHandler
//! - Supports graceful shutdown via CancellationToken, waiting for open
//!   connections to tear their services down
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │     Server      │
//! │  TcpListener    │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌──────────────────────────────┐
//! │ConnectionHandler│────▶│ CallHandler (one per client) │
//! │   (per client)  │     │ BrokerService/SessionService │
//! └─────────────────┘     └──────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use simbroker_core::Outcome;
use simbroker_protocol::{Call, ReplyValue, ServiceRole};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::BrokerService;
use crate::files;
use crate::objects::{ObjectTable, RemoteObject};
use crate::registry::RegistryHandle;
use crate::session::{ApplicationFactory, SessionService, SessionSettings};

/// Per-connection call dispatcher.
///
/// Connect, ping and disconnect are handled by the connection itself;
/// every other call reaches `handle`.
#[async_trait]
pub trait CallHandler: Send {
    fn role(&self) -> ServiceRole;

    async fn handle(&mut self, call: Call) -> Outcome<ReplyValue>;

    /// Called once when the connection ends, whatever the reason.
    async fn teardown(&mut self) {}
}

/// Builds a fresh service for each accepted connection.
pub type MakeService = Arc<dyn Fn() -> Box<dyn CallHandler> + Send + Sync>;

/// Answers the calls both roles serve: file primitives and object calls.
///
/// Returns the call back when it is not one of them.
pub async fn handle_shared_call(
    objects: &mut ObjectTable,
    call: Call,
) -> Result<Outcome<ReplyValue>, Call> {
    let outcome = match call {
        Call::Open { path } => files::open(&path)
            .map(|proxy| ReplyValue::Object(objects.insert(RemoteObject::Reader(proxy))))
            .into(),
        Call::Create { path } => files::create(&path)
            .map(|proxy| ReplyValue::Object(objects.insert(RemoteObject::Writer(proxy))))
            .into(),
        Call::Makedirs { path } => files::makedirs(&path).map(ReplyValue::Status).into(),
        Call::Listdir { path } => files::listdir(&path).map(ReplyValue::Names).into(),
        Call::PathExists { path } => Outcome::success(ReplyValue::Bool(files::path_exists(&path))),
        Call::Invoke {
            object,
            method,
            args,
        } => objects.invoke(object, &method, args).await,
        Call::Release { object } => objects.release(object).await,
        other => return Err(other),
    };
    Ok(outcome)
}

/// TCP server answering one role.
pub struct Server {
    listener: TcpListener,
    role: ServiceRole,
    make_service: MakeService,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Idle timeout applied to every connection
    idle_timeout: Option<Duration>,

    /// Connection counter for generating client IDs
    connection_counter: AtomicU64,
}

impl Server {
    /// Binds a listener on `addr`.
    pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_string(),
                error: e.to_string(),
            })
    }

    pub fn new(
        listener: TcpListener,
        role: ServiceRole,
        make_service: MakeService,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            listener,
            role,
            make_service,
            cancel_token,
            idle_timeout: None,
            connection_counter: AtomicU64::new(0),
        }
    }

    /// Global broker: every connection gets a `BrokerService`.
    pub fn broker(
        listener: TcpListener,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        let make_service: MakeService = Arc::new(move || {
            Box::new(BrokerService::new(registry.clone())) as Box<dyn CallHandler>
        });
        Self::new(listener, ServiceRole::Broker, make_service, cancel_token)
    }

    /// Session host: every connection gets its own `SessionService`.
    pub fn session(
        listener: TcpListener,
        factory: Arc<dyn ApplicationFactory>,
        settings: SessionSettings,
        cancel_token: CancellationToken,
    ) -> Self {
        let make_service: MakeService = Arc::new(move || {
            Box::new(SessionService::new(Arc::clone(&factory), settings.clone()))
                as Box<dyn CallHandler>
        });
        Self::new(listener, ServiceRole::Session, make_service, cancel_token)
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Io(e.to_string()))
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered, then
    /// waits for open connections to finish their teardown.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        info!(%addr, role = ?self.role, "Server listening");

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!(role = ?self.role, "Server shutdown requested");
                    break;
                }

                // Reap finished connection tasks
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Connection task failed");
                    }
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!(%peer, "Accepted connection");
                            self.handle_connection(&mut connections, stream);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        let open = connections.len();
        if open > 0 {
            debug!(open, "Waiting for connections to close");
        }
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Connection task failed");
            }
        }

        info!(role = ?self.role, "Server stopped");
        Ok(())
    }

    /// Spawns a handler task for a new client connection.
    fn handle_connection(&self, connections: &mut JoinSet<()>, stream: TcpStream) {
        let connection_number = self.connection_counter.fetch_add(1, Ordering::Relaxed);
        let (reader, writer) = stream.into_split();
        let service = (self.make_service)();
        let handler = ConnectionHandler::new(
            reader,
            writer,
            service,
            self.cancel_token.child_token(),
            connection_number,
        )
        .with_idle_timeout(self.idle_timeout);

        connections.spawn(async move {
            handler.run().await;
        });
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("I/O error: {0}")]
    Io(String),
}
