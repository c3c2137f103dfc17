//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses incoming messages
//! - Routes calls to the connection's [`CallHandler`]
//! - Tears the service down when the connection ends, however it ends
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use simbroker_protocol::{
    decode, encode, Call, ClientMessage, CodecError, ProtocolVersion, ServerMessage,
};

use super::CallHandler;

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Unique identifier for this connection
type ClientId = String;

/// Connection handler for a single client.
pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,

    /// Service answering this connection's calls
    service: Box<dyn CallHandler>,

    cancel_token: CancellationToken,

    /// Idle read timeout; `None` waits forever
    idle_timeout: Option<Duration>,

    /// Unique client identifier (assigned after handshake)
    client_id: Option<ClientId>,

    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        service: Box<dyn CallHandler>,
        cancel_token: CancellationToken,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            service,
            cancel_token,
            idle_timeout: None,
            client_id: None,
            connection_number,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Runs the connection handler.
    ///
    /// Performs the handshake, then processes calls until the client
    /// disconnects, the connection fails or the server shuts down. The
    /// service is torn down in every case.
    pub async fn run(mut self) -> Option<ClientId> {
        let role = self.service.role();
        debug!(connection = self.connection_number, ?role, "New client connected");

        let cancel_token = self.cancel_token.clone();
        let handshake = tokio::select! {
            _ = cancel_token.cancelled() => None,
            result = self.handle_handshake() => Some(result),
        };

        match handshake {
            Some(Ok(())) => {
                info!(client_id = ?self.client_id, ?role, "Client handshake completed");

                if let Err(e) = self.process_messages().await {
                    debug!(client_id = ?self.client_id, error = %e, "Connection closed");
                }
            }
            Some(Err(e)) => {
                warn!(
                    connection = self.connection_number,
                    error = %e,
                    "Handshake failed"
                );
            }
            None => {
                debug!(
                    connection = self.connection_number,
                    "Server shutting down before handshake"
                );
            }
        }

        self.service.teardown().await;
        info!(client_id = ?self.client_id, "Client disconnected");
        self.client_id
    }

    /// Handles the initial protocol handshake.
    ///
    /// Expects a `Connect` message from the client, validates the protocol
    /// version, and responds with `Connected` or `Rejected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = self.next_message().await?;

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(ServerMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.call {
            Call::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());

                let role = self.service.role();
                self.send_message(ServerMessage::connected(assigned_id, role))
                    .await?;
                Ok(())
            }
            other => {
                self.send_message(ServerMessage::error(
                    "Expected Connect message for handshake",
                ))
                .await?;

                Err(ConnectionError::UnexpectedMessage(other.name().to_string()))
            }
        }
    }

    /// Main message processing loop.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        let cancel_token = self.cancel_token.clone();
        loop {
            let next = tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!(client_id = ?self.client_id, "Server shutting down, closing connection");
                    return Ok(());
                }
                next = self.next_message() => next,
            };

            let msg = match next {
                Ok(msg) => msg,
                Err(ConnectionError::Eof) => {
                    debug!(client_id = ?self.client_id, "Client sent EOF");
                    return Ok(());
                }
                Err(e @ (ConnectionError::ParseError(_) | ConnectionError::MessageTooLarge { .. })) => {
                    // The line was consumed; answer and keep the connection.
                    warn!(client_id = ?self.client_id, error = %e, "Malformed message");
                    self.send_message(ServerMessage::error_with_code(
                        &e.to_string(),
                        "invalid_message",
                    ))
                    .await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if self.handle_message(msg).await?.is_break() {
                return Ok(());
            }
        }
    }

    /// Handles a single client message.
    async fn handle_message(
        &mut self,
        msg: ClientMessage,
    ) -> Result<ControlFlow<()>, ConnectionError> {
        match msg.call {
            Call::Connect { .. } => {
                self.send_message(ServerMessage::error("Already connected"))
                    .await?;
            }

            Call::Ping { seq } => {
                self.send_message(ServerMessage::pong(seq)).await?;
            }

            Call::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Ok(ControlFlow::Break(()));
            }

            call => {
                let name = call.name();
                debug!(client_id = ?self.client_id, call = name, "Dispatching call");

                let outcome = self.service.handle(call).await;
                if let Some(kind) = outcome.failure_kind() {
                    debug!(client_id = ?self.client_id, call = name, %kind, "Call failed");
                }
                self.send_message(ServerMessage::reply(outcome)).await?;
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    /// Reads the next message, honoring the idle timeout.
    async fn next_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        match self.idle_timeout {
            Some(limit) => match timeout(limit, self.read_message()).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(client_id = ?self.client_id, "Connection timed out");
                    Err(ConnectionError::Timeout)
                }
            },
            None => self.read_message().await,
        }
    }

    /// Reads a single message from the client.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        let msg: ClientMessage = decode(&line)?;

        debug!(
            client_id = ?self.client_id,
            message_type = msg.call.name(),
            "Received message"
        );

        Ok(msg)
    }

    /// Sends a message to the client.
    async fn send_message(&mut self, msg: ServerMessage) -> Result<(), ConnectionError> {
        let line = encode(&msg)?;
        let writer = &mut self.writer;

        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

impl From<CodecError> for ConnectionError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::TooLarge { size, max } => Self::MessageTooLarge { size, max },
            CodecError::Json(e) => Self::ParseError(e.to_string()),
        }
    }
}
