//! A single client connection to the broker or a session host.
//!
//! Handles connect retry with exponential backoff, the protocol handshake
//! and strict request/reply exchange.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use simbroker_core::Outcome;
use simbroker_protocol::{
    decode, encode, Call, ClientMessage, ReplyValue, ServerMessage, ServiceRole,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// A connection shared between a client and the remote objects it created.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// An established, handshaken connection.
///
/// Requests are answered strictly in order; callers needing concurrent
/// access go through [`SharedConnection`].
pub struct Connection {
    addr: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    role: ServiceRole,
    client_id: String,
    request_timeout: Option<Duration>,
    next_seq: u64,
}

impl Connection {
    /// Connects to `host:port` and performs the handshake.
    ///
    /// # Errors
    ///
    /// - `ClientError::Connect` if the port never accepted a connection
    /// - `ClientError::Rejected` on a protocol version mismatch
    pub async fn open(host: &str, port: u16, config: &ClientConfig) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let stream = connect_with_retry(&addr, config).await?;
        let (read_half, write_half) = stream.into_split();

        let mut conn = Self {
            addr,
            reader: BufReader::new(read_half),
            writer: write_half,
            role: ServiceRole::Broker,
            client_id: String::new(),
            request_timeout: config.request_timeout,
            next_seq: 0,
        };
        conn.handshake(config.client_id.clone()).await?;
        Ok(conn)
    }

    /// Like [`Connection::open`], but fails unless the peer has `role`.
    pub async fn open_as(
        host: &str,
        port: u16,
        role: ServiceRole,
        config: &ClientConfig,
    ) -> Result<Self> {
        let conn = Self::open(host, port, config).await?;
        if conn.role != role {
            return Err(ClientError::WrongRole {
                expected: role,
                actual: conn.role,
            });
        }
        Ok(conn)
    }

    pub fn role(&self) -> ServiceRole {
        self.role
    }

    /// Identifier assigned by the server during the handshake.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn into_shared(self) -> SharedConnection {
        Arc::new(Mutex::new(self))
    }

    /// Sends a call and returns the server's outcome.
    ///
    /// A failed operation is `Ok(Outcome::Failure)`; `Err` means the
    /// exchange itself broke.
    pub async fn call(&mut self, call: Call) -> Result<Outcome<ReplyValue>> {
        let name = call.name();
        self.send(&ClientMessage::new(call)).await?;

        match self.receive().await? {
            ServerMessage::Reply { outcome } => Ok(outcome),
            ServerMessage::Error { message, code } => {
                warn!(call = name, %message, "Server reported protocol error");
                Err(ClientError::Server { message, code })
            }
            other => Err(ClientError::Protocol(format!(
                "unexpected reply to {name}: {other:?}"
            ))),
        }
    }

    /// Sends a call and unwraps a successful outcome.
    ///
    /// Server-side failures become `ClientError::Failed`.
    pub async fn request(&mut self, call: Call) -> Result<ReplyValue> {
        Ok(self.call(call).await?.into_result()?)
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.send(&ClientMessage::ping(seq)).await?;

        match self.receive().await? {
            ServerMessage::Pong { seq: echoed } if echoed == seq => Ok(()),
            other => Err(ClientError::Protocol(format!(
                "expected pong {seq}, got {other:?}"
            ))),
        }
    }

    /// Says goodbye and waits for the server to close the connection.
    ///
    /// The server releases everything this connection owned before it
    /// closes the socket. Later calls on this connection fail.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.send(&ClientMessage::disconnect()).await?;

        loop {
            match self.receive().await {
                Err(ClientError::Closed) => break,
                Err(e) => return Err(e),
                Ok(msg) => debug!(addr = %self.addr, ?msg, "Discarding message after disconnect"),
            }
        }

        info!(addr = %self.addr, client_id = %self.client_id, "Disconnected");
        Ok(())
    }

    async fn handshake(&mut self, client_id: Option<String>) -> Result<()> {
        self.send(&ClientMessage::connect(client_id)).await?;

        match self.receive().await? {
            ServerMessage::Connected {
                protocol_version,
                client_id,
                role,
            } => {
                info!(
                    addr = %self.addr,
                    %client_id,
                    ?role,
                    server_version = %protocol_version,
                    "Connected"
                );
                self.client_id = client_id;
                self.role = role;
                Ok(())
            }
            ServerMessage::Rejected {
                reason,
                protocol_version,
            } => Err(ClientError::Rejected {
                reason,
                server: protocol_version,
            }),
            other => Err(ClientError::Protocol(format!(
                "expected handshake reply, got {other:?}"
            ))),
        }
    }

    async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let line = encode(msg)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<ServerMessage> {
        let limit = self.request_timeout;
        let read = read_message(&mut self.reader);
        with_deadline(limit, read).await
    }
}

async fn read_message(reader: &mut BufReader<OwnedReadHalf>) -> Result<ServerMessage> {
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read == 0 {
        return Err(ClientError::Closed);
    }
    Ok(decode(&line)?)
}

async fn with_deadline<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => timeout(limit, fut).await.map_err(|_| ClientError::Timeout)?,
        None => fut.await,
    }
}

/// Connects with exponential backoff until `config.max_attempts` is spent.
async fn connect_with_retry(addr: &str, config: &ClientConfig) -> Result<TcpStream> {
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.retry_initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!(%addr, attempt, "TCP connection established");
                return Ok(stream);
            }
            Err(e) if attempt >= max_attempts => {
                return Err(ClientError::Connect {
                    addr: addr.to_string(),
                    attempts: attempt,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                debug!(
                    %addr,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Connection failed, retrying"
                );
                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
