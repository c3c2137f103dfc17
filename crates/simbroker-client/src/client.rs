//! Broker and session clients.
//!
//! [`BrokerClient`] talks to the global broker, [`SessionClient`] to one
//! session host. Both expose the file primitives through [`RemoteFiles`].

use std::path::Path;

use async_trait::async_trait;
use simbroker_core::{AppRequest, ScriptConfig};
use simbroker_protocol::{Call, ReplyValue, ServiceInfo, ServiceRole};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::{Connection, SharedConnection};
use crate::error::Result;
use crate::remote::{unexpected, RemoteObject};

/// File primitives served by both the broker and session hosts.
///
/// Paths are interpreted on the server's filesystem.
#[async_trait]
pub trait RemoteFiles: Sync {
    fn connection(&self) -> &SharedConnection;

    /// Opens an existing file for reading.
    async fn open(&self, path: &Path) -> Result<RemoteObject> {
        let call = Call::Open {
            path: path.to_path_buf(),
        };
        object_reply(self.connection(), call).await
    }

    /// Creates a new file for writing. Fails if `path` exists.
    async fn create(&self, path: &Path) -> Result<RemoteObject> {
        let call = Call::Create {
            path: path.to_path_buf(),
        };
        object_reply(self.connection(), call).await
    }

    /// Creates a directory tree; returns the server's status message.
    async fn makedirs(&self, path: &Path) -> Result<String> {
        let call = Call::Makedirs {
            path: path.to_path_buf(),
        };
        match self.connection().lock().await.request(call).await? {
            ReplyValue::Status(status) => Ok(status),
            other => Err(unexpected("status", other)),
        }
    }

    /// Lists entry names of a directory; empty if it does not exist.
    async fn listdir(&self, path: &Path) -> Result<Vec<String>> {
        let call = Call::Listdir {
            path: path.to_path_buf(),
        };
        match self.connection().lock().await.request(call).await? {
            ReplyValue::Names(names) => Ok(names),
            other => Err(unexpected("names", other)),
        }
    }

    async fn path_exists(&self, path: &Path) -> Result<bool> {
        let call = Call::PathExists {
            path: path.to_path_buf(),
        };
        let reply = self.connection().lock().await.request(call).await?;
        reply.as_bool().ok_or_else(|| unexpected("bool", reply))
    }
}

async fn object_reply(conn: &SharedConnection, call: Call) -> Result<RemoteObject> {
    let reply = conn.lock().await.request(call).await?;
    match reply {
        ReplyValue::Object(reference) => {
            debug!(object = %reference.id, kind = ?reference.kind, "Remote object created");
            Ok(RemoteObject::new(reference, conn.clone()))
        }
        other => Err(unexpected("object", other)),
    }
}

// ============================================================================
// Broker Client
// ============================================================================

/// Client for the global broker.
pub struct BrokerClient {
    conn: SharedConnection,
}

impl BrokerClient {
    /// Connects to the broker at `host:port`.
    pub async fn connect(host: &str, port: u16, config: &ClientConfig) -> Result<Self> {
        let conn = Connection::open_as(host, port, ServiceRole::Broker, config).await?;
        Ok(Self {
            conn: conn.into_shared(),
        })
    }

    /// Launches a session host bound to `hostname`; returns its port.
    pub async fn start_service(&self, hostname: &str) -> Result<u16> {
        let call = Call::StartService {
            hostname: hostname.to_string(),
        };
        let reply = self.conn.lock().await.request(call).await?;
        let port = reply.as_port().ok_or_else(|| unexpected("port", reply))?;
        info!(port, hostname, "Session service started");
        Ok(port)
    }

    /// Stops the session host on `port`. Unknown ports answer `true`.
    pub async fn stop_service(&self, port: u16) -> Result<bool> {
        let reply = self
            .conn
            .lock()
            .await
            .request(Call::StopService { port })
            .await?;
        reply.as_bool().ok_or_else(|| unexpected("bool", reply))
    }

    pub async fn list_services(&self) -> Result<Vec<ServiceInfo>> {
        match self.conn.lock().await.request(Call::ListServices).await? {
            ReplyValue::Services(services) => Ok(services),
            other => Err(unexpected("services", other)),
        }
    }

    pub async fn ping(&self) -> Result<()> {
        self.conn.lock().await.ping().await
    }

    /// Disconnects; file handles opened on this client are released.
    pub async fn disconnect(self) -> Result<()> {
        self.conn.lock().await.disconnect().await
    }
}

#[async_trait]
impl RemoteFiles for BrokerClient {
    fn connection(&self) -> &SharedConnection {
        &self.conn
    }
}

// ============================================================================
// Session Client
// ============================================================================

/// Client for one session host.
pub struct SessionClient {
    conn: SharedConnection,
    port: u16,
}

impl SessionClient {
    /// Connects directly to a session host at `host:port`.
    ///
    /// Retries while the host is still starting up.
    pub async fn connect(host: &str, port: u16, config: &ClientConfig) -> Result<Self> {
        let conn = Connection::open_as(host, port, ServiceRole::Session, config).await?;
        Ok(Self {
            conn: conn.into_shared(),
            port,
        })
    }

    /// Port of the session host this client is connected to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Creates an application instance owned by this session.
    pub async fn create_application(&self, request: AppRequest) -> Result<RemoteObject> {
        object_reply(&self.conn, Call::CreateApplication { request }).await
    }

    /// Runs a script through the kind-specific launcher.
    ///
    /// Returns the launcher's status message; a non-zero exit of the
    /// script itself is not an error.
    pub async fn run_script(&self, script: Vec<String>, config: ScriptConfig) -> Result<String> {
        let call = Call::RunScript { script, config };
        match self.conn.lock().await.request(call).await? {
            ReplyValue::Status(status) => Ok(status),
            other => Err(unexpected("status", other)),
        }
    }

    /// Releases every application created on this session.
    pub async fn close_connection(&self) -> Result<bool> {
        let reply = self
            .conn
            .lock()
            .await
            .request(Call::CloseConnection)
            .await?;
        reply.as_bool().ok_or_else(|| unexpected("bool", reply))
    }

    pub async fn ping(&self) -> Result<()> {
        self.conn.lock().await.ping().await
    }

    /// Disconnects; everything this session owned is released first.
    pub async fn disconnect(self) -> Result<()> {
        self.conn.lock().await.disconnect().await
    }
}

#[async_trait]
impl RemoteFiles for SessionClient {
    fn connection(&self) -> &SharedConnection {
        &self.conn
    }
}

/// Asks the broker at `hostname:broker_port` for a session host and
/// connects to it.
///
/// The broker connection is closed once the port is known. Neither
/// connection has a request timeout unless `config` sets one.
pub async fn connect(hostname: &str, broker_port: u16, config: ClientConfig) -> Result<SessionClient> {
    let broker = BrokerClient::connect(hostname, broker_port, &config).await?;
    let port = broker.start_service(hostname).await?;
    broker.disconnect().await?;

    SessionClient::connect(hostname, port, &config).await
}
