//! Integration tests for the broker and thread-hosted session hosts.
//!
//! These tests drive the real TCP servers over the wire protocol: handshake,
//! port allocation, file primitives and the session lifecycle.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use simbroker_core::{
    AppKind, AppRequest, DesignParams, Failure, FailureKind, HostingMode, ObjectRef, Outcome,
    PortRange,
};
use simbroker_protocol::{
    Call, ClientMessage, ProtocolVersion, ReplyValue, ServerMessage, ServiceRole,
};
use simbrokerd::host::{EphemeralHost, HostError, HostLauncher, ThreadLauncher};
use simbrokerd::registry::spawn_registry;
use simbrokerd::server::Server;
use simbrokerd::session::{ApplicationFactory, ApplicationHandle, SessionSettings};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Helpers
// ============================================================================

/// Application that counts its releases.
struct CountingApp {
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl ApplicationHandle for CountingApp {
    fn kind(&self) -> AppKind {
        AppKind::FullWave
    }

    fn describe(&self) -> String {
        "counting app".to_string()
    }

    async fn invoke(&mut self, method: &str, _args: Vec<Value>) -> Result<Value, Failure> {
        Ok(json!(method.len()))
    }

    async fn release(&mut self) -> Result<(), Failure> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct CountingFactory {
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl ApplicationFactory for CountingFactory {
    async fn create(&self, _request: &AppRequest) -> Result<Box<dyn ApplicationHandle>, Failure> {
        Ok(Box::new(CountingApp {
            released: self.released.clone(),
        }))
    }
}

/// Launcher whose every port is taken.
struct BusyLauncher;

impl HostLauncher for BusyLauncher {
    fn mode(&self) -> HostingMode {
        HostingMode::Process
    }

    fn launch(&self, _hostname: &str, port: u16) -> Result<Box<dyn EphemeralHost>, HostError> {
        Err(HostError::PortUnavailable { port })
    }
}

/// Launcher failing for reasons unrelated to the port.
struct BrokenLauncher;

impl HostLauncher for BrokenLauncher {
    fn mode(&self) -> HostingMode {
        HostingMode::Process
    }

    fn launch(&self, _hostname: &str, _port: u16) -> Result<Box<dyn EphemeralHost>, HostError> {
        Err(HostError::Spawn("no such executable".to_string()))
    }
}

/// Test broker context managing server lifecycle and cleanup.
struct TestBroker {
    port: u16,
    released: Arc<AtomicUsize>,
    cancel_token: CancellationToken,
    temp_dir: TempDir,
}

impl TestBroker {
    /// Spawns a broker whose session hosts run on threads.
    async fn spawn() -> Self {
        let released = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(CountingFactory {
            released: released.clone(),
        });
        let launcher = Arc::new(ThreadLauncher::new(factory, SessionSettings::default()));
        Self::spawn_with(launcher, released).await
    }

    async fn spawn_with(launcher: Arc<dyn HostLauncher>, released: Arc<AtomicUsize>) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let registry = spawn_registry(launcher, PortRange::default(), 64);
        let cancel_token = CancellationToken::new();

        let listener = Server::bind("127.0.0.1:0").await.expect("bind broker");
        let server = Server::broker(listener, registry, cancel_token.clone());
        let port = server.local_addr().expect("local addr").port();

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        Self {
            port,
            released,
            cancel_token,
            temp_dir,
        }
    }

    async fn connect(&self) -> TestClient {
        TestClient::connect(self.port, ServiceRole::Broker).await
    }

    fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Test client connection with protocol helpers.
struct TestClient {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl TestClient {
    async fn open(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("connect to server");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Connects and completes the handshake, checking the service role.
    async fn connect(port: u16, role: ServiceRole) -> Self {
        let mut client = Self::open(port).await;
        client.send(ClientMessage::connect(None)).await;
        match client.recv().await {
            ServerMessage::Connected { role: actual, .. } => assert_eq!(actual, role),
            other => panic!("Expected Connected, got {other:?}"),
        }
        client
    }

    async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.writer.write_all(json.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> ServerMessage {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Sends a call and returns its outcome.
    async fn call(&mut self, call: Call) -> Outcome<ReplyValue> {
        self.send(ClientMessage::new(call)).await;
        match self.recv().await {
            ServerMessage::Reply { outcome } => outcome,
            other => panic!("Expected Reply, got {other:?}"),
        }
    }

    async fn value(&mut self, call: Call) -> ReplyValue {
        self.call(call).await.into_result().unwrap()
    }

    async fn object(&mut self, call: Call) -> ObjectRef {
        self.value(call).await.into_object().unwrap()
    }

    /// Disconnects and waits until the server has closed the socket.
    async fn disconnect(mut self) {
        self.send(ClientMessage::disconnect()).await;
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap_or(0);
        assert_eq!(n, 0, "Expected EOF after disconnect, got {line:?}");
    }
}

// ============================================================================
// Handshake Tests
// ============================================================================

#[tokio::test]
async fn test_broker_handshake_reports_role() {
    let broker = TestBroker::spawn().await;
    let client = broker.connect().await;
    client.disconnect().await;
}

#[tokio::test]
async fn test_incompatible_version_rejected() {
    let broker = TestBroker::spawn().await;
    let mut client = TestClient::open(broker.port).await;

    let mut msg = ClientMessage::connect(None);
    msg.protocol_version = ProtocolVersion::new(99, 0);
    client.send(msg).await;

    match client.recv().await {
        ServerMessage::Rejected { reason, .. } => assert!(reason.contains("99")),
        other => panic!("Expected Rejected, got {other:?}"),
    }
}

// ============================================================================
// Port Allocation Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_starts_get_distinct_ports() {
    let broker = TestBroker::spawn().await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let port = broker.port;
        tasks.push(tokio::spawn(async move {
            let mut client = TestClient::connect(port, ServiceRole::Broker).await;
            let reply = client
                .value(Call::StartService {
                    hostname: "127.0.0.1".to_string(),
                })
                .await;
            client.disconnect().await;
            reply.as_port().unwrap()
        }));
    }

    let mut ports = HashSet::new();
    for task in tasks {
        let port = task.await.unwrap();
        assert!(PortRange::default().contains(port));
        ports.insert(port);
    }
    assert_eq!(ports.len(), 8);

    let mut client = broker.connect().await;
    match client.value(Call::ListServices).await {
        ReplyValue::Services(services) => {
            assert_eq!(services.len(), 8);
            assert!(services.iter().all(|s| s.hosting == HostingMode::Thread));
            assert!(services.iter().all(|s| ports.contains(&s.port)));
        }
        other => panic!("Expected Services, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stop_service_is_idempotent() {
    let broker = TestBroker::spawn().await;
    let mut client = broker.connect().await;

    let port = client
        .value(Call::StartService {
            hostname: "127.0.0.1".to_string(),
        })
        .await
        .as_port()
        .unwrap();

    assert_eq!(client.value(Call::StopService { port }).await, ReplyValue::Bool(true));
    assert_eq!(client.value(Call::StopService { port }).await, ReplyValue::Bool(true));
    assert_eq!(
        client.value(Call::StopService { port: 18501 }).await,
        ReplyValue::Bool(true)
    );

    match client.value(Call::ListServices).await {
        ReplyValue::Services(services) => assert!(services.is_empty()),
        other => panic!("Expected Services, got {other:?}"),
    }
}

#[tokio::test]
async fn test_allocation_exhausted_is_a_failure_value() {
    let broker = TestBroker::spawn_with(Arc::new(BusyLauncher), Arc::default()).await;
    let mut client = broker.connect().await;

    let outcome = client
        .call(Call::StartService {
            hostname: "127.0.0.1".to_string(),
        })
        .await;
    assert_eq!(outcome.failure_kind(), Some(FailureKind::AllocationExhausted));

    // The connection survives the failure
    assert!(client.call(Call::ListServices).await.is_success());
}

#[tokio::test]
async fn test_launch_failure_is_reported() {
    let broker = TestBroker::spawn_with(Arc::new(BrokenLauncher), Arc::default()).await;
    let mut client = broker.connect().await;

    let outcome = client
        .call(Call::StartService {
            hostname: "127.0.0.1".to_string(),
        })
        .await;
    assert_eq!(outcome.failure_kind(), Some(FailureKind::Launch));
}

// ============================================================================
// File Primitive Tests
// ============================================================================

#[tokio::test]
async fn test_broker_file_primitives() {
    let broker = TestBroker::spawn().await;
    let mut client = broker.connect().await;
    let root = broker.temp_dir.path().to_path_buf();
    let file = root.join("result.csv");

    let handle = client.object(Call::Create { path: file.clone() }).await;
    assert_eq!(
        client.value(Call::PathExists { path: file.clone() }).await,
        ReplyValue::Bool(true)
    );
    assert_eq!(
        client
            .call(Call::Create { path: file.clone() })
            .await
            .failure_kind(),
        Some(FailureKind::AlreadyExists)
    );
    client.value(Call::Release { object: handle.id }).await;

    let dirs = root.join("runs").join("001");
    assert_eq!(
        client.value(Call::Makedirs { path: dirs.clone() }).await,
        ReplyValue::status("Directory created")
    );
    assert_eq!(
        client.value(Call::Makedirs { path: dirs }).await,
        ReplyValue::status("Directory already exists")
    );

    assert_eq!(
        client.value(Call::Listdir { path: root.clone() }).await,
        ReplyValue::Names(vec!["result.csv".to_string(), "runs".to_string()])
    );
    assert_eq!(
        client
            .value(Call::Listdir {
                path: root.join("missing")
            })
            .await,
        ReplyValue::Names(Vec::new())
    );
}

#[tokio::test]
async fn test_session_calls_unsupported_on_broker() {
    let broker = TestBroker::spawn().await;
    let mut client = broker.connect().await;

    let outcome = client
        .call(Call::CreateApplication {
            request: AppRequest::Circuit(DesignParams::default()),
        })
        .await;
    assert_eq!(outcome.failure_kind(), Some(FailureKind::Unsupported));
}

// ============================================================================
// Session Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_thread_hosted_session_end_to_end() {
    let broker = TestBroker::spawn().await;
    let mut admin = broker.connect().await;

    let port = admin
        .value(Call::StartService {
            hostname: "127.0.0.1".to_string(),
        })
        .await
        .as_port()
        .unwrap();

    let mut session = TestClient::connect(port, ServiceRole::Session).await;
    let app = session
        .object(Call::CreateApplication {
            request: AppRequest::FullWave(DesignParams::default()),
        })
        .await;
    assert_eq!(
        app.kind,
        simbroker_core::ObjectKind::Application {
            app: AppKind::FullWave
        }
    );

    let reply = session
        .value(Call::Invoke {
            object: app.id,
            method: "solve".to_string(),
            args: Vec::new(),
        })
        .await;
    assert_eq!(reply, ReplyValue::Json(json!(5)));

    // Broker-only calls are refused by the session host
    assert_eq!(
        session.call(Call::ListServices).await.failure_kind(),
        Some(FailureKind::Unsupported)
    );

    session.disconnect().await;
    assert_eq!(broker.released(), 1);

    assert_eq!(admin.value(Call::StopService { port }).await, ReplyValue::Bool(true));
    admin.disconnect().await;
}

#[tokio::test]
async fn test_close_connection_releases_applications_only() {
    let broker = TestBroker::spawn().await;
    let mut admin = broker.connect().await;
    let port = admin
        .value(Call::StartService {
            hostname: "127.0.0.1".to_string(),
        })
        .await
        .as_port()
        .unwrap();

    let mut session = TestClient::connect(port, ServiceRole::Session).await;
    for _ in 0..2 {
        session
            .object(Call::CreateApplication {
                request: AppRequest::Magnetic(DesignParams::default()),
            })
            .await;
    }
    let notes = broker.temp_dir.path().join("notes.txt");
    let writer = session.object(Call::Create { path: notes }).await;

    assert_eq!(session.value(Call::CloseConnection).await, ReplyValue::Bool(true));
    assert_eq!(broker.released(), 2);

    // The file handle is still usable
    let written = session
        .value(Call::Invoke {
            object: writer.id,
            method: "write".to_string(),
            args: vec![json!("ok")],
        })
        .await;
    assert_eq!(written, ReplyValue::Written(2));

    // A second close is a no-op
    assert_eq!(session.value(Call::CloseConnection).await, ReplyValue::Bool(true));
    assert_eq!(broker.released(), 2);

    session.disconnect().await;
}
