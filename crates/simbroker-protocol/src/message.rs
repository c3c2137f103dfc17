//! Protocol message types for broker and session connections.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use simbroker_core::{AppRequest, ObjectId, Outcome, ScriptConfig};

use crate::value::ReplyValue;
use crate::version::ProtocolVersion;

/// Calls a client can issue.
///
/// The broker answers the broker and file calls; a session host answers
/// the session and file calls. Object calls work on both, against objects
/// created on that same connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Call {
    /// Handshake, must be the first message on a connection
    Connect {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Allocate a port and launch a session host bound to `hostname`
    StartService { hostname: String },

    /// Terminate the session host on `port`
    StopService { port: u16 },

    /// List registered session hosts
    ListServices,

    /// Open a file for reading (restricted handle)
    Open { path: PathBuf },

    /// Create a new file for writing (restricted handle)
    Create { path: PathBuf },

    /// Create a directory tree
    Makedirs { path: PathBuf },

    /// List entry names of a directory
    Listdir { path: PathBuf },

    PathExists { path: PathBuf },

    /// Create an application instance owned by this session
    CreateApplication { request: AppRequest },

    /// Run a script through the kind-specific launcher
    RunScript {
        script: Vec<String>,
        #[serde(default)]
        config: ScriptConfig,
    },

    /// Release every application created on this session
    CloseConnection,

    /// Call a method on a remote object
    Invoke {
        object: ObjectId,
        method: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<serde_json::Value>,
    },

    /// Release a single remote object
    Release { object: ObjectId },

    Ping { seq: u64 },

    /// Client disconnecting gracefully
    Disconnect,
}

impl Call {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::StartService { .. } => "start_service",
            Self::StopService { .. } => "stop_service",
            Self::ListServices => "list_services",
            Self::Open { .. } => "open",
            Self::Create { .. } => "create",
            Self::Makedirs { .. } => "makedirs",
            Self::Listdir { .. } => "listdir",
            Self::PathExists { .. } => "path_exists",
            Self::CreateApplication { .. } => "create_application",
            Self::RunScript { .. } => "run_script",
            Self::CloseConnection => "close_connection",
            Self::Invoke { .. } => "invoke",
            Self::Release { .. } => "release",
            Self::Ping { .. } => "ping",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Messages sent from client to broker or session host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub protocol_version: ProtocolVersion,

    #[serde(flatten)]
    pub call: Call,
}

impl ClientMessage {
    /// Wraps a call with the current protocol version.
    pub fn new(call: Call) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            call,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(Call::Connect { client_id })
    }

    pub fn start_service(hostname: impl Into<String>) -> Self {
        Self::new(Call::StartService {
            hostname: hostname.into(),
        })
    }

    pub fn stop_service(port: u16) -> Self {
        Self::new(Call::StopService { port })
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(Call::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(Call::Disconnect)
    }
}

/// Which service a connection is talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    Broker,
    Session,
}

/// Messages sent from broker or session host to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted
    Connected {
        protocol_version: ProtocolVersion,
        client_id: String,
        role: ServiceRole,
    },

    /// Handshake rejected (version mismatch, etc.)
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// Result of a call
    Reply { outcome: Outcome<ReplyValue> },

    Pong { seq: u64 },

    /// Protocol-level error (malformed message, wrong state)
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ServerMessage {
    pub fn connected(client_id: String, role: ServiceRole) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
            role,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn reply(outcome: Outcome<ReplyValue>) -> Self {
        Self::Reply { outcome }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbroker_core::{DesignParams, Failure};

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::start_service("workerA");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"start_service\""));
        assert!(json.contains("\"hostname\":\"workerA\""));
        assert!(json.contains("\"protocol_version\""));
    }

    #[test]
    fn test_create_application_nests_request() {
        let msg = ClientMessage::new(Call::CreateApplication {
            request: AppRequest::Circuit(DesignParams::default()),
        });
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        match parsed.call {
            Call::CreateApplication { request } => {
                assert_eq!(request, AppRequest::Circuit(DesignParams::default()));
            }
            other => panic!("Expected CreateApplication, got {other:?}"),
        }
    }

    #[test]
    fn test_run_script_config_defaults() {
        let json = r#"{"protocol_version":{"major":1,"minor":0},"type":"run_script","script":["print(1)"]}"#;
        let parsed: ClientMessage = serde_json::from_str(json).unwrap();
        match parsed.call {
            Call::RunScript { script, config } => {
                assert_eq!(script, vec!["print(1)".to_string()]);
                assert_eq!(config, ScriptConfig::default());
            }
            other => panic!("Expected RunScript, got {other:?}"),
        }
    }

    #[test]
    fn test_reply_serialization() {
        let msg = ServerMessage::reply(Outcome::success(ReplyValue::Port(18734)));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"reply\""));
        assert!(json.contains("18734"));

        let msg = ServerMessage::reply(Outcome::failure(Failure::unsupported("nope")));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"unsupported\""));
    }

    #[test]
    fn test_connected_carries_role() {
        let msg = ServerMessage::connected("client-1".to_string(), ServiceRole::Session);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"session\""));
    }
}
