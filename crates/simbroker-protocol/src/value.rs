//! Values carried in successful replies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use simbroker_core::{HostingMode, ObjectRef};

/// Payload of a successful reply.
///
/// `Object` is a live reference, everything else is plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ReplyValue {
    Unit,
    Bool(bool),
    Port(u16),

    /// Human readable status, e.g. "Directory created"
    Status(String),

    /// Directory entry names
    Names(Vec<String>),

    /// File content split into lines
    Lines(Vec<String>),

    Text(String),

    /// Number of bytes written
    Written(usize),

    Object(ObjectRef),
    Services(Vec<ServiceInfo>),

    /// Opaque value returned by an application method
    Json(serde_json::Value),
}

impl ReplyValue {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status(message.into())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_port(&self) -> Option<u16> {
        match self {
            Self::Port(p) => Some(*p),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

/// Broker-side view of one registered session host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub port: u16,
    pub hostname: String,
    pub hosting: HostingMode,

    /// OS process id, for process-hosted sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    pub started_at: DateTime<Utc>,
}
