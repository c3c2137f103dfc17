//! Remote object references.
//!
//! Replies may carry an [`ObjectRef`] instead of a plain value; the object
//! it names stays alive on the serving side and remains callable over the
//! same connection until released or the connection closes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::capability::Capability;
use crate::kind::AppKind;

/// Connection-scoped identifier of a live remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj-{}", self.0)
    }
}

/// What a remote object is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectKind {
    ReadHandle,
    WriteHandle,
    Application { app: AppKind },
}

impl ObjectKind {
    /// The capability policy applied to calls on this object.
    pub fn capability(&self) -> Capability {
        match self {
            Self::ReadHandle => Capability::ReadHandle,
            Self::WriteHandle => Capability::WriteHandle,
            Self::Application { .. } => Capability::Permissive,
        }
    }
}

/// Reference to a live object on the serving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: ObjectId,

    #[serde(flatten)]
    pub kind: ObjectKind,

    /// Short description, e.g. the file path or application kind
    pub description: String,
}

impl ObjectRef {
    pub fn new(id: ObjectId, kind: ObjectKind, description: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            description: description.into(),
        }
    }

    /// Whether `method` may be called on this object.
    pub fn allows(&self, method: &str) -> bool {
        self.kind.capability().allows(method)
    }
}
