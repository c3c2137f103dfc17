//! Client-side proxies for objects living on the server.

use serde_json::Value;
use simbroker_core::{ObjectId, ObjectKind, ObjectRef};
use simbroker_protocol::{Call, ReplyValue};

use crate::connection::SharedConnection;
use crate::error::{ClientError, Result};

/// Proxy for a remote file handle or application.
///
/// Calls travel over the connection that created the object; the object
/// lives as long as that connection unless released earlier.
#[derive(Clone)]
pub struct RemoteObject {
    reference: ObjectRef,
    conn: SharedConnection,
}

impl RemoteObject {
    pub(crate) fn new(reference: ObjectRef, conn: SharedConnection) -> Self {
        Self { reference, conn }
    }

    pub fn id(&self) -> ObjectId {
        self.reference.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.reference.kind
    }

    pub fn reference(&self) -> &ObjectRef {
        &self.reference
    }

    /// Calls `method` on the remote object.
    ///
    /// Restricted handles answer methods outside their allow-list with a
    /// `CapabilityDenied` failure.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<ReplyValue> {
        let call = Call::Invoke {
            object: self.reference.id,
            method: method.to_string(),
            args,
        };
        self.conn.lock().await.request(call).await
    }

    pub async fn describe(&self) -> Result<String> {
        match self.invoke("describe", Vec::new()).await? {
            ReplyValue::Text(text) => Ok(text),
            other => Err(unexpected("text", other)),
        }
    }

    /// Methods the server will accept for this object.
    pub async fn methods(&self) -> Result<Vec<String>> {
        match self.invoke("methods", Vec::new()).await? {
            ReplyValue::Names(names) => Ok(names),
            other => Err(unexpected("names", other)),
        }
    }

    /// Reads all lines of a read handle, terminators included.
    pub async fn readlines(&self) -> Result<Vec<String>> {
        match self.invoke("readlines", Vec::new()).await? {
            ReplyValue::Lines(lines) => Ok(lines),
            other => Err(unexpected("lines", other)),
        }
    }

    pub async fn read(&self) -> Result<String> {
        match self.invoke("read", Vec::new()).await? {
            ReplyValue::Text(text) => Ok(text),
            other => Err(unexpected("text", other)),
        }
    }

    /// Writes `data` through a write handle; returns bytes written.
    pub async fn write(&self, data: &str) -> Result<usize> {
        match self.invoke("write", vec![Value::from(data)]).await? {
            ReplyValue::Written(n) => Ok(n),
            other => Err(unexpected("written", other)),
        }
    }

    /// Closes a file handle, flushing pending writes.
    pub async fn close(self) -> Result<()> {
        self.invoke("close", Vec::new()).await.map(|_| ())
    }

    /// Releases the object on the server.
    pub async fn release(self) -> Result<()> {
        let call = Call::Release {
            object: self.reference.id,
        };
        self.conn.lock().await.request(call).await.map(|_| ())
    }
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("reference", &self.reference)
            .finish_non_exhaustive()
    }
}

pub(crate) fn unexpected(expected: &str, got: ReplyValue) -> ClientError {
    ClientError::Protocol(format!("expected {expected} reply, got {got:?}"))
}
