//! Per-connection table of live remote objects.
//!
//! Every [`ObjectRef`] handed to a client is backed by an entry here. The
//! table is owned by a single connection task, so no locking is needed;
//! dropping the connection drops the table.
//!
//! Ids are allocated monotonically and kept in a `BTreeMap`, which makes
//! iteration order equal to creation order. Teardown relies on that.

use std::collections::BTreeMap;

use serde_json::Value;
use simbroker_core::{
    Failure, FailureKind, ObjectId, ObjectKind, ObjectRef, Outcome, BUILTIN_METHODS,
};
use simbroker_protocol::ReplyValue;
use tracing::{debug, warn};

use crate::files::{ReadProxy, WriteProxy};
use crate::session::ApplicationHandle;

/// The server-side object behind a reference.
pub enum RemoteObject {
    Reader(ReadProxy),
    Writer(WriteProxy),
    Application(Box<dyn ApplicationHandle>),
}

impl RemoteObject {
    fn kind(&self) -> ObjectKind {
        match self {
            Self::Reader(_) => ObjectKind::ReadHandle,
            Self::Writer(_) => ObjectKind::WriteHandle,
            Self::Application(handle) => ObjectKind::Application { app: handle.kind() },
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Reader(proxy) => proxy.path().display().to_string(),
            Self::Writer(proxy) => proxy.path().display().to_string(),
            Self::Application(handle) => handle.describe(),
        }
    }

    /// Releases the underlying resource.
    async fn release(self) -> Result<(), Failure> {
        match self {
            Self::Reader(_) => Ok(()),
            Self::Writer(proxy) => proxy.close(),
            Self::Application(mut handle) => handle.release().await,
        }
    }
}

struct Entry {
    reference: ObjectRef,
    object: RemoteObject,
}

/// Live objects created over one connection.
#[derive(Default)]
pub struct ObjectTable {
    next_id: u64,
    entries: BTreeMap<ObjectId, Entry>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of live application handles.
    pub fn application_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e.object, RemoteObject::Application(_)))
            .count()
    }

    /// Stores `object` and returns the reference sent to the client.
    pub fn insert(&mut self, object: RemoteObject) -> ObjectRef {
        self.next_id += 1;
        let id = ObjectId::new(self.next_id);
        let reference = ObjectRef::new(id, object.kind(), object.describe());
        debug!(object = %id, kind = ?reference.kind, "Object registered");
        self.entries.insert(
            id,
            Entry {
                reference: reference.clone(),
                object,
            },
        );
        reference
    }

    pub fn get(&self, id: ObjectId) -> Option<&ObjectRef> {
        self.entries.get(&id).map(|e| &e.reference)
    }

    /// Calls `method` on object `id`, enforcing its capability.
    pub async fn invoke(
        &mut self,
        id: ObjectId,
        method: &str,
        args: Vec<Value>,
    ) -> Outcome<ReplyValue> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Outcome::failure(Failure::not_found(format!("no live object {id}")));
        };

        if !entry.reference.allows(method) {
            debug!(object = %id, method, "Capability denied");
            return Outcome::failure(Failure::new(
                FailureKind::CapabilityDenied,
                format!("'{method}' is not exposed on {id}"),
            ));
        }

        match method {
            "describe" => return Outcome::success(ReplyValue::Text(entry.object.describe())),
            "methods" => return Outcome::success(ReplyValue::Names(methods_of(entry))),
            "close" if !matches!(entry.object, RemoteObject::Application(_)) => {
                return self.release(id).await;
            }
            _ => {}
        }

        let result = match &mut entry.object {
            RemoteObject::Reader(proxy) => match method {
                "readlines" => proxy.readlines().map(ReplyValue::Lines),
                _ => Err(unreachable_method(id, method)),
            },
            RemoteObject::Writer(proxy) => match method {
                "read" => proxy.read().map(ReplyValue::Text),
                "write" => match args.first().and_then(Value::as_str) {
                    Some(data) => proxy.write(data).map(ReplyValue::Written),
                    None => Err(Failure::new(
                        FailureKind::Io,
                        "write expects a single string argument",
                    )),
                },
                _ => Err(unreachable_method(id, method)),
            },
            RemoteObject::Application(handle) => {
                handle.invoke(method, args).await.map(ReplyValue::Json)
            }
        };
        result.into()
    }

    /// Releases a single object.
    pub async fn release(&mut self, id: ObjectId) -> Outcome<ReplyValue> {
        match self.entries.remove(&id) {
            Some(entry) => {
                debug!(object = %id, "Object released");
                entry.object.release().await.map(|()| ReplyValue::Unit).into()
            }
            None => Outcome::failure(Failure::not_found(format!("no live object {id}"))),
        }
    }

    /// Releases every application handle in creation order.
    ///
    /// Failures are logged and skipped; the remaining handles are still
    /// released. Returns how many handles were released.
    pub async fn release_applications(&mut self) -> usize {
        let ids: Vec<ObjectId> = self
            .entries
            .iter()
            .filter(|(_, e)| matches!(e.object, RemoteObject::Application(_)))
            .map(|(id, _)| *id)
            .collect();
        self.release_ids(ids).await
    }

    /// Releases every object in creation order.
    pub async fn release_all(&mut self) -> usize {
        let ids: Vec<ObjectId> = self.entries.keys().copied().collect();
        self.release_ids(ids).await
    }

    async fn release_ids(&mut self, ids: Vec<ObjectId>) -> usize {
        let mut released = 0;
        for id in ids {
            let Some(entry) = self.entries.remove(&id) else {
                continue;
            };
            match entry.object.release().await {
                Ok(()) => released += 1,
                Err(e) => warn!(object = %id, error = %e, "Failed to release object"),
            }
        }
        released
    }
}

fn methods_of(entry: &Entry) -> Vec<String> {
    let mut names: Vec<String> = match (&entry.object, entry.reference.kind.capability().allow_list()) {
        (_, Some(list)) => list.iter().map(|m| m.to_string()).collect(),
        (RemoteObject::Application(handle), None) => handle.methods(),
        (_, None) => Vec::new(),
    };
    names.extend(BUILTIN_METHODS.iter().map(|m| m.to_string()));
    names
}

fn unreachable_method(id: ObjectId, method: &str) -> Failure {
    Failure::new(
        FailureKind::CapabilityDenied,
        format!("'{method}' is not exposed on {id}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files;
    use async_trait::async_trait;
    use serde_json::json;
    use simbroker_core::AppKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Recorder {
        kind: AppKind,
        tag: usize,
        order: Arc<Mutex<Vec<usize>>>,
        fail: bool,
        releases: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ApplicationHandle for Recorder {
        fn kind(&self) -> AppKind {
            self.kind
        }

        fn describe(&self) -> String {
            format!("recorder {}", self.tag)
        }

        async fn invoke(&mut self, method: &str, args: Vec<Value>) -> Result<Value, Failure> {
            Ok(json!({ "method": method, "args": args }))
        }

        async fn release(&mut self) -> Result<(), Failure> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(self.tag);
            if self.fail {
                return Err(Failure::new(FailureKind::Application, "refused"));
            }
            Ok(())
        }
    }

    fn recorder(
        tag: usize,
        order: &Arc<Mutex<Vec<usize>>>,
        releases: &Arc<AtomicUsize>,
        fail: bool,
    ) -> RemoteObject {
        RemoteObject::Application(Box::new(Recorder {
            kind: AppKind::Circuit,
            tag,
            order: order.clone(),
            fail,
            releases: releases.clone(),
        }))
    }

    #[tokio::test]
    async fn test_read_handle_rejects_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, "one\ntwo\n").unwrap();

        let mut table = ObjectTable::new();
        let obj = table.insert(RemoteObject::Reader(files::open(&path).unwrap()));
        assert_eq!(obj.kind, ObjectKind::ReadHandle);

        let denied = table.invoke(obj.id, "write", vec![json!("x")]).await;
        assert_eq!(denied.failure_kind(), Some(FailureKind::CapabilityDenied));

        let lines = table.invoke(obj.id, "readlines", vec![]).await;
        assert_eq!(
            lines.into_result().unwrap(),
            ReplyValue::Lines(vec!["one\n".to_string(), "two\n".to_string()])
        );
    }

    #[tokio::test]
    async fn test_write_handle_methods_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        let mut table = ObjectTable::new();
        let obj = table.insert(RemoteObject::Writer(files::create(&path).unwrap()));

        let written = table.invoke(obj.id, "write", vec![json!("hello")]).await;
        assert_eq!(written.into_result().unwrap(), ReplyValue::Written(5));

        let denied = table.invoke(obj.id, "readlines", vec![]).await;
        assert_eq!(denied.failure_kind(), Some(FailureKind::CapabilityDenied));

        let methods = table.invoke(obj.id, "methods", vec![]).await;
        assert_eq!(
            methods.into_result().unwrap(),
            ReplyValue::Names(
                ["read", "write", "close", "describe", "methods"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            )
        );

        assert!(table.invoke(obj.id, "close", vec![]).await.is_success());
        assert!(table.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");

        let gone = table.invoke(obj.id, "read", vec![]).await;
        assert_eq!(gone.failure_kind(), Some(FailureKind::NotFound));
    }

    #[tokio::test]
    async fn test_application_is_permissive() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let releases = Arc::new(AtomicUsize::new(0));
        let mut table = ObjectTable::new();
        let obj = table.insert(recorder(1, &order, &releases, false));

        let reply = table.invoke(obj.id, "solve", vec![json!("setup1")]).await;
        assert_eq!(
            reply.into_result().unwrap(),
            ReplyValue::Json(json!({ "method": "solve", "args": ["setup1"] }))
        );
        let describe = table.invoke(obj.id, "describe", vec![]).await;
        assert_eq!(
            describe.into_result().unwrap(),
            ReplyValue::Text("recorder 1".to_string())
        );
    }

    #[tokio::test]
    async fn test_release_all_in_creation_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let releases = Arc::new(AtomicUsize::new(0));
        let mut table = ObjectTable::new();
        for tag in 0..5 {
            table.insert(recorder(tag, &order, &releases, false));
        }

        assert_eq!(table.release_applications().await, 5);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(releases.load(Ordering::SeqCst), 5);

        // Nothing left, nothing released twice.
        assert_eq!(table.release_applications().await, 0);
        assert_eq!(releases.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_release_failure_does_not_stop_teardown() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let releases = Arc::new(AtomicUsize::new(0));
        let mut table = ObjectTable::new();
        for tag in 0..4 {
            table.insert(recorder(tag, &order, &releases, tag == 1));
        }

        assert_eq!(table.release_all().await, 3);
        assert_eq!(releases.load(Ordering::SeqCst), 4);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_object() {
        let mut table = ObjectTable::new();
        let reply = table.release(ObjectId::new(42)).await;
        assert_eq!(reply.failure_kind(), Some(FailureKind::NotFound));
    }
}
