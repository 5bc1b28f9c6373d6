//! Path-addressed handles into the remote tree.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::warn;

use crate::client::ClientContext;
use crate::codec::{self, hydrate_owned, serialize};
use crate::error::Result;
use crate::event::{AsEventKind, Listener, Snapshot};
use crate::path::{IntoKorks, TreePath};
use crate::registry::Subscription;
use crate::store::{DeferredWrite, Priority, RemoteTreeStore, TransactionOutcome, WireMap};
use crate::value::{Mapping, Value};
use crate::watch::EventStream;

/// Immutable handle to one node. Two references are equal iff their paths are.
#[derive(Clone)]
pub struct Reference {
    path: TreePath,
    ctx: Arc<ClientContext>,
}

impl Reference {
    pub(crate) fn new(ctx: Arc<ClientContext>, path: TreePath) -> Self {
        Self { path, ctx }
    }

    fn at(&self, path: TreePath) -> Self {
        Self::new(self.ctx.clone(), path)
    }

    /// Full path from the root.
    pub fn path(&self) -> &TreePath {
        &self.path
    }

    /// Last path segment; `None` at the root.
    pub fn key(&self) -> Option<&str> {
        self.path.key()
    }

    /// Reference one level down. The segment is validated.
    pub fn child(&self, segment: &str) -> Result<Reference> {
        Ok(self.at(self.path.child(segment)?))
    }

    /// Descend by korks. Empty korks return this reference unchanged.
    pub fn resolve(&self, korks: impl IntoKorks) -> Result<Reference> {
        Ok(self.at(self.path.resolve(korks)?))
    }

    /// Reference one level up, or `None` at the root.
    pub fn parent(&self) -> Option<Reference> {
        self.path.parent().map(|path| self.at(path))
    }

    /// Reference to the root of the same tree.
    pub fn root(&self) -> Reference {
        self.at(TreePath::root())
    }

    /// Parents up to the root, nearest first. Lazy; each call starts over.
    pub fn ancestors(&self) -> impl Iterator<Item = Reference> {
        let ctx = self.ctx.clone();
        self.path
            .ancestors()
            .map(move |path| Reference::new(ctx.clone(), path))
    }

    /// Single-shot read of the current value.
    pub async fn read(&self) -> Result<Snapshot> {
        let wire = self.ctx.store.read(&self.path).await?;
        Ok(Snapshot::new(
            self.key().map(str::to_string),
            hydrate_owned(wire),
        ))
    }

    /// Read and deserialize into a typed structure.
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T> {
        self.read().await?.deserialize()
    }

    /// Overwrite the node. Writing `Value::Null` removes it.
    pub async fn set(&self, value: impl Into<Value>) -> Result<()> {
        let wire = serialize(&value.into());
        self.logged("set", self.ctx.store.write(&self.path, wire).await)
    }

    /// Overwrite the node with serialized `data`.
    pub async fn set_json<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
        self.set(codec::to_value(data)?).await
    }

    /// Shallow merge: each key replaces that child, other children are kept.
    pub async fn update(&self, partial: Mapping) -> Result<()> {
        let partial = Self::wire_children(&self.path, partial)?;
        self.logged("update", self.ctx.store.update(&self.path, partial).await)
    }

    /// Delete the node and everything below it.
    pub async fn remove(&self) -> Result<()> {
        self.logged("remove", self.ctx.store.delete(&self.path).await)
    }

    /// Child with a store-generated, time-ordered key. Nothing is written.
    pub fn push(&self) -> Result<Reference> {
        Ok(self.at(self.ctx.store.push(&self.path)?))
    }

    /// Append `value` under a new time-ordered key.
    pub async fn push_value(&self, value: impl Into<Value>) -> Result<Reference> {
        let value = value.into();
        let child = self.push()?;
        child.set(value).await?;
        Ok(child)
    }

    /// Set or clear the ordering hint.
    pub async fn set_priority(&self, priority: Option<Priority>) -> Result<()> {
        self.logged(
            "set_priority",
            self.ctx.store.set_priority(&self.path, priority).await,
        )
    }

    /// Writes the store applies when this client stops syncing.
    pub fn on_disconnect(&self) -> OnDisconnect {
        OnDisconnect {
            path: self.path.clone(),
            store: self.ctx.store.clone(),
        }
    }

    /// Subscribe to one event kind at this node.
    pub fn on(&self, kind: impl AsEventKind, listener: Arc<dyn Listener>) -> Result<Subscription> {
        self.ctx.registry.register(&self.path, kind, listener)
    }

    /// Subscribe to all four child event kinds with one teardown handle.
    pub fn on_children(&self, listener: Arc<dyn Listener>) -> Result<Subscription> {
        self.ctx.registry.register_all_children(&self.path, listener)
    }

    /// Subscribe and receive events as a stream.
    pub fn watch(&self, kind: impl AsEventKind) -> Result<EventStream> {
        EventStream::open(&self.ctx.registry, &self.path, kind)
    }

    /// Optimistic update; see [`crate::TransactionEngine::transact`].
    pub async fn transact<F>(&self, update: F) -> Result<TransactionOutcome<Snapshot>>
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.ctx.transactions.transact(&self.path, update).await
    }

    fn wire_children(path: &TreePath, partial: Mapping) -> Result<WireMap> {
        partial
            .into_iter()
            .map(|(key, value)| {
                path.child(key.name())?;
                Ok((key.name().to_string(), serialize(&value)))
            })
            .collect()
    }

    fn logged<T>(&self, op: &str, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            warn!(path = %self.path, op, error = %err, "write failed");
        }
        result
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Reference {}

impl Hash for Reference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reference").field(&self.path.to_string()).finish()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.path, f)
    }
}

/// Writes queued against one node, applied when the client stops syncing.
pub struct OnDisconnect {
    path: TreePath,
    store: Arc<dyn RemoteTreeStore>,
}

impl OnDisconnect {
    /// Overwrite the node on disconnect.
    pub async fn set(&self, value: impl Into<Value>) -> Result<()> {
        let wire = serialize(&value.into());
        self.store
            .defer_on_disconnect(&self.path, DeferredWrite::Set(wire))
            .await
    }

    /// Merge `partial` into the node on disconnect.
    pub async fn update(&self, partial: Mapping) -> Result<()> {
        let partial = Reference::wire_children(&self.path, partial)?;
        self.store
            .defer_on_disconnect(&self.path, DeferredWrite::Update(partial))
            .await
    }

    /// Delete the node on disconnect.
    pub async fn remove(&self) -> Result<()> {
        self.store
            .defer_on_disconnect(&self.path, DeferredWrite::Remove)
            .await
    }

    /// Drop queued writes at and below this node before they fire.
    pub async fn cancel(&self) -> Result<()> {
        self.store.cancel_on_disconnect(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TreeClient;
    use crate::event::{Event, EventKind};
    use crate::memory::MemoryTreeStore;
    use crate::TreeError;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::json;

    fn client() -> (Arc<MemoryTreeStore>, TreeClient) {
        let store = Arc::new(MemoryTreeStore::new());
        (store.clone(), TreeClient::new(store))
    }

    #[test]
    fn test_navigation() {
        let (_store, client) = client();
        let score = client.reference("users/ada/score").unwrap();
        assert_eq!(score.key(), Some("score"));
        assert_eq!(score.parent().unwrap(), client.reference("users/ada").unwrap());
        assert_eq!(score.root(), client.root());
        assert_eq!(score.resolve("").unwrap(), score);
        assert_eq!(
            score.ancestors().map(|r| r.to_string()).collect::<Vec<_>>(),
            vec!["/users/ada", "/users", "/"]
        );
        assert!(client.root().parent().is_none());
        assert!(matches!(
            score.child("a.b").unwrap_err(),
            TreeError::InvalidPath { .. }
        ));
    }

    #[tokio::test]
    async fn test_set_update_remove() {
        let (store, client) = client();
        let user = client.reference("users/ada").unwrap();
        user.set(Value::map([("name", "ada"), ("lang", "en")]))
            .await
            .unwrap();

        let mut partial = Mapping::new();
        partial.insert("lang".into(), Value::from("fr"));
        partial.insert("age".into(), Value::from(36));
        user.update(partial).await.unwrap();

        let snapshot = user.read().await.unwrap();
        assert_eq!(snapshot.key(), Some("ada"));
        assert_eq!(snapshot.value().get("lang"), Some(&Value::from("fr")));
        assert_eq!(snapshot.value().get("name"), Some(&Value::from("ada")));
        assert_eq!(snapshot.value().get("age"), Some(&Value::from(36)));

        user.remove().await.unwrap();
        assert_eq!(store.dump(), json!(null));
        assert!(!user.read().await.unwrap().exists());
    }

    #[tokio::test]
    async fn test_update_rejects_bad_key_before_store() {
        let (store, client) = client();
        store.fail_writes(Some("should not be reached"));
        let mut partial = Mapping::new();
        partial.insert("bad#key".into(), Value::from(1));
        let err = client.root().update(partial).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Room {
            topic: String,
            members: Vec<String>,
        }

        let (_store, client) = client();
        let room = Room {
            topic: "rust".to_string(),
            members: vec!["ada".to_string(), "bo".to_string()],
        };
        let r = client.reference("rooms/r1").unwrap();
        r.set_json(&room).await.unwrap();
        assert_eq!(r.read_json::<Room>().await.unwrap(), room);
        assert_eq!(
            client
                .reference("rooms/missing")
                .unwrap()
                .read_json::<Option<Room>>()
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_push_value() {
        let (store, client) = client();
        let list = client.reference("messages").unwrap();
        let first = list.push_value("hello").await.unwrap();
        let second = list.push_value("world").await.unwrap();

        assert_eq!(first.parent().unwrap(), list);
        assert!(first.key() < second.key());
        let messages = store.dump();
        assert_eq!(messages["messages"].as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_surfaces() {
        let (store, client) = client();
        store.fail_writes(Some("permission denied"));
        let r = client.reference("a").unwrap();
        assert_eq!(
            r.set(1).await.unwrap_err(),
            TreeError::Remote("permission denied".to_string())
        );
        assert!(r.remove().await.is_err());
        assert!(r.set_priority(Some(Priority::from(1))).await.is_err());
    }

    #[tokio::test]
    async fn test_priority_emits_child_moved() {
        let (_store, client) = client();
        let list = client.reference("list").unwrap();
        list.child("a").unwrap().set(1).await.unwrap();
        let moved = Arc::new(Mutex::new(Vec::new()));
        let sub = {
            let moved = moved.clone();
            list.on(
                EventKind::ChildMoved,
                Arc::new(move |event: Event| {
                    moved.lock().push(event.snapshot.key().map(str::to_string));
                }),
            )
            .unwrap()
        };

        list.child("a")
            .unwrap()
            .set_priority(Some(Priority::from("first")))
            .await
            .unwrap();
        assert_eq!(*moved.lock(), vec![Some("a".to_string())]);
        sub.unsubscribe().unwrap();
    }

    #[tokio::test]
    async fn test_on_disconnect_and_cancel() {
        let (store, client) = client();
        let presence = client.reference("presence/ada").unwrap();
        presence.set("online").await.unwrap();
        presence.on_disconnect().set("offline").await.unwrap();

        let typing = client.reference("typing/ada").unwrap();
        typing.set(true).await.unwrap();
        typing.on_disconnect().remove().await.unwrap();
        typing.on_disconnect().cancel().await.unwrap();
        assert_eq!(store.deferred_len(), 1);

        client.connectivity().go_offline();
        assert_eq!(
            presence.read().await.unwrap().value(),
            &Value::from("offline")
        );
        assert_eq!(typing.read().await.unwrap().value(), &Value::from(true));
    }

    #[tokio::test]
    async fn test_on_disconnect_update() {
        let (_store, client) = client();
        let user = client.reference("users/ada").unwrap();
        user.set(Value::map([("status", "online"), ("name", "ada")]))
            .await
            .unwrap();
        user.on_disconnect()
            .update([(crate::Key::from("status"), Value::from("away"))].into_iter().collect())
            .await
            .unwrap();

        client.connectivity().go_offline();
        let snapshot = user.read().await.unwrap();
        assert_eq!(snapshot.value().get("status"), Some(&Value::from("away")));
        assert_eq!(snapshot.value().get("name"), Some(&Value::from("ada")));
    }

    #[test]
    fn test_equality_is_by_path() {
        let (_store, a) = client();
        let (_other, b) = client();
        assert_eq!(a.reference("x/y").unwrap(), b.reference(["x", "y"]).unwrap());
        assert_ne!(a.reference("x").unwrap(), a.reference("y").unwrap());
    }
}
