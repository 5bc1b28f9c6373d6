//! Event kinds, snapshots and the listener capability.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::codec;
use crate::error::{Result, TreeError};
use crate::path::TreePath;
use crate::value::Value;

/// Kind of change a subscription listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A child was added below the subscribed node.
    ChildAdded,
    /// A child's value changed.
    ChildChanged,
    /// A child's ordering position changed.
    ChildMoved,
    /// A child was removed.
    ChildRemoved,
    /// The subscribed node's value changed.
    Value,
}

impl EventKind {
    /// Every supported kind.
    pub const ALL: [EventKind; 5] = [
        EventKind::ChildAdded,
        EventKind::ChildChanged,
        EventKind::ChildMoved,
        EventKind::ChildRemoved,
        EventKind::Value,
    ];

    /// The four kinds describing changes to children.
    pub const CHILDREN: [EventKind; 4] = [
        EventKind::ChildAdded,
        EventKind::ChildChanged,
        EventKind::ChildMoved,
        EventKind::ChildRemoved,
    ];

    /// Wire name, e.g. `child-added`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ChildAdded => "child-added",
            EventKind::ChildChanged => "child-changed",
            EventKind::ChildMoved => "child-moved",
            EventKind::ChildRemoved => "child-removed",
            EventKind::Value => "value",
        }
    }

    /// True for the four child kinds.
    pub fn is_child_event(&self) -> bool {
        !matches!(self, EventKind::Value)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "child-added" | "child_added" => Ok(EventKind::ChildAdded),
            "child-changed" | "child_changed" => Ok(EventKind::ChildChanged),
            "child-moved" | "child_moved" => Ok(EventKind::ChildMoved),
            "child-removed" | "child_removed" => Ok(EventKind::ChildRemoved),
            "value" => Ok(EventKind::Value),
            other => Err(TreeError::UnknownEventKind(other.to_string())),
        }
    }
}

/// Anything that names an event kind, checked at registration time.
pub trait AsEventKind {
    fn event_kind(self) -> Result<EventKind>;
}

impl AsEventKind for EventKind {
    fn event_kind(self) -> Result<EventKind> {
        Ok(self)
    }
}

impl AsEventKind for &str {
    fn event_kind(self) -> Result<EventKind> {
        self.parse()
    }
}

impl AsEventKind for String {
    fn event_kind(self) -> Result<EventKind> {
        self.parse()
    }
}

/// Decoded `(key, value)` pair delivered by a read or a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    key: Option<String>,
    value: Value,
}

impl Snapshot {
    pub(crate) fn new(key: Option<String>, value: Value) -> Self {
        Self { key, value }
    }

    /// Last path segment of the originating node; `None` at the root.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Decoded data. `Value::Null` when the node is absent.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Take the decoded data.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// True if the node holds data.
    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    /// Deserialize the value into a typed structure.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        codec::from_value(&self.value)
    }
}

/// A change notification delivered to a listener.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub snapshot: Snapshot,
    /// Node the snapshot describes: the subscribed node for `value`, the
    /// child for child events.
    pub path: TreePath,
}

/// Receives events for a subscription.
///
/// Override `on_event` to handle every kind in one place, or the per-kind
/// methods for the ones you care about. Closures `Fn(Event)` implement this
/// trait directly.
pub trait Listener: Send + Sync {
    fn on_event(&self, event: Event) {
        match event.kind {
            EventKind::ChildAdded => self.on_child_added(event.snapshot),
            EventKind::ChildChanged => self.on_child_changed(event.snapshot),
            EventKind::ChildMoved => self.on_child_moved(event.snapshot),
            EventKind::ChildRemoved => self.on_child_removed(event.snapshot),
            EventKind::Value => self.on_value(event.snapshot),
        }
    }

    fn on_value(&self, _snapshot: Snapshot) {}

    fn on_child_added(&self, _snapshot: Snapshot) {}

    fn on_child_changed(&self, _snapshot: Snapshot) {}

    fn on_child_moved(&self, _snapshot: Snapshot) {}

    fn on_child_removed(&self, _snapshot: Snapshot) {}

    /// The transport cancelled the subscription. No further events follow.
    fn on_cancel(&self, _error: &TreeError) {}
}

impl<F> Listener for F
where
    F: Fn(Event) + Send + Sync,
{
    fn on_event(&self, event: Event) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_parse_event_kinds() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert_eq!("child_added".parse::<EventKind>().unwrap(), EventKind::ChildAdded);
    }

    #[test]
    fn test_unknown_event_kind() {
        let err = "child-renamed".parse::<EventKind>().unwrap_err();
        assert_eq!(err, TreeError::UnknownEventKind("child-renamed".to_string()));
        assert!("Value".event_kind().is_err());
    }

    #[test]
    fn test_event_kind_serde() {
        let json = serde_json::to_string(&EventKind::ChildRemoved).unwrap();
        assert_eq!(json, "\"child-removed\"");
        let kind: EventKind = serde_json::from_str("\"value\"").unwrap();
        assert_eq!(kind, EventKind::Value);
    }

    #[test]
    fn test_child_kinds() {
        assert!(EventKind::CHILDREN.iter().all(EventKind::is_child_event));
        assert!(!EventKind::Value.is_child_event());
    }

    #[test]
    fn test_per_kind_dispatch() {
        #[derive(Default)]
        struct Removals(Mutex<Vec<String>>);

        impl Listener for Removals {
            fn on_child_removed(&self, snapshot: Snapshot) {
                self.0.lock().push(snapshot.key().unwrap_or_default().to_string());
            }
        }

        let listener = Removals::default();
        let path: TreePath = "/list/a".parse().unwrap();
        listener.on_event(Event {
            kind: EventKind::ChildAdded,
            snapshot: Snapshot::new(Some("a".to_string()), Value::from(1)),
            path: path.clone(),
        });
        listener.on_event(Event {
            kind: EventKind::ChildRemoved,
            snapshot: Snapshot::new(Some("a".to_string()), Value::Null),
            path,
        });
        assert_eq!(*listener.0.lock(), vec!["a".to_string()]);
    }

    #[test]
    fn test_snapshot_deserialize() {
        let snapshot = Snapshot::new(Some("n".to_string()), Value::from(5));
        assert!(snapshot.exists());
        assert_eq!(snapshot.deserialize::<i64>().unwrap(), 5);
        assert!(!Snapshot::new(None, Value::Null).exists());
    }
}
