//! RemoteTreeStore trait - the contract the remote backend must expose.
//!
//! The store owns the wire transport, the durable data and the internal
//! read/apply/commit/retry cycle of transactions. This crate only consumes
//! it through this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::fmt;
use std::sync::Arc;

use crate::codec::WireValue;
use crate::error::Result;
use crate::event::EventKind;
use crate::path::TreePath;

/// Wire object used for shallow multi-key merges.
pub type WireMap = serde_json::Map<String, WireValue>;

/// Update function handed to the store for a transaction.
///
/// Receives the current wire value (`Null` if absent); `None` vetoes the
/// commit. The store may invoke it any number of times.
pub type WireUpdate = Arc<dyn Fn(&WireValue) -> Option<WireValue> + Send + Sync>;

/// Callback receiving transport signals for one subscription.
pub type NotificationSink = Arc<dyn Fn(TransportSignal) + Send + Sync>;

/// Opaque handle identifying a store-side subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(pub u64);

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A raw change pushed by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNotification {
    /// Key of the node the value belongs to.
    pub key: Option<String>,
    /// Raw wire value of that node.
    pub value: WireValue,
    /// Key of the preceding sibling, for child events. Ordering hint only.
    pub previous_sibling: Option<String>,
}

/// Signal delivered to a subscription's sink.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    Notification(RawNotification),
    /// The store terminated the subscription.
    Cancelled(String),
}

/// Ordering hint attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Priority {
    Number(Number),
    String(String),
}

impl Priority {
    /// Wire form of the priority.
    pub fn to_wire(&self) -> WireValue {
        match self {
            Priority::Number(n) => WireValue::Number(n.clone()),
            Priority::String(s) => WireValue::String(s.clone()),
        }
    }
}

impl From<i64> for Priority {
    fn from(n: i64) -> Self {
        Priority::Number(n.into())
    }
}

impl From<&str> for Priority {
    fn from(s: &str) -> Self {
        Priority::String(s.to_string())
    }
}

impl From<String> for Priority {
    fn from(s: String) -> Self {
        Priority::String(s)
    }
}

/// Why a transaction ended without committing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// The update function returned `None`.
    Vetoed,
    /// Conflicts persisted past the configured retry bound.
    MaxRetries,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Vetoed => f.write_str("vetoed"),
            AbortReason::MaxRetries => f.write_str("maximum retries exceeded"),
        }
    }
}

/// Final state of an optimistic transaction.
///
/// `attempts` counts invocations of the update function.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome<T> {
    Committed { value: T, attempts: u32 },
    Aborted { reason: AbortReason, attempts: u32 },
}

impl<T> TransactionOutcome<T> {
    /// True if the transaction committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed { .. })
    }

    /// The committed value, if any.
    pub fn committed(&self) -> Option<&T> {
        match self {
            TransactionOutcome::Committed { value, .. } => Some(value),
            TransactionOutcome::Aborted { .. } => None,
        }
    }

    /// Update function invocations, whichever way it ended.
    pub fn attempts(&self) -> u32 {
        match self {
            TransactionOutcome::Committed { attempts, .. }
            | TransactionOutcome::Aborted { attempts, .. } => *attempts,
        }
    }

    /// Transform the committed value, keeping the attempt count.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TransactionOutcome<U> {
        match self {
            TransactionOutcome::Committed { value, attempts } => TransactionOutcome::Committed {
                value: f(value),
                attempts,
            },
            TransactionOutcome::Aborted { reason, attempts } => {
                TransactionOutcome::Aborted { reason, attempts }
            }
        }
    }
}

/// A write the store applies when the client stops syncing.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredWrite {
    Set(WireValue),
    Update(WireMap),
    Remove,
}

/// The remote backend as seen by the client core.
///
/// All writes resolve once the store acknowledges them. Notifications for a
/// subscription must be delivered to its sink in the order the transport
/// emits them.
#[async_trait]
pub trait RemoteTreeStore: Send + Sync {
    /// Single-shot read. Absent nodes read as `Null`.
    async fn read(&self, path: &TreePath) -> Result<WireValue>;

    /// Overwrite a node. Writing `Null` removes it.
    async fn write(&self, path: &TreePath, value: WireValue) -> Result<()>;

    /// Shallow merge of the given children into a node.
    async fn update(&self, path: &TreePath, partial: WireMap) -> Result<()>;

    /// Remove a node and everything below it.
    async fn delete(&self, path: &TreePath) -> Result<()>;

    /// Path of a new child with a store-generated, time-ordered, unique key.
    fn push(&self, path: &TreePath) -> Result<TreePath>;

    /// Optimistic read/apply/commit cycle, retried on conflicting writes.
    ///
    /// `max_retries` bounds re-attempts after the first; `None` is unbounded.
    async fn transact(
        &self,
        path: &TreePath,
        update: WireUpdate,
        max_retries: Option<u32>,
    ) -> Result<TransactionOutcome<WireValue>>;

    /// Set or clear a node's ordering hint.
    async fn set_priority(&self, path: &TreePath, priority: Option<Priority>) -> Result<()>;

    /// Start delivering signals for `kind` events at `path` to `sink`.
    fn subscribe(
        &self,
        path: &TreePath,
        kind: EventKind,
        sink: NotificationSink,
    ) -> Result<SubscriptionToken>;

    /// Stop a subscription. Unknown tokens are not an error.
    fn unsubscribe(&self, token: SubscriptionToken) -> Result<()>;

    /// Queue a write to apply when the client stops syncing.
    async fn defer_on_disconnect(&self, path: &TreePath, write: DeferredWrite) -> Result<()>;

    /// Drop queued writes at or below `path`.
    async fn cancel_on_disconnect(&self, path: &TreePath) -> Result<()>;

    /// Connectivity intent, driven only by the connectivity manager.
    fn set_sync_intent(&self, online: bool);
}
