//! In-memory remote tree store.
//!
//! Holds the whole tree as one wire value behind a `RwLock` and delivers
//! notifications synchronously through a single drain queue. Intended for
//! tests and development: nothing is durable and there is no transport.
//!
//! Test hooks simulate the behavior of a real backend that cannot be
//! provoked deterministically otherwise: concurrent writers landing inside a
//! transaction, transport cancellations and store-side failures.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::codec::WireValue;
use crate::error::{Result, TreeError};
use crate::event::EventKind;
use crate::path::TreePath;
use crate::push_id::PushIdGenerator;
use crate::store::{
    AbortReason, DeferredWrite, NotificationSink, Priority, RawNotification, RemoteTreeStore,
    SubscriptionToken, TransactionOutcome, TransportSignal, WireMap, WireUpdate,
};

type Delivery = (NotificationSink, TransportSignal);

struct StoreListener {
    path: TreePath,
    kind: EventKind,
    sink: NotificationSink,
}

struct TreeState {
    root: WireValue,
    priorities: HashMap<TreePath, WireValue>,
    listeners: BTreeMap<SubscriptionToken, StoreListener>,
    deferred: Vec<(TreePath, DeferredWrite)>,
    online: bool,
}

#[derive(Default)]
struct Hooks {
    write_error: Option<String>,
    fail_unsubscribe: bool,
    interposed: VecDeque<(TreePath, WireValue)>,
}

/// Serializes delivery so batches from concurrent or reentrant writers
/// never interleave.
///
/// Writers `enqueue` while still holding the state write lock, so batches
/// sit in the queue in commit order, and `drain` after releasing it.
#[derive(Default)]
struct Outbox {
    queue: Mutex<VecDeque<Delivery>>,
    draining: AtomicBool,
}

impl Outbox {
    fn enqueue(&self, batch: Vec<Delivery>) {
        self.queue.lock().extend(batch);
    }

    fn drain(&self) {
        loop {
            if self.draining.swap(true, Ordering::AcqRel) {
                // The active drainer picks our batch up.
                return;
            }
            loop {
                let next = self.queue.lock().pop_front();
                match next {
                    Some((sink, signal)) => sink(signal),
                    None => break,
                }
            }
            self.draining.store(false, Ordering::Release);
            if self.queue.lock().is_empty() {
                return;
            }
        }
    }
}

/// In-memory implementation of [`RemoteTreeStore`].
pub struct MemoryTreeStore {
    state: RwLock<TreeState>,
    outbox: Outbox,
    push_ids: Mutex<PushIdGenerator>,
    next_token: AtomicU64,
    hooks: Mutex<Hooks>,
}

impl MemoryTreeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TreeState {
                root: WireValue::Null,
                priorities: HashMap::new(),
                listeners: BTreeMap::new(),
                deferred: Vec::new(),
                online: true,
            }),
            outbox: Outbox::default(),
            push_ids: Mutex::new(PushIdGenerator::new()),
            next_token: AtomicU64::new(1),
            hooks: Mutex::new(Hooks::default()),
        }
    }

    /// Create a store pre-populated with `root`.
    pub fn with_data(root: WireValue) -> Self {
        let store = Self::new();
        store.state.write().root = prune(root);
        store
    }

    /// A copy of the entire tree.
    pub fn dump(&self) -> WireValue {
        self.state.read().root.clone()
    }

    /// Number of store-side subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.read().listeners.len()
    }

    /// Number of queued on-disconnect writes.
    pub fn deferred_len(&self) -> usize {
        self.state.read().deferred.len()
    }

    /// Whether the store currently considers the client syncing.
    pub fn is_online(&self) -> bool {
        self.state.read().online
    }

    /// Queue a write that lands between the next transaction attempt's
    /// apply and commit, as a concurrent writer would.
    pub fn interpose_write(&self, path: &TreePath, value: WireValue) {
        self.hooks.lock().interposed.push_back((path.clone(), value));
    }

    /// Make every write fail with `reason`, or succeed again with `None`.
    pub fn fail_writes(&self, reason: Option<&str>) {
        self.hooks.lock().write_error = reason.map(str::to_string);
    }

    /// Make unsubscribe calls fail.
    pub fn fail_unsubscribes(&self, fail: bool) {
        self.hooks.lock().fail_unsubscribe = fail;
    }

    /// Terminate every subscription at `path`, as a transport revoking
    /// access would. Returns how many were cancelled.
    pub fn cancel_subscriptions(&self, path: &TreePath, reason: &str) -> usize {
        let count = {
            let mut state = self.state.write();
            let tokens: Vec<SubscriptionToken> = state
                .listeners
                .iter()
                .filter(|(_, l)| &l.path == path)
                .map(|(token, _)| *token)
                .collect();
            let cancelled: Vec<Delivery> = tokens
                .into_iter()
                .filter_map(|token| state.listeners.remove(&token))
                .map(|l| (l.sink, TransportSignal::Cancelled(reason.to_string())))
                .collect();
            let count = cancelled.len();
            self.outbox.enqueue(cancelled);
            count
        };
        info!(path = %path, count, reason, "cancelling subscriptions");
        self.outbox.drain();
        count
    }

    fn check_writable(&self) -> Result<()> {
        match &self.hooks.lock().write_error {
            Some(reason) => Err(TreeError::Remote(reason.clone())),
            None => Ok(()),
        }
    }

    /// Apply `change` to the tree and collect the resulting notifications.
    fn commit(state: &mut TreeState, change: impl FnOnce(&mut WireValue)) -> Vec<Delivery> {
        let before = state.root.clone();
        change(&mut state.root);

        let root = &state.root;
        state.priorities.retain(|path, _| value_at(root, path).is_some());

        state
            .listeners
            .values()
            .flat_map(|listener| {
                notifications(listener, &before, root)
                    .into_iter()
                    .map(move |signal| (listener.sink.clone(), signal))
            })
            .collect()
    }

    fn apply(&self, change: impl FnOnce(&mut WireValue)) {
        {
            let mut state = self.state.write();
            let deliveries = Self::commit(&mut state, change);
            self.outbox.enqueue(deliveries);
        }
        self.outbox.drain();
    }

    fn apply_deferred(&self, path: TreePath, write: DeferredWrite) {
        match write {
            DeferredWrite::Set(value) => self.apply(|root| write_at(root, path.segments(), value)),
            DeferredWrite::Update(partial) => {
                let children = child_writes(&path, partial);
                match children {
                    Ok(children) => self.apply(|root| {
                        for (child, value) in children {
                            write_at(root, child.segments(), value);
                        }
                    }),
                    Err(err) => debug!(path = %path, error = %err, "skipping invalid deferred update"),
                }
            }
            DeferredWrite::Remove => self.apply(|root| write_at(root, path.segments(), WireValue::Null)),
        }
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl Default for MemoryTreeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteTreeStore for MemoryTreeStore {
    async fn read(&self, path: &TreePath) -> Result<WireValue> {
        Ok(read_at(&self.state.read().root, path))
    }

    async fn write(&self, path: &TreePath, value: WireValue) -> Result<()> {
        self.check_writable()?;
        debug!(path = %path, "write");
        self.apply(|root| write_at(root, path.segments(), value));
        Ok(())
    }

    async fn update(&self, path: &TreePath, partial: WireMap) -> Result<()> {
        self.check_writable()?;
        let children = child_writes(path, partial)?;
        debug!(path = %path, keys = children.len(), "update");
        self.apply(|root| {
            for (child, value) in children {
                write_at(root, child.segments(), value);
            }
        });
        Ok(())
    }

    async fn delete(&self, path: &TreePath) -> Result<()> {
        self.check_writable()?;
        debug!(path = %path, "delete");
        self.apply(|root| write_at(root, path.segments(), WireValue::Null));
        Ok(())
    }

    fn push(&self, path: &TreePath) -> Result<TreePath> {
        let key = self.push_ids.lock().generate(Self::now_ms());
        path.child(&key)
    }

    async fn transact(
        &self,
        path: &TreePath,
        update: WireUpdate,
        max_retries: Option<u32>,
    ) -> Result<TransactionOutcome<WireValue>> {
        self.check_writable()?;

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let current = read_at(&self.state.read().root, path);
            let Some(proposed) = update(&current) else {
                return Ok(TransactionOutcome::Aborted {
                    reason: AbortReason::Vetoed,
                    attempts,
                });
            };

            let interposed = self.hooks.lock().interposed.pop_front();
            if let Some((other, value)) = interposed {
                self.apply(|root| write_at(root, other.segments(), value));
            }

            let committed = {
                let mut state = self.state.write();
                if read_at(&state.root, path) == current {
                    let deliveries =
                        Self::commit(&mut state, |root| write_at(root, path.segments(), proposed));
                    self.outbox.enqueue(deliveries);
                    Some(read_at(&state.root, path))
                } else {
                    None
                }
            };

            match committed {
                Some(value) => {
                    self.outbox.drain();
                    return Ok(TransactionOutcome::Committed { value, attempts });
                }
                None => {
                    debug!(path = %path, attempt = attempts, "transaction conflict");
                    if max_retries.is_some_and(|max| attempts > max) {
                        return Ok(TransactionOutcome::Aborted {
                            reason: AbortReason::MaxRetries,
                            attempts,
                        });
                    }
                }
            }
        }
    }

    async fn set_priority(&self, path: &TreePath, priority: Option<Priority>) -> Result<()> {
        self.check_writable()?;
        {
            let mut state = self.state.write();
            let wire = priority.map(|p| p.to_wire());
            if state.priorities.get(path) == wire.as_ref() {
                return Ok(());
            }
            match wire {
                Some(wire) => state.priorities.insert(path.clone(), wire),
                None => state.priorities.remove(path),
            };

            let deliveries: Vec<Delivery> = match (path.parent(), value_at(&state.root, path)) {
                (Some(parent), Some(value)) => {
                    let previous_sibling = value_at(&state.root, &parent)
                        .and_then(WireValue::as_object)
                        .and_then(|siblings| previous_key(siblings, path.key().unwrap_or_default()));
                    let notification = RawNotification {
                        key: path.key().map(str::to_string),
                        value: value.clone(),
                        previous_sibling,
                    };
                    state
                        .listeners
                        .values()
                        .filter(|l| l.kind == EventKind::ChildMoved && l.path == parent)
                        .map(|l| {
                            (
                                l.sink.clone(),
                                TransportSignal::Notification(notification.clone()),
                            )
                        })
                        .collect()
                }
                _ => Vec::new(),
            };
            self.outbox.enqueue(deliveries);
        }
        self.outbox.drain();
        Ok(())
    }

    fn subscribe(
        &self,
        path: &TreePath,
        kind: EventKind,
        sink: NotificationSink,
    ) -> Result<SubscriptionToken> {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.state.write().listeners.insert(
            token,
            StoreListener {
                path: path.clone(),
                kind,
                sink,
            },
        );
        Ok(token)
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> Result<()> {
        if self.hooks.lock().fail_unsubscribe {
            return Err(TreeError::Remote(format!("unsubscribe {} rejected", token)));
        }
        self.state.write().listeners.remove(&token);
        Ok(())
    }

    async fn defer_on_disconnect(&self, path: &TreePath, write: DeferredWrite) -> Result<()> {
        self.check_writable()?;
        self.state.write().deferred.push((path.clone(), write));
        Ok(())
    }

    async fn cancel_on_disconnect(&self, path: &TreePath) -> Result<()> {
        self.check_writable()?;
        self.state
            .write()
            .deferred
            .retain(|(queued, _)| !queued.starts_with(path));
        Ok(())
    }

    fn set_sync_intent(&self, online: bool) {
        let deferred = {
            let mut state = self.state.write();
            let was_online = std::mem::replace(&mut state.online, online);
            if was_online && !online {
                std::mem::take(&mut state.deferred)
            } else {
                Vec::new()
            }
        };
        info!(online, deferred = deferred.len(), "sync intent changed");
        for (path, write) in deferred {
            self.apply_deferred(path, write);
        }
    }
}

fn child_writes(path: &TreePath, partial: WireMap) -> Result<Vec<(TreePath, WireValue)>> {
    partial
        .into_iter()
        .map(|(key, value)| Ok((path.child(&key)?, value)))
        .collect()
}

fn value_at<'a>(root: &'a WireValue, path: &TreePath) -> Option<&'a WireValue> {
    path.segments()
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
        .filter(|value| !value.is_null())
}

fn read_at(root: &WireValue, path: &TreePath) -> WireValue {
    value_at(root, path).cloned().unwrap_or(WireValue::Null)
}

/// Write `value` below `node`, creating intermediate objects and pruning
/// any that end up empty.
fn write_at(node: &mut WireValue, segments: &[String], value: WireValue) {
    let Some((head, rest)) = segments.split_first() else {
        *node = prune(value);
        return;
    };

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = WireValue::Object(WireMap::new());
    }

    let emptied = match node {
        WireValue::Object(map) => {
            let child = map.entry(head.clone()).or_insert(WireValue::Null);
            write_at(child, rest, value);
            if child.is_null() {
                map.remove(head);
            }
            map.is_empty()
        }
        _ => false,
    };
    if emptied {
        *node = WireValue::Null;
    }
}

/// Nulls and empty objects are absent data.
fn prune(value: WireValue) -> WireValue {
    match value {
        WireValue::Object(map) => {
            let pruned: WireMap = map
                .into_iter()
                .map(|(k, v)| (k, prune(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if pruned.is_empty() {
                WireValue::Null
            } else {
                WireValue::Object(pruned)
            }
        }
        other => other,
    }
}

fn previous_key(siblings: &WireMap, key: &str) -> Option<String> {
    siblings
        .keys()
        .take_while(|k| k.as_str() != key)
        .last()
        .cloned()
}

fn notify(key: &str, value: &WireValue, siblings: &WireMap) -> TransportSignal {
    TransportSignal::Notification(RawNotification {
        key: Some(key.to_string()),
        value: value.clone(),
        previous_sibling: previous_key(siblings, key),
    })
}

fn notifications(
    listener: &StoreListener,
    before: &WireValue,
    after: &WireValue,
) -> Vec<TransportSignal> {
    let old = read_at(before, &listener.path);
    let new = read_at(after, &listener.path);
    if old == new {
        return Vec::new();
    }

    let empty = WireMap::new();
    let old_children = old.as_object().unwrap_or(&empty);
    let new_children = new.as_object().unwrap_or(&empty);

    match listener.kind {
        EventKind::Value => vec![TransportSignal::Notification(RawNotification {
            key: listener.path.key().map(str::to_string),
            value: new,
            previous_sibling: None,
        })],
        EventKind::ChildAdded => new_children
            .iter()
            .filter(|(k, _)| !old_children.contains_key(*k))
            .map(|(k, v)| notify(k, v, new_children))
            .collect(),
        EventKind::ChildChanged => new_children
            .iter()
            .filter(|(k, v)| old_children.get(*k).is_some_and(|old| old != *v))
            .map(|(k, v)| notify(k, v, new_children))
            .collect(),
        EventKind::ChildRemoved => old_children
            .iter()
            .filter(|(k, _)| !new_children.contains_key(*k))
            .map(|(k, v)| notify(k, v, old_children))
            .collect(),
        // Only priority changes move children.
        EventKind::ChildMoved => Vec::new(),
    }
}
