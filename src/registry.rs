//! Listener registry: the owner of every active subscription.
//!
//! Entries are keyed by `(path, event kind, listener identity)`, so the same
//! listener registered twice for the same node and kind shares one store
//! subscription. A shared entry counts the handles issued for it and is only
//! removed when the last one is torn down. Each entry also carries a unique
//! [`SubscriptionId`]; a handle only ever touches the entry it was issued for.
//!
//! The registry lock is never held while a listener runs or while the store
//! is called, so listeners may register or tear down subscriptions (their
//! own included) from inside a callback.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::CancelPolicy;
use crate::dispatch::EventDispatcher;
use crate::error::{Result, TreeError};
use crate::event::{AsEventKind, EventKind, Listener};
use crate::path::TreePath;
use crate::store::{NotificationSink, RemoteTreeStore, SubscriptionToken};

/// Unique identifier of one registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Composite identity of a registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ListenerKey {
    pub(crate) path: TreePath,
    pub(crate) kind: EventKind,
    listener: usize,
}

impl ListenerKey {
    fn new(path: &TreePath, kind: EventKind, listener: &Arc<dyn Listener>) -> Self {
        Self {
            path: path.clone(),
            kind,
            listener: Arc::as_ptr(listener) as *const () as usize,
        }
    }
}

struct ActiveListener {
    id: SubscriptionId,
    /// `None` while the store subscribe call is in flight.
    token: Option<SubscriptionToken>,
    listener: Arc<dyn Listener>,
    /// Handles not yet torn down.
    handles: usize,
}

pub(crate) struct RegistryInner {
    store: Arc<dyn RemoteTreeStore>,
    entries: Mutex<HashMap<ListenerKey, ActiveListener>>,
    /// Store subscriptions whose unsubscribe failed.
    unreleased: Mutex<Vec<(TreePath, SubscriptionToken)>>,
    next_id: AtomicU64,
    pub(crate) cancel_policy: CancelPolicy,
}

impl RegistryInner {
    /// Listener of a live entry, for dispatch.
    pub(crate) fn listener(&self, key: &ListenerKey, id: SubscriptionId) -> Option<Arc<dyn Listener>> {
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.id == id)
            .map(|entry| entry.listener.clone())
    }

    /// Drop an entry the transport has already terminated.
    pub(crate) fn evict(&self, key: &ListenerKey, id: SubscriptionId) -> Option<Arc<dyn Listener>> {
        self.take(&mut self.entries.lock(), key, id)
            .map(|entry| entry.listener)
    }

    fn take(
        &self,
        entries: &mut HashMap<ListenerKey, ActiveListener>,
        key: &ListenerKey,
        id: SubscriptionId,
    ) -> Option<ActiveListener> {
        if entries.get(key).is_some_and(|entry| entry.id == id) {
            entries.remove(key)
        } else {
            None
        }
    }

    fn is_live(&self, key: &ListenerKey, id: SubscriptionId) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|entry| entry.id == id)
    }

    /// Release one handle on every listed entry. Entries left with no
    /// handles are removed and unsubscribed from the store.
    fn teardown(&self, installed: &[(ListenerKey, SubscriptionId)]) -> Result<()> {
        let tokens: Vec<(TreePath, SubscriptionToken)> = {
            let mut entries = self.entries.lock();
            installed
                .iter()
                .filter_map(|(key, id)| {
                    let entry = entries.get_mut(key).filter(|entry| entry.id == *id)?;
                    entry.handles -= 1;
                    if entry.handles > 0 {
                        debug!(path = %key.path, kind = %key.kind, handles = entry.handles, "entry still shared");
                        return None;
                    }
                    self.take(&mut entries, key, *id)
                        .and_then(|entry| entry.token)
                        .map(|token| (key.path.clone(), token))
                })
                .collect()
        };
        self.release(tokens)
    }

    /// Unsubscribe each token from the store. Failed tokens are kept in
    /// `unreleased` for a later retry.
    fn release(&self, tokens: Vec<(TreePath, SubscriptionToken)>) -> Result<()> {
        let total = tokens.len();
        let mut failures = Vec::new();
        for (path, token) in tokens {
            debug!(path = %path, token = %token, "unsubscribing");
            if let Err(err) = self.store.unsubscribe(token) {
                failures.push((path, token, err));
            }
        }

        let Some((_, _, first)) = failures.first() else {
            return Ok(());
        };
        let failed = failures.len();
        let reason = first.to_string();
        error!(failed, total, error = %reason, "subscription teardown failed");
        self.unreleased
            .lock()
            .extend(failures.into_iter().map(|(path, token, _)| (path, token)));
        Err(TreeError::TeardownFailed {
            failed,
            total,
            reason,
        })
    }
}

/// Tracks active subscriptions against a remote tree store.
#[derive(Clone)]
pub struct ListenerRegistry {
    inner: Arc<RegistryInner>,
}

impl ListenerRegistry {
    /// Empty registry over `store`.
    pub fn new(store: Arc<dyn RemoteTreeStore>, cancel_policy: CancelPolicy) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                store,
                entries: Mutex::new(HashMap::new()),
                unreleased: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                cancel_policy,
            }),
        }
    }

    /// Subscribe `listener` to `kind` events at `path`.
    ///
    /// The kind is validated before the store sees anything.
    pub fn register(
        &self,
        path: &TreePath,
        kind: impl AsEventKind,
        listener: Arc<dyn Listener>,
    ) -> Result<Subscription> {
        let kind = kind.event_kind()?;
        let installed = self.install(path, kind, listener)?;
        Ok(Subscription::new(self.inner.clone(), vec![installed]))
    }

    /// Subscribe `listener` to all four child event kinds at `path`.
    ///
    /// The returned handle tears down all four together. If any store
    /// subscribe fails, the ones already installed are rolled back.
    pub fn register_all_children(
        &self,
        path: &TreePath,
        listener: Arc<dyn Listener>,
    ) -> Result<Subscription> {
        let mut installed = Vec::with_capacity(EventKind::CHILDREN.len());
        for kind in EventKind::CHILDREN {
            match self.install(path, kind, listener.clone()) {
                Ok(entry) => installed.push(entry),
                Err(err) => {
                    if let Err(rollback) = self.inner.teardown(&installed) {
                        warn!(path = %path, error = %rollback, "rollback of partial registration failed");
                    }
                    return Err(err);
                }
            }
        }
        Ok(Subscription::new(self.inner.clone(), installed))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// True when no entries are live.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// Store subscriptions still held after a failed teardown.
    pub fn unreleased_len(&self) -> usize {
        self.inner.unreleased.lock().len()
    }

    /// Retry unsubscribing every store subscription a failed teardown left
    /// behind. Those that fail again stay queued.
    pub fn retry_release(&self) -> Result<()> {
        let tokens = std::mem::take(&mut *self.inner.unreleased.lock());
        if tokens.is_empty() {
            return Ok(());
        }
        info!(count = tokens.len(), "retrying unreleased subscriptions");
        self.inner.release(tokens)
    }

    fn install(
        &self,
        path: &TreePath,
        kind: EventKind,
        listener: Arc<dyn Listener>,
    ) -> Result<(ListenerKey, SubscriptionId)> {
        let key = ListenerKey::new(path, kind, &listener);
        let id = {
            let mut entries = self.inner.entries.lock();
            if let Some(existing) = entries.get_mut(&key) {
                existing.handles += 1;
                debug!(
                    path = %path,
                    kind = %kind,
                    id = %existing.id,
                    handles = existing.handles,
                    "listener already registered"
                );
                return Ok((key, existing.id));
            }
            let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
            entries.insert(
                key.clone(),
                ActiveListener {
                    id,
                    token: None,
                    listener,
                    handles: 1,
                },
            );
            id
        };

        let dispatcher = EventDispatcher::new(Arc::downgrade(&self.inner), key.clone(), id);
        let sink: NotificationSink = Arc::new(move |signal| dispatcher.dispatch(signal));

        match self.inner.store.subscribe(path, kind, sink) {
            Ok(token) => {
                let stale = {
                    let mut entries = self.inner.entries.lock();
                    match entries.get_mut(&key) {
                        Some(entry) if entry.id == id => {
                            entry.token = Some(token);
                            false
                        }
                        _ => true,
                    }
                };
                if stale {
                    // Terminated while the subscribe call was in flight.
                    if let Err(err) = self.inner.store.unsubscribe(token) {
                        warn!(path = %path, kind = %kind, error = %err, "failed to release stale subscription");
                    }
                }
                debug!(path = %path, kind = %kind, id = %id, token = %token, "listener registered");
                Ok((key, id))
            }
            Err(err) => {
                self.inner.take(&mut self.inner.entries.lock(), &key, id);
                warn!(path = %path, kind = %kind, error = %err, "store rejected subscription");
                Err(err)
            }
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.len())
            .field("cancel_policy", &self.inner.cancel_policy)
            .finish()
    }
}

/// Handle to one registration (or one grouped all-children registration).
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    registry: Arc<RegistryInner>,
    installed: Vec<(ListenerKey, SubscriptionId)>,
    torn_down: AtomicBool,
}

impl Subscription {
    fn new(registry: Arc<RegistryInner>, installed: Vec<(ListenerKey, SubscriptionId)>) -> Self {
        Self {
            registry,
            installed,
            torn_down: AtomicBool::new(false),
        }
    }

    /// Tear the subscription down. Calling it again is a no-op.
    ///
    /// Entries shared with other handles stay live until those are torn
    /// down too. Otherwise registry entries are always removed; a store
    /// failure to unsubscribe is reported as [`TreeError::TeardownFailed`]
    /// and the store subscription is queued for
    /// [`ListenerRegistry::retry_release`].
    pub fn unsubscribe(&self) -> Result<()> {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.registry.teardown(&self.installed)
    }

    /// True until torn down or cancelled by the transport.
    pub fn is_active(&self) -> bool {
        !self.torn_down.load(Ordering::Acquire)
            && self
                .installed
                .iter()
                .any(|(key, id)| self.registry.is_live(key, *id))
    }

    /// Entry ids, one per event kind.
    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.installed.iter().map(|(_, id)| *id).collect()
    }

    /// Event kinds covered by this handle.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.installed.iter().map(|(key, _)| key.kind).collect()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("ids", &self.ids())
            .field("torn_down", &self.torn_down.load(Ordering::Acquire))
            .finish()
    }
}
