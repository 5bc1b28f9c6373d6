//! Optimistic transactions over a single node.
//!
//! The engine adapts a caller's update function over [`Value`]s into the
//! wire-level update the store runs inside its read/apply/commit cycle. The
//! store re-runs that cycle on every conflicting write, so the function is
//! invoked once per attempt and must be pure: same input, same output, no
//! side effects.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::codec::{hydrate, serialize, WireValue};
use crate::error::Result;
use crate::event::Snapshot;
use crate::path::TreePath;
use crate::store::{RemoteTreeStore, TransactionOutcome, WireUpdate};
use crate::value::Value;

/// Runs optimistic compare-and-retry updates against a store.
#[derive(Clone)]
pub struct TransactionEngine {
    store: Arc<dyn RemoteTreeStore>,
    max_retries: Option<u32>,
}

impl TransactionEngine {
    /// Engine over `store`. `max_retries` of `None` means unbounded.
    pub fn new(store: Arc<dyn RemoteTreeStore>, max_retries: Option<u32>) -> Self {
        Self { store, max_retries }
    }

    /// Replace the node's value with `update(current)`.
    ///
    /// `current` is `Value::Null` when the node is absent. Returning `None`
    /// vetoes the transaction. Nothing is reported until the transaction
    /// commits or aborts.
    pub async fn transact<F>(&self, path: &TreePath, update: F) -> Result<TransactionOutcome<Snapshot>>
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        let invocations = Arc::new(AtomicU32::new(0));
        let wire_update: WireUpdate = {
            let invocations = invocations.clone();
            let path = path.clone();
            Arc::new(move |current: &WireValue| {
                let attempt = invocations.fetch_add(1, Ordering::Relaxed) + 1;
                if attempt > 1 {
                    debug!(path = %path, attempt, "retrying transaction against fresher value");
                }
                update(&hydrate(current)).map(|next| serialize(&next))
            })
        };

        let outcome = self
            .store
            .transact(path, wire_update, self.max_retries)
            .await?;

        match &outcome {
            TransactionOutcome::Committed { attempts, .. } => {
                debug!(path = %path, attempts, "transaction committed")
            }
            TransactionOutcome::Aborted { reason, attempts } => {
                warn!(path = %path, attempts, %reason, "transaction aborted")
            }
        }

        let key = path.key().map(str::to_string);
        Ok(outcome.map(|committed| Snapshot::new(key, hydrate(&committed))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTreeStore;
    use crate::store::AbortReason;
    use crate::TreeError;
    use serde_json::json;

    fn increment(v: &Value) -> Option<Value> {
        Some(Value::from(v.as_i64().unwrap_or(0) + 1))
    }

    fn path(s: &str) -> TreePath {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_commit_without_conflict() {
        let store = Arc::new(MemoryTreeStore::with_data(json!({"counter": 5})));
        let engine = TransactionEngine::new(store, Some(25));
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = {
            let calls = calls.clone();
            engine
                .transact(&path("/counter"), move |v| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    increment(v)
                })
                .await
                .unwrap()
        };

        let snapshot = outcome.committed().unwrap();
        assert_eq!(snapshot.key(), Some("counter"));
        assert_eq!(snapshot.value(), &Value::from(6));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_conflict_reapplies_to_latest_value() {
        let store = Arc::new(MemoryTreeStore::with_data(json!({"counter": 5})));
        store.interpose_write(&path("/counter"), json!(40));
        let engine = TransactionEngine::new(store.clone(), Some(25));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let outcome = {
            let seen = seen.clone();
            engine
                .transact(&path("/counter"), move |v| {
                    seen.lock().push(v.clone());
                    increment(v)
                })
                .await
                .unwrap()
        };

        assert_eq!(*seen.lock(), vec![Value::from(5), Value::from(40)]);
        assert_eq!(outcome.committed().unwrap().value(), &Value::from(41));
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(store.dump(), json!({"counter": 41}));
    }

    #[tokio::test]
    async fn test_absent_node_reads_null() {
        let store = Arc::new(MemoryTreeStore::new());
        let engine = TransactionEngine::new(store, None);
        let outcome = engine
            .transact(&path("/fresh"), |v| {
                assert!(v.is_null());
                Some(Value::map([("created", true)]))
            })
            .await
            .unwrap();
        assert_eq!(
            outcome.committed().unwrap().value().get("created"),
            Some(&Value::from(true))
        );
    }

    #[tokio::test]
    async fn test_veto_aborts_silently() {
        let store = Arc::new(MemoryTreeStore::with_data(json!({"counter": 5})));
        let engine = TransactionEngine::new(store.clone(), None);
        let outcome = engine
            .transact(&path("/counter"), |_| None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TransactionOutcome::Aborted {
                reason: AbortReason::Vetoed,
                attempts: 1
            }
        );
        assert_eq!(store.dump(), json!({"counter": 5}));
    }

    #[tokio::test]
    async fn test_retry_bound_aborts() {
        let store = Arc::new(MemoryTreeStore::with_data(json!({"counter": 0})));
        store.interpose_write(&path("/counter"), json!(1));
        store.interpose_write(&path("/counter"), json!(2));
        let engine = TransactionEngine::new(store, Some(0));
        let outcome = engine.transact(&path("/counter"), increment).await.unwrap();
        assert!(matches!(
            outcome,
            TransactionOutcome::Aborted {
                reason: AbortReason::MaxRetries,
                attempts: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_store_failure_is_an_error() {
        let store = Arc::new(MemoryTreeStore::new());
        store.fail_writes(Some("offline"));
        let engine = TransactionEngine::new(store, None);
        let err = engine.transact(&path("/counter"), increment).await.unwrap_err();
        assert_eq!(err, TreeError::Remote("offline".to_string()));
    }
}
