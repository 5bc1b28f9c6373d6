//! Connectivity manager: the explicit owner of the "intends to sync" flag.
//!
//! Callers toggle it; the reference, registry and transaction layers never
//! read or write it on their behalf.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::store::RemoteTreeStore;

/// Tracks whether a client intends to sync with the store.
pub struct ConnectivityManager {
    store: Arc<dyn RemoteTreeStore>,
    intends_to_sync: AtomicBool,
}

impl ConnectivityManager {
    /// Starts out intending to sync.
    pub fn new(store: Arc<dyn RemoteTreeStore>) -> Self {
        Self {
            store,
            intends_to_sync: AtomicBool::new(true),
        }
    }

    /// Current sync intent.
    pub fn intends_to_sync(&self) -> bool {
        self.intends_to_sync.load(Ordering::Acquire)
    }

    /// Resume syncing.
    pub fn go_online(&self) {
        self.set(true);
    }

    /// Stop syncing. The store applies any queued on-disconnect writes.
    pub fn go_offline(&self) {
        self.set(false);
    }

    fn set(&self, online: bool) {
        if self.intends_to_sync.swap(online, Ordering::AcqRel) != online {
            info!(online, "sync intent toggled");
            self.store.set_sync_intent(online);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTreeStore;

    #[test]
    fn test_toggle() {
        let store = Arc::new(MemoryTreeStore::new());
        let manager = ConnectivityManager::new(store.clone());
        assert!(manager.intends_to_sync());

        manager.go_offline();
        assert!(!manager.intends_to_sync());
        assert!(!store.is_online());

        manager.go_online();
        assert!(manager.intends_to_sync());
        assert!(store.is_online());
    }

    #[test]
    fn test_instances_are_independent() {
        let a = ConnectivityManager::new(Arc::new(MemoryTreeStore::new()));
        let b = ConnectivityManager::new(Arc::new(MemoryTreeStore::new()));
        a.go_offline();
        assert!(!a.intends_to_sync());
        assert!(b.intends_to_sync());
    }
}
