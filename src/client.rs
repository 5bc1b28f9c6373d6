//! Entry point: a client bound to one remote tree store.

use std::fmt;
use std::sync::Arc;

use crate::config::TreeConfig;
use crate::connectivity::ConnectivityManager;
use crate::error::Result;
use crate::path::{IntoKorks, TreePath};
use crate::reference::Reference;
use crate::registry::ListenerRegistry;
use crate::store::RemoteTreeStore;
use crate::transaction::TransactionEngine;

/// Shared by every reference handed out by one client.
pub(crate) struct ClientContext {
    pub(crate) store: Arc<dyn RemoteTreeStore>,
    pub(crate) registry: ListenerRegistry,
    pub(crate) transactions: TransactionEngine,
}

/// A client of a remote tree store.
///
/// Cheap to clone; clones share the listener registry and connectivity state.
#[derive(Clone)]
pub struct TreeClient {
    ctx: Arc<ClientContext>,
    connectivity: Arc<ConnectivityManager>,
    config: TreeConfig,
}

impl TreeClient {
    /// Create a client with the default configuration.
    pub fn new(store: Arc<dyn RemoteTreeStore>) -> Self {
        Self::with_config(store, TreeConfig::default())
    }

    /// Client over `store` with explicit settings.
    pub fn with_config(store: Arc<dyn RemoteTreeStore>, config: TreeConfig) -> Self {
        let ctx = ClientContext {
            registry: ListenerRegistry::new(store.clone(), config.cancel_policy),
            transactions: TransactionEngine::new(store.clone(), config.max_transaction_retries),
            store: store.clone(),
        };
        Self {
            ctx: Arc::new(ctx),
            connectivity: Arc::new(ConnectivityManager::new(store)),
            config,
        }
    }

    /// Reference to the root of the tree.
    pub fn root(&self) -> Reference {
        Reference::new(self.ctx.clone(), TreePath::root())
    }

    /// Reference to the node addressed by `korks` from the root.
    pub fn reference(&self, korks: impl IntoKorks) -> Result<Reference> {
        self.root().resolve(korks)
    }

    /// Registry holding this client's subscriptions.
    pub fn registry(&self) -> &ListenerRegistry {
        &self.ctx.registry
    }

    /// Sync-intent switch for this client.
    pub fn connectivity(&self) -> &ConnectivityManager {
        &self.connectivity
    }

    /// Settings the client was built with.
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }
}

impl fmt::Debug for TreeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeClient")
            .field("registry", &self.ctx.registry)
            .field("config", &self.config)
            .finish()
    }
}
