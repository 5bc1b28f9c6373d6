//! # univrs-tree
//!
//! Client-side abstraction over a remote, tree-structured, real-time
//! key/value store for the Univrs ecosystem.
//!
//! This crate provides:
//!
//! - **References**: path-addressed handles into the tree (`users/ada/score`)
//! - **Value codec**: lossless conversion between wire JSON and [`Value`]
//! - **Subscriptions**: change notifications with idempotent teardown
//! - **Transactions**: optimistic, retry-based updates with pure functions
//!
//! The backend itself is consumed through the [`RemoteTreeStore`] trait.
//! [`MemoryTreeStore`] is an in-process implementation for tests and
//! development.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use univrs_tree::{MemoryTreeStore, TreeClient, Value};
//!
//! #[tokio::main]
//! async fn main() -> univrs_tree::Result<()> {
//!     let client = TreeClient::new(Arc::new(MemoryTreeStore::new()));
//!
//!     let ada = client.reference("users/ada")?;
//!     ada.set(Value::map([("name", "ada"), ("lang", "en")])).await?;
//!
//!     let snapshot = ada.read().await?;
//!     println!("{:?} = {:?}", snapshot.key(), snapshot.value());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Subscriptions
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use univrs_tree::{Event, EventKind, MemoryTreeStore, TreeClient};
//!
//! #[tokio::main]
//! async fn main() -> univrs_tree::Result<()> {
//!     let client = TreeClient::new(Arc::new(MemoryTreeStore::new()));
//!     let room = client.reference("rooms/lobby")?;
//!
//!     let subscription = room.on(
//!         EventKind::Value,
//!         Arc::new(|event: Event| println!("lobby is now {:?}", event.snapshot.value())),
//!     )?;
//!
//!     room.set("open").await?;
//!
//!     // Idempotent: calling it twice is fine.
//!     subscription.unsubscribe()?;
//!     subscription.unsubscribe()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Transactions
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use univrs_tree::{MemoryTreeStore, TreeClient, Value};
//!
//! #[tokio::main]
//! async fn main() -> univrs_tree::Result<()> {
//!     let client = TreeClient::new(Arc::new(MemoryTreeStore::new()));
//!     let counter = client.reference("stats/visits")?;
//!
//!     // May run more than once if another writer gets in first.
//!     let outcome = counter
//!         .transact(|current| Some(Value::from(current.as_i64().unwrap_or(0) + 1)))
//!         .await?;
//!
//!     if let Some(snapshot) = outcome.committed() {
//!         println!("visits = {:?}", snapshot.value());
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connectivity;
mod dispatch;
pub mod error;
pub mod event;
pub mod memory;
pub mod path;
pub mod push_id;
pub mod reference;
pub mod registry;
pub mod store;
pub mod transaction;
pub mod value;
pub mod watch;

// Re-export main types
pub use client::TreeClient;
pub use codec::{hydrate, serialize, WireValue};
pub use config::{CancelPolicy, TreeConfig};
pub use connectivity::ConnectivityManager;
pub use error::{Result, TreeError};
pub use event::{Event, EventKind, Listener, Snapshot};
pub use memory::MemoryTreeStore;
pub use path::{IntoKorks, TreePath, MAX_DEPTH, MAX_SEGMENT_LENGTH};
pub use reference::{OnDisconnect, Reference};
pub use registry::{ListenerRegistry, Subscription, SubscriptionId};
pub use store::{AbortReason, Priority, RemoteTreeStore, TransactionOutcome};
pub use transaction::TransactionEngine;
pub use value::{Key, Mapping, Value};
pub use watch::EventStream;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::client::TreeClient;
    pub use crate::error::{Result, TreeError};
    pub use crate::event::{Event, EventKind, Listener, Snapshot};
    pub use crate::memory::MemoryTreeStore;
    pub use crate::reference::Reference;
    pub use crate::registry::Subscription;
    pub use crate::store::{Priority, RemoteTreeStore, TransactionOutcome};
    pub use crate::value::{Key, Mapping, Value};
}
