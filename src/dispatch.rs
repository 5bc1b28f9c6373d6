//! Event dispatch from transport signals to registered listeners.
//!
//! One dispatcher exists per registry entry and is handed to the store as
//! that subscription's sink. Signals are decoded and delivered synchronously
//! in the order the transport emits them.

use std::sync::Weak;
use tracing::{error, trace, warn};

use crate::codec::hydrate_owned;
use crate::config::CancelPolicy;
use crate::error::{Result, TreeError};
use crate::event::{Event, Snapshot};
use crate::registry::{ListenerKey, RegistryInner, SubscriptionId};
use crate::store::{RawNotification, TransportSignal};

pub(crate) struct EventDispatcher {
    registry: Weak<RegistryInner>,
    key: ListenerKey,
    id: SubscriptionId,
}

impl EventDispatcher {
    pub(crate) fn new(registry: Weak<RegistryInner>, key: ListenerKey, id: SubscriptionId) -> Self {
        Self { registry, key, id }
    }

    pub(crate) fn dispatch(&self, signal: TransportSignal) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        match signal {
            TransportSignal::Notification(raw) => {
                let Some(listener) = registry.listener(&self.key, self.id) else {
                    trace!(path = %self.key.path, id = %self.id, "dropping signal for inactive subscription");
                    return;
                };
                match self.decode(raw) {
                    Ok(event) => listener.on_event(event),
                    Err(err) => {
                        warn!(path = %self.key.path, kind = %self.key.kind, error = %err, "undecodable notification")
                    }
                }
            }
            TransportSignal::Cancelled(reason) => {
                // Terminal: the entry is gone whatever the policy says.
                let Some(listener) = registry.evict(&self.key, self.id) else {
                    return;
                };
                let err = TreeError::Cancelled(reason);
                error!(path = %self.key.path, kind = %self.key.kind, error = %err, "subscription cancelled by transport");
                if registry.cancel_policy == CancelPolicy::Notify {
                    listener.on_cancel(&err);
                }
            }
        }
    }

    fn decode(&self, raw: RawNotification) -> Result<Event> {
        let path = if self.key.kind.is_child_event() {
            let key = raw.key.ok_or_else(|| {
                TreeError::invalid_path("", "child notification without a key")
            })?;
            self.key.path.child(&key)?
        } else {
            self.key.path.clone()
        };

        let snapshot = Snapshot::new(path.key().map(str::to_string), hydrate_owned(raw.value));
        Ok(Event {
            kind: self.key.kind,
            snapshot,
            path,
        })
    }
}
