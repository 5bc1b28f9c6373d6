//! Stream adapter over a subscription.
//!
//! Events are forwarded through an unbounded channel so the dispatcher never
//! blocks on a slow consumer. The stream ends when the transport cancels the
//! subscription; dropping it tears the subscription down.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::warn;

use crate::error::Result;
use crate::event::{AsEventKind, Event, Listener};
use crate::path::TreePath;
use crate::registry::{ListenerRegistry, Subscription};

struct ChannelListener {
    sender: mpsc::UnboundedSender<Event>,
}

impl Listener for ChannelListener {
    fn on_event(&self, event: Event) {
        // Receiver gone means the stream is being dropped.
        let _ = self.sender.send(event);
    }
}

/// A stream of events for one subscription.
pub struct EventStream {
    events: UnboundedReceiverStream<Event>,
    subscription: Subscription,
}

impl EventStream {
    pub(crate) fn open(
        registry: &ListenerRegistry,
        path: &TreePath,
        kind: impl AsEventKind,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let listener: Arc<dyn Listener> = Arc::new(ChannelListener { sender });
        let subscription = registry.register(path, kind, listener)?;
        Ok(Self {
            events: UnboundedReceiverStream::new(receiver),
            subscription,
        })
    }

    /// The underlying subscription handle.
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Tear down early. Events already buffered are still yielded.
    pub fn close(&self) -> Result<()> {
        self.subscription.unsubscribe()
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Err(err) = self.subscription.unsubscribe() {
            warn!(error = %err, "failed to tear down event stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TreeClient;
    use crate::event::EventKind;
    use crate::memory::MemoryTreeStore;
    use crate::value::Value;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_stream_yields_events_in_order() {
        let store = Arc::new(MemoryTreeStore::new());
        let client = TreeClient::new(store);
        let counter = client.reference("counter").unwrap();
        let mut events = counter.watch(EventKind::Value).unwrap();

        counter.set(1).await.unwrap();
        counter.set(2).await.unwrap();

        let first = events.next().await.unwrap();
        let second = events.next().await.unwrap();
        assert_eq!(first.snapshot.value(), &Value::from(1));
        assert_eq!(second.snapshot.value(), &Value::from(2));
    }

    #[tokio::test]
    async fn test_stream_ends_on_cancel() {
        let store = Arc::new(MemoryTreeStore::new());
        let client = TreeClient::new(store.clone());
        let secret = client.reference("secret").unwrap();
        let mut events = secret.watch("value").unwrap();

        secret.set("x").await.unwrap();
        store.cancel_subscriptions(secret.path(), "permission denied");

        assert!(events.next().await.is_some());
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_tears_down() {
        let store = Arc::new(MemoryTreeStore::new());
        let client = TreeClient::new(store.clone());
        let events = client.root().watch(EventKind::ChildAdded).unwrap();
        assert_eq!(client.registry().len(), 1);

        drop(events);
        assert!(client.registry().is_empty());
        assert_eq!(store.subscription_count(), 0);
    }

    #[test]
    fn test_unknown_kind() {
        let client = TreeClient::new(Arc::new(MemoryTreeStore::new()));
        assert!(client.root().watch("bogus").is_err());
    }
}
