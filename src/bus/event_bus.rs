//! In-process lifecycle event bus

use carwatch_shared::{EventKind, LifecycleEvent};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Set of event kinds a subscriber wants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter(u16);

impl EventFilter {
    pub fn all() -> Self {
        Self(EventKind::ALL.iter().fold(0, |bits, kind| bits | kind.bit()))
    }

    pub fn only(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self(kinds.into_iter().fold(0, |bits, kind| bits | kind.bit()))
    }

    pub fn matches(&self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

impl From<EventKind> for EventFilter {
    fn from(kind: EventKind) -> Self {
        Self::only([kind])
    }
}

type Deliver = dyn Fn(&LifecycleEvent) + Send + Sync;

struct Subscriber {
    id: SubscriptionId,
    filter: EventFilter,
    deliver: Arc<Deliver>,
}

/// Ordered, synchronous fan-out to any number of subscribers.
///
/// `publish` returns only after every matching subscriber has been called, in
/// the order they subscribed. Delivery happens outside the registry lock, so
/// a subscriber may itself publish, subscribe or unsubscribe. Subscribers run
/// on the publisher's task and must not block.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback for the kinds in `filter`
    pub fn subscribe<F>(&self, filter: impl Into<EventFilter>, handler: F) -> SubscriptionId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber {
            id,
            filter: filter.into(),
            deliver: Arc::new(handler),
        });
        id
    }

    /// Register a channel for the kinds in `filter`.
    ///
    /// Events are queued without blocking the publisher; once the receiver
    /// is dropped they are discarded until the subscription is removed.
    pub fn subscribe_channel(
        &self,
        filter: impl Into<EventFilter>,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(filter, move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Remove a subscription; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Deliver `event` to every current subscriber interested in its kind
    pub fn publish(&self, event: LifecycleEvent) {
        let kind = event.kind();
        let targets: Vec<Arc<Deliver>> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.filter.matches(kind))
            .map(|s| s.deliver.clone())
            .collect();

        trace!(event = %event, subscribers = targets.len(), "publish");
        for deliver in targets {
            deliver(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
