//! Subscriber types for external observers.
//!
//! A Subscriber lets code outside the graph (a renderer, a logger) learn that
//! a resource updated. Notifications are delivered as side effects, so every
//! subscriber sees the graph only after the event's behaviors have settled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::GraphResult;
use crate::graph::{ResourceId, WeakGraph};

/// Unique identifier for a subscriber.
///
/// Uses an atomic counter so IDs stay unique across graphs and threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// A callback registered on one resource.
#[derive(Clone)]
pub struct Subscriber {
    id: SubscriberId,
    notify: Arc<dyn Fn() + Send + Sync>,
}

impl Subscriber {
    /// Create a new subscriber with the given notification callback.
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id: SubscriberId::new(),
            notify: Arc::new(notify),
        }
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Notify the subscriber that its resource updated.
    pub fn notify(&self) {
        (self.notify)();
    }
}

/// Registration returned by `subscribe_to_just_updated`.
///
/// Dropping a subscription does not remove it; call
/// [`Subscription::unsubscribe`].
#[must_use = "a subscription stays registered until `unsubscribe` is called"]
pub struct Subscription {
    pub(crate) graph: WeakGraph,
    pub(crate) resource: ResourceId,
    pub(crate) id: SubscriberId,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    /// Stop delivering notifications.
    pub fn unsubscribe(self) -> GraphResult<()> {
        let graph = self.graph.upgrade()?;
        graph.lock().unsubscribe(self.resource, self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn clones_share_the_callback() {
        use std::sync::atomic::AtomicUsize;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let subscriber = Subscriber::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        let copy = subscriber.clone();

        subscriber.notify();
        copy.notify();
        assert_eq!(copy.id(), subscriber.id());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
