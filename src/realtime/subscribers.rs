//! Typed per-kind subscriber registry.
//!
//! Each subscriber owns an unbounded queue, so a slow reader never loses
//! events. Publishing holds the registry lock for the whole fan-out: every
//! subscriber sees events in the same order, and subscribers are served in
//! subscription order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub type SubscriptionId = u64;

/// Receiving end handed to a subscriber
#[derive(Debug)]
pub struct Subscription<T> {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event, or `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

pub struct Subscribers<T> {
    next_id: AtomicU64,
    senders: Mutex<Vec<(SubscriptionId, mpsc::UnboundedSender<T>)>>,
}

impl<T: Clone> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            senders: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push((id, tx));
        Subscription { id, rx }
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut senders = self.lock();
        let before = senders.len();
        senders.retain(|(sid, _)| *sid != id);
        senders.len() != before
    }

    /// Deliver to every live subscriber; dropped receivers are pruned.
    pub fn publish(&self, event: &T) -> usize {
        let mut senders = self.lock();
        senders.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        senders.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, mpsc::UnboundedSender<T>)>> {
        self.senders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let subscribers = Subscribers::new();
        let mut first = subscribers.subscribe();
        let mut second = subscribers.subscribe();

        for i in 0..100 {
            assert_eq!(subscribers.publish(&i), 2);
        }

        for i in 0..100 {
            assert_eq!(first.recv().await, Some(i));
            assert_eq!(second.recv().await, Some(i));
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let subscribers = Subscribers::new();
        let mut kept = subscribers.subscribe();
        let mut removed = subscribers.subscribe();

        subscribers.publish(&"a");
        assert!(subscribers.unsubscribe(removed.id()));
        assert!(!subscribers.unsubscribe(removed.id()));
        subscribers.publish(&"b");

        assert_eq!(removed.recv().await, Some("a"));
        assert_eq!(removed.recv().await, None);
        assert_eq!(kept.try_recv(), Some("a"));
        assert_eq!(kept.try_recv(), Some("b"));
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let subscribers = Subscribers::new();
        let sub = subscribers.subscribe();
        assert_eq!(subscribers.len(), 1);
        drop(sub);
        assert_eq!(subscribers.publish(&1u8), 0);
        assert!(subscribers.is_empty());
    }
}
