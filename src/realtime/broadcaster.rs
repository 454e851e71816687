use crate::realtime::models::VoteUpdateMessage;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

pub type SharedUpdate = Arc<VoteUpdateMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberHandle(u64);

impl SubscriberHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Error, PartialEq)]
enum DeliveryError {
    #[error("connection closed")]
    Closed,
    #[error("send did not complete within {0:?}")]
    TimedOut(Duration),
}

/// Outcome of a single broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub removed: usize,
}

/// The set of live-update connections.
///
/// Each subscriber owns a bounded outbound queue that its connection task
/// drains. A subscriber whose queue is closed or stays full past the send
/// timeout is dropped during broadcast.
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<SharedUpdate>>>,
    queue_capacity: usize,
    send_timeout: Duration,
}

impl SubscriberRegistry {
    pub fn new(queue_capacity: usize, send_timeout: Duration) -> Self {
        SubscriberRegistry {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
            queue_capacity,
            send_timeout,
        }
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let handle = SubscriberHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let total = {
            let mut subscribers = self.subscribers.lock();
            subscribers.insert(handle.0, tx);
            subscribers.len()
        };
        info!(subscriber = handle.0, total, "subscriber joined");

        Subscription {
            handle,
            updates: rx,
            registry: Arc::clone(self),
        }
    }

    /// Removes a subscriber. Returns whether it was still registered.
    pub fn unsubscribe(&self, handle: SubscriberHandle) -> bool {
        let removed = self.subscribers.lock().remove(&handle.0).is_some();
        if removed {
            debug!(subscriber = handle.0, "subscriber left");
        }
        removed
    }

    pub fn contains(&self, handle: SubscriberHandle) -> bool {
        self.subscribers.lock().contains_key(&handle.0)
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `message` to every current subscriber, independently and
    /// concurrently. Failed subscribers are removed; nothing is returned as
    /// an error.
    pub async fn broadcast(&self, message: SharedUpdate) -> BroadcastReport {
        let targets: Vec<(u64, mpsc::Sender<SharedUpdate>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let send_timeout = self.send_timeout;
        let outcomes = join_all(targets.into_iter().map(|(id, tx)| {
            let message = Arc::clone(&message);
            async move { (id, deliver(&tx, message, send_timeout).await) }
        }))
        .await;

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(subscriber = id, "dropping subscriber: {e}");
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.lock();
            report.removed = failed
                .iter()
                .filter(|id| subscribers.remove(*id).is_some())
                .count();
        }

        report
    }
}

async fn deliver(
    tx: &mpsc::Sender<SharedUpdate>,
    message: SharedUpdate,
    send_timeout: Duration,
) -> Result<(), DeliveryError> {
    tx.send_timeout(message, send_timeout)
        .await
        .map_err(|e| match e {
            SendTimeoutError::Timeout(_) => DeliveryError::TimedOut(send_timeout),
            SendTimeoutError::Closed(_) => DeliveryError::Closed,
        })
}

/// A registered subscriber's receiving end. Dropping it unsubscribes.
pub struct Subscription {
    handle: SubscriberHandle,
    updates: mpsc::Receiver<SharedUpdate>,
    registry: Arc<SubscriberRegistry>,
}

impl Subscription {
    pub fn handle(&self) -> SubscriberHandle {
        self.handle
    }

    /// Next update, or `None` once the registry has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<SharedUpdate> {
        self.updates.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Poll;
    use chrono::Utc;
    use tokio::time::timeout;

    fn registry() -> Arc<SubscriberRegistry> {
        Arc::new(SubscriberRegistry::new(4, Duration::from_millis(50)))
    }

    fn update(votes: Vec<i64>) -> SharedUpdate {
        let now = Utc::now();
        Arc::new(VoteUpdateMessage::new(Poll {
            id: 1,
            question: "q".into(),
            options: vec!["a".into(), "b".into()],
            votes,
            created_at: now,
            updated_at: now,
        }))
    }

    #[tokio::test]
    async fn every_subscriber_gets_the_message() {
        let registry = registry();
        let mut first = registry.subscribe();
        let mut second = registry.subscribe();
        assert_ne!(first.handle(), second.handle());

        let report = registry.broadcast(update(vec![1, 0])).await;
        assert_eq!(
            report,
            BroadcastReport {
                delivered: 2,
                removed: 0
            }
        );
        assert_eq!(first.recv().await.unwrap().total_votes, 1);
        assert_eq!(second.recv().await.unwrap().total_votes, 1);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let registry = registry();
        let subscription = registry.subscribe();
        let handle = subscription.handle();

        assert!(registry.unsubscribe(handle));
        assert!(!registry.unsubscribe(handle));
        drop(subscription);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dropping_a_subscription_unsubscribes() {
        let registry = registry();
        let subscription = registry.subscribe();
        let handle = subscription.handle();
        drop(subscription);

        assert!(!registry.contains(handle));
        assert_eq!(registry.broadcast(update(vec![1, 0])).await.delivered, 0);
    }

    #[tokio::test]
    async fn closed_receivers_are_removed_without_hurting_others() {
        let registry = registry();
        let mut healthy = registry.subscribe();

        // simulate a connection that died without unsubscribing
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        registry.subscribers.lock().insert(999, tx);

        let report = registry.broadcast(update(vec![0, 1])).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(healthy.recv().await.unwrap().poll.votes, vec![0, 1]);
    }

    #[tokio::test]
    async fn stalled_subscribers_time_out_and_are_removed() {
        let registry = registry();
        let stalled = registry.subscribe();
        let mut live = registry.subscribe();

        // the stalled side never reads, so its queue of 4 fills up
        for n in 0..4 {
            let report = registry.broadcast(update(vec![n, 0])).await;
            assert_eq!(report.delivered, 2);
            live.recv().await.unwrap();
        }

        let report = timeout(Duration::from_secs(1), registry.broadcast(update(vec![9, 0])))
            .await
            .expect("broadcast must be bounded by the send timeout");
        assert_eq!(report.delivered, 1);
        assert_eq!(report.removed, 1);
        assert!(!registry.contains(stalled.handle()));
        assert!(registry.contains(live.handle()));
        assert_eq!(live.recv().await.unwrap().poll.votes, vec![9, 0]);
    }

    #[tokio::test]
    async fn removed_subscription_stream_ends() {
        let registry = registry();
        let mut subscription = registry.subscribe();
        registry.unsubscribe(subscription.handle());
        assert!(subscription.recv().await.is_none());
    }

    #[tokio::test]
    async fn late_joiners_get_no_replay() {
        let registry = registry();
        registry.broadcast(update(vec![1, 0])).await;

        let mut late = registry.subscribe();
        let nothing = timeout(Duration::from_millis(50), late.recv()).await;
        assert!(nothing.is_err());
    }
}
