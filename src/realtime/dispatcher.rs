use crate::config::LiveConfig;
use crate::db::{Poll, PollId};
use crate::realtime::broadcaster::{SharedUpdate, SubscriberRegistry};
use crate::realtime::models::VoteUpdateMessage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

type WorkerMap = Arc<Mutex<HashMap<PollId, Worker>>>;

struct Worker {
    generation: u64,
    tx: mpsc::Sender<SharedUpdate>,
    handle: JoinHandle<()>,
}

/// Turns committed votes into broadcasts without making the voter wait.
///
/// Each poll gets its own bounded queue and a background worker that
/// broadcasts the queued updates one at a time, so every subscriber sees a
/// poll's tallies in commit order. Workers for different polls run
/// independently and exit after sitting idle.
pub struct UpdateDispatcher {
    registry: Arc<SubscriberRegistry>,
    workers: WorkerMap,
    generations: AtomicU64,
    queue_capacity: usize,
    idle: Duration,
}

impl UpdateDispatcher {
    pub fn new(registry: Arc<SubscriberRegistry>, config: &LiveConfig) -> Self {
        UpdateDispatcher {
            registry,
            workers: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
            queue_capacity: config.dispatch_queue_capacity,
            idle: config.dispatch_idle,
        }
    }

    /// Queues a `vote_update` for `poll`. Never waits on delivery.
    pub fn dispatch(&self, poll: &Poll) {
        let update = Arc::new(VoteUpdateMessage::new(poll.clone()));
        let mut workers = self.workers.lock();

        let worker = workers
            .entry(poll.id)
            .or_insert_with(|| self.spawn_worker(poll.id));

        match worker.tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(poll_id = poll.id, "dispatch queue full, dropping update");
            }
            Err(TrySendError::Closed(update)) => {
                // worker died without deregistering; replace it
                let replacement = self.spawn_worker(poll.id);
                if replacement.tx.try_send(update).is_err() {
                    warn!(poll_id = poll.id, "fresh dispatch worker refused update");
                }
                workers.insert(poll.id, replacement);
            }
        }
    }

    /// Stops accepting updates for a deleted poll. Updates already queued are
    /// still delivered.
    pub fn retire(&self, poll_id: PollId) {
        if self.workers.lock().remove(&poll_id).is_some() {
            debug!(poll_id, "dispatch worker retired");
        }
    }

    pub fn active_workers(&self) -> usize {
        self.workers.lock().len()
    }

    /// Closes every queue and waits for the workers to flush them.
    pub async fn shutdown(&self) {
        let workers: Vec<Worker> = self.workers.lock().drain().map(|(_, w)| w).collect();
        info!(workers = workers.len(), "flushing dispatch workers");

        for Worker { tx, handle, .. } in workers {
            drop(tx);
            if let Err(e) = handle.await {
                error!("dispatch worker failed: {e}");
            }
        }
    }

    fn spawn_worker(&self, poll_id: PollId) -> Worker {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let handle = tokio::spawn(run_worker(
            poll_id,
            generation,
            rx,
            Arc::clone(&self.registry),
            Arc::clone(&self.workers),
            self.idle,
        ));
        debug!(poll_id, generation, "dispatch worker started");

        Worker {
            generation,
            tx,
            handle,
        }
    }
}

async fn run_worker(
    poll_id: PollId,
    generation: u64,
    mut rx: mpsc::Receiver<SharedUpdate>,
    registry: Arc<SubscriberRegistry>,
    workers: WorkerMap,
    idle: Duration,
) {
    loop {
        match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(update)) => {
                let report = registry.broadcast(update).await;
                trace!(
                    poll_id,
                    delivered = report.delivered,
                    removed = report.removed,
                    "vote update broadcast"
                );
            }
            Ok(None) => break,
            Err(_) => {
                // dispatch() sends while holding this lock, so an empty queue
                // here cannot gain a message before the entry is gone
                let mut workers = workers.lock();
                if !rx.is_empty() {
                    continue;
                }
                if workers
                    .get(&poll_id)
                    .is_some_and(|w| w.generation == generation)
                {
                    workers.remove(&poll_id);
                }
                break;
            }
        }
    }
    debug!(poll_id, generation, "dispatch worker stopped");
}
