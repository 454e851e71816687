use crate::db::{Poll, PollId, PollRepository};
use crate::error::{PollError, StoreError};
use crate::realtime::UpdateDispatcher;
use crate::store::retry_once;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// One async lock per poll, created on demand and dropped once nobody holds
/// or waits on it.
#[derive(Default)]
pub struct PollLocks {
    locks: Mutex<HashMap<PollId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PollLocks {
    pub async fn acquire(&self, id: PollId) -> PollGuard<'_> {
        let lock = self.locks.lock().entry(id).or_default().clone();
        // built before waiting so a cancelled waiter still prunes the entry
        let mut guard = PollGuard {
            locks: self,
            id,
            guard: None,
        };
        guard.guard = Some(lock.lock_owned().await);
        guard
    }

    /// Number of polls that currently have a lock allocated.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, id: PollId) {
        let mut locks = self.locks.lock();
        // every holder and waiter keeps a clone, so a count of one is the map alone
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&id);
        }
    }
}

pub struct PollGuard<'a> {
    locks: &'a PollLocks,
    id: PollId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(self.id);
    }
}

/// Applies single votes to poll tallies.
///
/// Votes on the same poll are serialized by that poll's lock; votes on
/// different polls never wait on each other. The update is handed to the
/// dispatcher while the lock is still held, so dispatch order matches commit
/// order.
pub struct VoteMutator {
    repo: Arc<dyn PollRepository>,
    locks: Arc<PollLocks>,
    dispatcher: Arc<UpdateDispatcher>,
}

impl VoteMutator {
    pub fn new(
        repo: Arc<dyn PollRepository>,
        locks: Arc<PollLocks>,
        dispatcher: Arc<UpdateDispatcher>,
    ) -> Self {
        VoteMutator {
            repo,
            locks,
            dispatcher,
        }
    }

    pub async fn cast_vote(&self, poll_id: PollId, option_index: i64) -> Result<Poll, PollError> {
        let _guard = self.locks.acquire(poll_id).await;

        let poll = retry_once("load poll for vote", || self.repo.get(poll_id))
            .await?
            .ok_or(PollError::PollNotFound)?;

        let votes = incremented_tally(&poll, option_index)?;

        let updated = retry_once("store tally", || self.repo.replace_votes(poll_id, votes.clone()))
            .await?
            .ok_or(PollError::PollNotFound)?;

        debug!(
            poll_id,
            option_index,
            total_votes = updated.total_votes(),
            "vote committed"
        );
        self.dispatcher.dispatch(&updated);

        Ok(updated)
    }
}

/// Builds a fresh tally with one more vote for `option_index`.
fn incremented_tally(poll: &Poll, option_index: i64) -> Result<Vec<i64>, PollError> {
    let invalid = PollError::InvalidIndex {
        index: option_index,
        options: poll.options.len(),
    };
    let index = usize::try_from(option_index)
        .ok()
        .filter(|&i| i < poll.options.len())
        .ok_or(invalid)?;

    let mut votes = poll.votes.clone();
    match votes.get_mut(index) {
        Some(tally) => *tally += 1,
        None => {
            return Err(PollError::Store(StoreError::Database(format!(
                "poll {} has {} tallies for {} options",
                poll.id,
                poll.votes.len(),
                poll.options.len()
            ))));
        }
    }
    Ok(votes)
}
