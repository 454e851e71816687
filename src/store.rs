use crate::db::{NewPoll, Poll, PollId, PollRepository};
use crate::error::{PollError, StoreError};
use crate::votes::PollLocks;
use std::future::Future;
use std::sync::Arc;

/// Runs `op`, retrying exactly once when the store reports a transient failure.
pub(crate) async fn retry_once<T, F, Fut>(what: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            warn!("{what} failed ({e}), retrying once");
            op().await
        }
        other => other,
    }
}

/// Validating front of the poll repository.
#[derive(Clone)]
pub struct PollStore {
    repo: Arc<dyn PollRepository>,
    locks: Arc<PollLocks>,
}

impl PollStore {
    pub fn new(repo: Arc<dyn PollRepository>, locks: Arc<PollLocks>) -> Self {
        PollStore { repo, locks }
    }

    pub async fn create(&self, new_poll: NewPoll) -> Result<Poll, PollError> {
        new_poll.validate().map_err(PollError::Validation)?;

        let poll = self
            .repo
            .create(&new_poll.question, &new_poll.options)
            .await?;
        info!(poll_id = poll.id, options = poll.options.len(), "poll created");
        Ok(poll)
    }

    pub async fn get(&self, id: PollId) -> Result<Poll, PollError> {
        retry_once("load poll", || self.repo.get(id))
            .await?
            .ok_or(PollError::PollNotFound)
    }

    pub async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Poll>, PollError> {
        let (offset, limit) = (offset.max(0), limit.max(0));
        Ok(retry_once("list polls", || self.repo.list(offset, limit)).await?)
    }

    pub async fn count(&self) -> Result<i64, PollError> {
        Ok(retry_once("count polls", || self.repo.count()).await?)
    }

    /// Removes a poll once any vote in flight on it has committed.
    pub async fn delete(&self, id: PollId) -> Result<(), PollError> {
        let _guard = self.locks.acquire(id).await;

        if !self.repo.delete(id).await? {
            return Err(PollError::PollNotFound);
        }
        info!(poll_id = id, "poll deleted");
        Ok(())
    }
}
