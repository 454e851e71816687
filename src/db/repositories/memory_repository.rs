use crate::db::models::{Poll, PollId};
use crate::db::repositories::PollRepository;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Process-local poll storage, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryPollRepository {
    inner: RwLock<MemoryTables>,
}

#[derive(Default)]
struct MemoryTables {
    next_id: PollId,
    polls: BTreeMap<PollId, Poll>,
}

impl MemoryPollRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PollRepository for MemoryPollRepository {
    async fn create(&self, question: &str, options: &[String]) -> Result<Poll, StoreError> {
        let mut tables = self.inner.write().await;
        tables.next_id += 1;

        let now = Utc::now();
        let poll = Poll {
            id: tables.next_id,
            question: question.to_string(),
            options: options.to_vec(),
            votes: vec![0; options.len()],
            created_at: now,
            updated_at: now,
        };
        tables.polls.insert(poll.id, poll.clone());

        Ok(poll)
    }

    async fn get(&self, id: PollId) -> Result<Option<Poll>, StoreError> {
        Ok(self.inner.read().await.polls.get(&id).cloned())
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Poll>, StoreError> {
        let tables = self.inner.read().await;
        Ok(tables
            .polls
            .values()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Ok(self.inner.read().await.polls.len() as i64)
    }

    async fn replace_votes(
        &self,
        id: PollId,
        votes: Vec<i64>,
    ) -> Result<Option<Poll>, StoreError> {
        let mut tables = self.inner.write().await;
        Ok(tables.polls.get_mut(&id).map(|poll| {
            poll.votes = votes;
            poll.updated_at = Utc::now();
            poll.clone()
        }))
    }

    async fn delete(&self, id: PollId) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.polls.remove(&id).is_some())
    }
}
