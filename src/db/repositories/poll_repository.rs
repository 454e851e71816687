use crate::db::connection::DbPool;
use crate::db::models::{Poll, PollId};
use crate::error::StoreError;
use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::PgRow;
use sqlx::types::Json;

/// Persistent CRUD for polls.
///
/// Every write is committed before the call returns, so a `get` issued
/// afterwards by any caller observes it. Returned polls are snapshots.
#[async_trait]
pub trait PollRepository: Send + Sync {
    /// Inserts a poll with an all-zero tally. Input is assumed validated.
    async fn create(&self, question: &str, options: &[String]) -> Result<Poll, StoreError>;

    async fn get(&self, id: PollId) -> Result<Option<Poll>, StoreError>;

    /// Polls in insertion order.
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Poll>, StoreError>;

    async fn count(&self) -> Result<i64, StoreError>;

    /// Replaces the whole tally and refreshes `updated_at`. Returns `None`
    /// when the poll no longer exists.
    async fn replace_votes(&self, id: PollId, votes: Vec<i64>)
    -> Result<Option<Poll>, StoreError>;

    /// Returns whether a poll was removed.
    async fn delete(&self, id: PollId) -> Result<bool, StoreError>;
}

const POLL_COLUMNS: &str = "id, question, options, votes, created_at, updated_at";

pub struct PgPollRepository {
    pool: DbPool,
}

impl PgPollRepository {
    pub fn new(pool: DbPool) -> Self {
        PgPollRepository { pool }
    }
}

fn poll_from_row(row: PgRow) -> Poll {
    let options: Json<Vec<String>> = row.get("options");
    let votes: Json<Vec<i64>> = row.get("votes");
    Poll {
        id: row.get("id"),
        question: row.get("question"),
        options: options.0,
        votes: votes.0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl PollRepository for PgPollRepository {
    async fn create(&self, question: &str, options: &[String]) -> Result<Poll, StoreError> {
        let votes = vec![0_i64; options.len()];

        let row = sqlx::query(&format!(
            "INSERT INTO polls (question, options, votes) VALUES ($1, $2, $3) RETURNING {POLL_COLUMNS}"
        ))
        .bind(question)
        .bind(Json(options))
        .bind(Json(votes))
        .fetch_one(&self.pool)
        .await?;

        Ok(poll_from_row(row))
    }

    async fn get(&self, id: PollId) -> Result<Option<Poll>, StoreError> {
        let row = sqlx::query(&format!("SELECT {POLL_COLUMNS} FROM polls WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(poll_from_row))
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Poll>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {POLL_COLUMNS} FROM polls ORDER BY id OFFSET $1 LIMIT $2"
        ))
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(poll_from_row).collect())
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM polls")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("total"))
    }

    async fn replace_votes(
        &self,
        id: PollId,
        votes: Vec<i64>,
    ) -> Result<Option<Poll>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE polls SET votes = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $1 RETURNING {POLL_COLUMNS}"
        ))
        .bind(id)
        .bind(Json(votes))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(poll_from_row))
    }

    async fn delete(&self, id: PollId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM polls WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
