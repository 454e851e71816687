use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use std::collections::HashSet;

pub type PollId = i64;

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 10;
pub const MAX_QUESTION_CHARS: usize = 500;

/// A snapshot of a stored poll. `votes[i]` is the tally for `options[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<String>,
    pub votes: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Poll {
    pub fn total_votes(&self) -> i64 {
        self.votes.iter().sum()
    }

    pub fn stats(&self) -> PollStats {
        let total_votes = self.total_votes();
        let results = self
            .options
            .iter()
            .zip(&self.votes)
            .map(|(option, &votes)| OptionResult {
                option: option.clone(),
                votes,
                percentage: percentage(votes, total_votes),
            })
            .collect();

        PollStats {
            poll_id: self.id,
            question: self.question.clone(),
            total_votes,
            results,
        }
    }
}

fn percentage(votes: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = votes as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollStats {
    pub poll_id: PollId,
    pub question: String,
    pub total_votes: i64,
    pub results: Vec<OptionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionResult {
    pub option: String,
    pub votes: i64,
    pub percentage: f64,
}

/// A poll creation request that has not been validated yet.
#[derive(Debug, Clone)]
pub struct NewPoll {
    pub question: String,
    pub options: Vec<String>,
}

impl NewPoll {
    pub fn new(question: impl Into<String>, options: Vec<String>) -> Self {
        NewPoll {
            question: question.into(),
            options,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.question.trim().is_empty() {
            return Err("question must not be empty".to_string());
        }
        if self.question.chars().count() > MAX_QUESTION_CHARS {
            return Err(format!(
                "question must be at most {MAX_QUESTION_CHARS} characters"
            ));
        }
        if self.options.len() < MIN_OPTIONS {
            return Err(format!("a poll needs at least {MIN_OPTIONS} options"));
        }
        if self.options.len() > MAX_OPTIONS {
            return Err(format!("a poll allows at most {MAX_OPTIONS} options"));
        }
        if self.options.iter().any(|option| option.trim().is_empty()) {
            return Err("options must not be blank".to_string());
        }

        let mut seen = HashSet::with_capacity(self.options.len());
        if let Some(duplicate) = self.options.iter().find(|option| !seen.insert(option.as_str())) {
            return Err(format!("duplicate option {duplicate:?}"));
        }

        Ok(())
    }
}
