use crate::db::Poll;
use serde::Serialize;

/// Pushed to every live subscriber after a vote commits.
///
/// Serializes as `{"type": "vote_update", "poll": {...}, "total_votes": n}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "vote_update")]
pub struct VoteUpdateMessage {
    pub poll: Poll,
    pub total_votes: i64,
}

impl VoteUpdateMessage {
    pub const EVENT: &'static str = "vote_update";

    pub fn new(poll: Poll) -> Self {
        let total_votes = poll.total_votes();
        VoteUpdateMessage { poll, total_votes }
    }
}
