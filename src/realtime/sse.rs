use crate::db::PollId;
use crate::error::PollError;
use crate::realtime::models::VoteUpdateMessage;
use crate::startup::AppState;
use axum::{
    extract::{Extension, Path},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde_json::json;
use std::{convert::Infallible, time::Duration};

fn vote_update_event(update: &VoteUpdateMessage) -> Option<Event> {
    match serde_json::to_string(update) {
        Ok(data) => Some(Event::default().event(VoteUpdateMessage::EVENT).data(data)),
        Err(e) => {
            error!("failed to encode vote update: {e}");
            None
        }
    }
}

fn with_keep_alive<S>(stream: S) -> Sse<S>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}

/// Every vote update, for every poll.
pub async fn live_updates_sse(
    Extension(app_state): Extension<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = app_state.registry.subscribe();

    let stream = async_stream::stream! {
        while let Some(update) = subscription.recv().await {
            if let Some(event) = vote_update_event(&update) {
                yield Ok(event);
            }
        }
    };

    with_keep_alive(stream)
}

/// The current state of one poll, followed by its vote updates.
pub async fn poll_updates_sse(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<PollId>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // subscribe before reading so no update slips between the snapshot and the stream
    let mut subscription = app_state.registry.subscribe();

    let stream = async_stream::stream! {
        let baseline = match app_state.store.get(poll_id).await {
            Ok(poll) => {
                let total_votes = poll.total_votes();
                yield Ok(Event::default()
                    .event("init")
                    .data(json!({
                        "poll": poll,
                        "total_votes": total_votes,
                    }).to_string()));
                total_votes
            }
            Err(PollError::PollNotFound) => {
                yield Ok(Event::default()
                    .event("error")
                    .data(json!({"error": "Poll not found"}).to_string()));
                return;
            }
            Err(e) => {
                yield Ok(Event::default()
                    .event("error")
                    .data(json!({"error": e.to_string()}).to_string()));
                return;
            }
        };

        while let Some(update) = subscription.recv().await {
            // tallies only grow, so anything at or below the snapshot is stale
            if update.poll.id != poll_id || update.total_votes <= baseline {
                continue;
            }
            if let Some(event) = vote_update_event(&update) {
                yield Ok(event);
            }
        }
    };

    with_keep_alive(stream)
}
