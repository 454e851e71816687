use crate::db::{NewPoll, PollId};
use crate::error::PollError;
use crate::startup::AppState;
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const DEFAULT_LIMIT: i64 = 100;

// Request/Response DTOs
#[derive(Debug, Deserialize)]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListPollsQuery {
    #[serde(alias = "skip")]
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub option_index: i64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Service status plus the number of stored polls.
pub async fn health(
    Extension(app_state): Extension<AppState>,
) -> Result<impl IntoResponse, PollError> {
    let total_polls = app_state.store.count().await?;

    Ok(Json(MessageResponse {
        status: "ok",
        message: "Poll service is running".to_string(),
        data: Some(json!({ "total_polls": total_polls })),
    }))
}

pub async fn list_polls(
    Extension(app_state): Extension<AppState>,
    Query(query): Query<ListPollsQuery>,
) -> Result<impl IntoResponse, PollError> {
    let polls = app_state
        .store
        .list(query.offset.unwrap_or(0), query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;

    Ok((StatusCode::OK, Json(polls)))
}

pub async fn create_poll(
    Extension(app_state): Extension<AppState>,
    Json(payload): Json<CreatePollRequest>,
) -> Result<impl IntoResponse, PollError> {
    let poll = app_state
        .store
        .create(NewPoll::new(payload.question, payload.options))
        .await?;

    Ok((StatusCode::CREATED, Json(poll)))
}

pub async fn get_poll(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<PollId>,
) -> Result<impl IntoResponse, PollError> {
    let poll = app_state.store.get(poll_id).await?;
    Ok((StatusCode::OK, Json(poll)))
}

/// Cast a vote. The response does not wait for live subscribers.
pub async fn vote_on_poll(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<PollId>,
    Json(payload): Json<CastVoteRequest>,
) -> Result<impl IntoResponse, PollError> {
    let poll = app_state
        .votes
        .cast_vote(poll_id, payload.option_index)
        .await?;

    Ok((StatusCode::OK, Json(poll)))
}

pub async fn poll_stats(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<PollId>,
) -> Result<impl IntoResponse, PollError> {
    let poll = app_state.store.get(poll_id).await?;
    Ok((StatusCode::OK, Json(poll.stats())))
}

pub async fn delete_poll(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<PollId>,
) -> Result<impl IntoResponse, PollError> {
    let poll = app_state.store.get(poll_id).await?;
    app_state.store.delete(poll_id).await?;
    app_state.dispatcher.retire(poll_id);

    Ok((
        StatusCode::OK,
        Json(MessageResponse {
            status: "success",
            message: format!("Poll '{}' was deleted", poll.question),
            data: Some(json!({ "deleted_poll_id": poll_id })),
        }),
    ))
}

fn sample_polls() -> Vec<NewPoll> {
    let options = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
    vec![
        NewPoll::new(
            "What is your favourite programming language?",
            options(&["Python", "JavaScript", "Java", "C++"]),
        ),
        NewPoll::new(
            "What should we have for lunch?",
            options(&["Korean", "Chinese", "Japanese", "Western"]),
        ),
        NewPoll::new(
            "Which development environment do you prefer?",
            options(&["VS Code", "IntelliJ", "PyCharm", "Vim"]),
        ),
    ]
}

/// Seeds a few sample polls into an empty store.
pub async fn init_data(
    Extension(app_state): Extension<AppState>,
) -> Result<impl IntoResponse, PollError> {
    if app_state.store.count().await? > 0 {
        return Ok(Json(MessageResponse {
            status: "info",
            message: "Polls already exist".to_string(),
            data: None,
        }));
    }

    let samples = sample_polls();
    let created = samples.len();
    for poll in samples {
        app_state.store.create(poll).await?;
    }

    Ok(Json(MessageResponse {
        status: "success",
        message: "Sample polls created".to_string(),
        data: Some(json!({ "created_polls": created })),
    }))
}
