use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Failures coming out of a poll repository.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The store could not be reached; the same call may succeed if retried.
    #[error("Transient store error: {0}")]
    Transient(String),
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Transient(error.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PollError {
    #[error("Invalid poll: {0}")]
    Validation(String),
    #[error("Poll not found")]
    PollNotFound,
    #[error("Option index {index} is out of range for a poll with {options} options")]
    InvalidIndex { index: i64, options: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            PollError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "Invalid poll"),
            PollError::PollNotFound => (StatusCode::NOT_FOUND, "Poll not found"),
            PollError::InvalidIndex { .. } => (StatusCode::BAD_REQUEST, "Invalid option index"),
            PollError::Store(StoreError::Transient(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Store temporarily unavailable")
            }
            PollError::Store(StoreError::Database(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
            }
        };

        if status.is_server_error() {
            error!("{}", self);
        }

        let body = Json(json!({
            "error": error_message,
            "details": self.to_string()
        }));

        (status, body).into_response()
    }
}
