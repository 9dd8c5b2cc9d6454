use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::note::Note;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry a path: {0}")]
    CannotBeABase(String),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("note not found on remote: {0}")]
    NotFound(String),
    #[error("remote unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

impl RemoteError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            RemoteError::Api { status, .. } => Some(classify_api_status(*status)),
            RemoteError::NotFound(_) => Some(ApiErrorClass::Permanent),
            RemoteError::Unavailable(_) => Some(ApiErrorClass::Transient),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Request(err) => err.is_timeout() || err.is_connect(),
            _ => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

/// Result of a remote delete. Deleting a note the remote does not know is
/// already satisfied, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
}

/// The remote service as seen by the sync engine.
#[async_trait]
pub trait RemoteNotes: Send + Sync {
    async fn list(&self) -> Result<Vec<Note>, RemoteError>;

    /// Creates the note and returns it with server-assigned fields merged in.
    async fn create(&self, note: &Note) -> Result<Note, RemoteError>;

    async fn update(&self, id: &str, note: &Note) -> Result<Note, RemoteError>;

    async fn delete(&self, id: &str) -> Result<DeleteOutcome, RemoteError>;
}
