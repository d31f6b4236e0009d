//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Stages report failures through [`Error`]. The orchestrator relies on two
//! propagation rules:
//!
//! - Errors raised inside the audio or visual branch end that branch only;
//!   the sibling keeps running. [`Error::Config`] and [`Error::Internal`]
//!   are the exception and fail the whole job.
//! - [`Error::MalformedRecord`] is recovered where it happens by dropping the
//!   offending unit.
//!
//! An empty stage result is not an error. Stages return empty vectors and the
//! ingest report records it as [`BranchOutcome::Empty`](crate::ingest::BranchOutcome).

use thiserror::Error;

/// Result alias used by every pipeline stage.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A video or audio source could not be fetched or opened.
    #[error("source unavailable ({what}): {reason}")]
    SourceUnavailable { what: String, reason: String },

    /// A chunk or payload is missing required fields.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Storage or a model collaborator is unreachable or refused the request.
    #[error("{backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn source_unavailable(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    pub fn backend(backend: impl Into<String>, reason: impl ToString) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True when the error ends a single branch but leaves siblings running.
    pub fn is_branch_local(&self) -> bool {
        !matches!(self, Error::Config(_) | Error::Internal(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::backend("sqlite", err)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::internal(format!("task failed to complete: {}", err))
    }
}
