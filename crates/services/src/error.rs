//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::lifecycle::TransitionError;
use exam_core::model::{AnswerError, ChainError, PayloadError, QuestionId};
use exam_storage::repository::StorageError;
use exam_storage::sqlite::SqliteInitError;

/// Errors talking to the remote authority.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RemoteError {
    #[error("remote request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("remote response could not be decoded: {0}")]
    Decode(String),
    #[error("part has no schedule id; nothing to send")]
    MissingSchedule,
    #[error("remote authority unavailable: {0}")]
    Unavailable(String),
}

/// Errors emitted by the per-part runtime and the chain around it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    #[error("part is {state}, not in progress")]
    NotInProgress { state: &'static str },
    #[error("no question at index {0}")]
    NoSuchQuestion(usize),
    #[error("question {0} is not part of this exam")]
    UnknownQuestion(QuestionId),
    #[error(transparent)]
    Answer(#[from] AnswerError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Errors reading runtime configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid {var} value: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Errors emitted while bootstrapping exam services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExamServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
