use std::collections::HashSet;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::answer::QuestionKind;
use crate::model::ids::QuestionId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PayloadError {
    #[error("question payload could not be decoded: {0}")]
    Malformed(String),

    #[error("question payload has no questions")]
    Empty,

    #[error("question payload has a zero duration")]
    ZeroDuration,

    #[error("question {0} appears more than once")]
    DuplicateQuestion(QuestionId),
}

/// One question as delivered by the (already decrypted) payload.
///
/// Rendering fields are kept opaque; the runtime only needs the id, the kind
/// and the statement count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[serde(rename = "question")]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statements: Vec<String>,
}

/// Plaintext question payload for one exam part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionPayload {
    /// Allotted time in minutes.
    pub duration: u32,
    pub questions: Vec<Question>,
}

impl QuestionPayload {
    /// Decode and validate a payload from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::Malformed` if the text is not a payload, or any
    /// validation error from [`QuestionPayload::validate`].
    pub fn from_json(text: &str) -> Result<Self, PayloadError> {
        let payload: Self =
            serde_json::from_str(text).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    /// # Errors
    ///
    /// Returns `PayloadError` when the payload is empty, has no duration, or
    /// repeats a question id.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.questions.is_empty() {
            return Err(PayloadError::Empty);
        }
        if self.duration == 0 {
            return Err(PayloadError::ZeroDuration);
        }
        let mut seen = HashSet::with_capacity(self.questions.len());
        for q in &self.questions {
            if !seen.insert(q.id) {
                return Err(PayloadError::DuplicateQuestion(q.id));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn allotted(&self) -> Duration {
        Duration::minutes(i64::from(self.duration))
    }

    #[must_use]
    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }
}
