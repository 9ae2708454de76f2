use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AnswerError {
    #[error("answer shape {found} does not fit a {expected} question")]
    KindMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("answer value cannot be read as {expected}")]
    Unreadable { expected: &'static str },

    #[error("expected {expected} statements, got {found}")]
    StatementCount { expected: usize, found: usize },
}

//
// ─── QUESTION KIND ────────────────────────────────────────────────────────────
//

/// Declared type of a question, as sent in the question payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// One option out of many.
    #[serde(alias = "single_choice")]
    MultipleChoice,
    /// Any subset of the options.
    #[serde(alias = "multi_choice", alias = "checkbox")]
    MultipleAnswer,
    TrueFalse,
    Numeric,
    #[serde(alias = "essay", alias = "short_answer")]
    FreeText,
    /// A list of statements, each judged true or false by position.
    #[serde(alias = "true_false_statements")]
    Statements,
}

impl QuestionKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            QuestionKind::MultipleChoice => "multiple-choice",
            QuestionKind::MultipleAnswer => "multiple-answer",
            QuestionKind::TrueFalse => "true/false",
            QuestionKind::Numeric => "numeric",
            QuestionKind::FreeText => "free-text",
            QuestionKind::Statements => "statements",
        }
    }
}

//
// ─── ANSWER ───────────────────────────────────────────────────────────────────
//

/// A candidate's answer, closed over the shapes the runtime understands.
///
/// Remote and wire representations are plain JSON (scalar, list, or positional
/// boolean list); [`Answer::resolve`] turns them into this union once, using
/// the declared [`QuestionKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Answer {
    /// Scalar choice: an option key, or `"true"` / `"false"`.
    Choice(String),
    MultiChoice(BTreeSet<String>),
    Numeric(f64),
    FreeText(String),
    /// Positional verdicts; `None` means the statement is still unjudged.
    Statements(Vec<Option<bool>>),
}

impl Answer {
    fn shape(&self) -> &'static str {
        match self {
            Answer::Choice(_) => "choice",
            Answer::MultiChoice(_) => "multi-choice",
            Answer::Numeric(_) => "numeric",
            Answer::FreeText(_) => "free-text",
            Answer::Statements(_) => "statements",
        }
    }

    /// Resolve a raw JSON answer against the question's declared kind.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::Unreadable` when the value has no sensible reading
    /// for that kind.
    pub fn resolve(kind: QuestionKind, raw: &Value) -> Result<Self, AnswerError> {
        let unreadable = AnswerError::Unreadable {
            expected: kind.label(),
        };
        match kind {
            QuestionKind::MultipleChoice => scalar_text(raw).map(Answer::Choice).ok_or(unreadable),
            QuestionKind::TrueFalse => match raw {
                Value::Bool(b) => Ok(Answer::Choice(b.to_string())),
                Value::String(s) if s == "true" || s == "false" => Ok(Answer::Choice(s.clone())),
                _ => Err(unreadable),
            },
            QuestionKind::MultipleAnswer => match raw {
                Value::Array(items) => items
                    .iter()
                    .map(scalar_text)
                    .collect::<Option<BTreeSet<_>>>()
                    .map(Answer::MultiChoice)
                    .ok_or(unreadable),
                other => scalar_text(other)
                    .map(|single| Answer::MultiChoice(BTreeSet::from([single])))
                    .ok_or(unreadable),
            },
            QuestionKind::Numeric => match raw {
                Value::Number(n) => n.as_f64().map(Answer::Numeric).ok_or(unreadable),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Answer::Numeric)
                    .map_err(|_| unreadable),
                _ => Err(unreadable),
            },
            QuestionKind::FreeText => match raw {
                Value::String(s) => Ok(Answer::FreeText(s.clone())),
                _ => Err(unreadable),
            },
            QuestionKind::Statements => match raw {
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::Bool(b) => Some(Some(*b)),
                        Value::Null => Some(None),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()
                    .map(Answer::Statements)
                    .ok_or(unreadable),
                _ => Err(unreadable),
            },
        }
    }

    /// Check that this answer has the shape a question of `kind` expects.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::KindMismatch` for a wrong shape, or
    /// `AnswerError::StatementCount` when a positional list has the wrong length.
    pub fn check(&self, kind: QuestionKind, statement_count: usize) -> Result<(), AnswerError> {
        let fits = match (kind, self) {
            (QuestionKind::MultipleChoice, Answer::Choice(_))
            | (QuestionKind::MultipleAnswer, Answer::MultiChoice(_))
            | (QuestionKind::Numeric, Answer::Numeric(_))
            | (QuestionKind::FreeText, Answer::FreeText(_)) => true,
            (QuestionKind::TrueFalse, Answer::Choice(v)) => v == "true" || v == "false",
            (QuestionKind::Statements, Answer::Statements(items)) => {
                if items.len() != statement_count {
                    return Err(AnswerError::StatementCount {
                        expected: statement_count,
                        found: items.len(),
                    });
                }
                true
            }
            _ => false,
        };
        if fits {
            Ok(())
        } else {
            Err(AnswerError::KindMismatch {
                expected: kind.label(),
                found: self.shape(),
            })
        }
    }

    /// Whether the answer counts as answered for progress display.
    #[must_use]
    pub fn is_answered(&self) -> bool {
        match self {
            Answer::Choice(v) => !v.is_empty(),
            Answer::MultiChoice(set) => !set.is_empty(),
            Answer::Numeric(n) => n.is_finite(),
            Answer::FreeText(text) => !text.trim().is_empty(),
            Answer::Statements(items) => !items.is_empty() && items.iter().all(Option::is_some),
        }
    }

    /// The plain JSON form sent to the remote authority.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        match self {
            Answer::Choice(v) | Answer::FreeText(v) => Value::String(v.clone()),
            Answer::MultiChoice(set) => {
                Value::Array(set.iter().cloned().map(Value::String).collect())
            }
            Answer::Numeric(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
            Answer::Statements(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.map_or(Value::Null, Value::Bool))
                    .collect(),
            ),
        }
    }
}

fn scalar_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
