use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{ExamId, ExamKey};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChainError {
    #[error("exam chain has no parts")]
    Empty,

    #[error("part {0} appears more than once in the chain")]
    DuplicatePart(ExamKey),

    #[error("part {0} is not in the chain")]
    UnknownPart(ExamKey),
}

/// One part of a chained exam, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamOrderEntry {
    pub key: ExamKey,
    pub name: String,
    pub exam_id: ExamId,
    #[serde(default)]
    pub exam_type: String,
}

/// Ordered, read-only list of parts. Order defines traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamChain {
    parts: Vec<ExamOrderEntry>,
}

impl ExamChain {
    /// # Errors
    ///
    /// Returns `ChainError::Empty` for an empty list and
    /// `ChainError::DuplicatePart` if a key repeats.
    pub fn new(parts: Vec<ExamOrderEntry>) -> Result<Self, ChainError> {
        if parts.is_empty() {
            return Err(ChainError::Empty);
        }
        let mut seen = HashSet::with_capacity(parts.len());
        for part in &parts {
            if !seen.insert(&part.key) {
                return Err(ChainError::DuplicatePart(part.key.clone()));
            }
        }
        Ok(Self { parts })
    }

    #[must_use]
    pub fn parts(&self) -> &[ExamOrderEntry] {
        &self.parts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> &ExamOrderEntry {
        &self.parts[0]
    }

    #[must_use]
    pub fn position(&self, key: &ExamKey) -> Option<usize> {
        self.parts.iter().position(|p| &p.key == key)
    }

    /// # Errors
    ///
    /// Returns `ChainError::UnknownPart` if `key` is not in the chain.
    pub fn get(&self, key: &ExamKey) -> Result<&ExamOrderEntry, ChainError> {
        self.parts
            .iter()
            .find(|p| &p.key == key)
            .ok_or_else(|| ChainError::UnknownPart(key.clone()))
    }

    /// The part after `key`, or `None` when `key` is the last one.
    ///
    /// # Errors
    ///
    /// Returns `ChainError::UnknownPart` if `key` is not in the chain.
    pub fn next_after(&self, key: &ExamKey) -> Result<Option<&ExamOrderEntry>, ChainError> {
        let idx = self
            .position(key)
            .ok_or_else(|| ChainError::UnknownPart(key.clone()))?;
        Ok(self.parts.get(idx + 1))
    }

    /// Where an interrupted chain picks up, scanning from the end.
    ///
    /// The latest part with an unfinished local record wins. A part whose
    /// record only survives as already accepted points at the part after it;
    /// the last part points at itself so its completion still runs.
    #[must_use]
    pub fn resume_point(
        &self,
        in_progress: &HashSet<ExamKey>,
        accepted: &HashSet<ExamKey>,
    ) -> Option<&ExamOrderEntry> {
        let (idx, part) = self
            .parts
            .iter()
            .enumerate()
            .rev()
            .find(|(_, p)| in_progress.contains(&p.key) || accepted.contains(&p.key))?;
        if in_progress.contains(&part.key) {
            return Some(part);
        }
        Some(self.parts.get(idx + 1).unwrap_or(part))
    }
}
