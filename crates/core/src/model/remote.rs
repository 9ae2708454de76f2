use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::answer::{Answer, AnswerError};
use crate::model::ids::{ExamId, QuestionId, ScheduleId};
use crate::model::question::QuestionPayload;
use crate::model::record::{ElapsedTimes, whole_seconds};

/// The remote authority's view of an active session, used to resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<ScheduleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_id: Option<ExamId>,
    #[serde(default)]
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// When set, the part opens immediately instead of waiting for `start_time`.
    #[serde(default)]
    pub is_auto_move: bool,
    #[serde(default)]
    pub answers: BTreeMap<QuestionId, Value>,
    #[serde(default)]
    pub question_elapsed_times: ElapsedTimes,
}

impl RemoteSession {
    #[must_use]
    pub fn is_accessible(&self, now: DateTime<Utc>) -> bool {
        self.is_auto_move || now >= self.start_time
    }

    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        whole_seconds(now, self.end_time)
    }

    /// Resolve raw server answers against the payload's question kinds.
    ///
    /// Answers for unknown questions or with an unreadable shape are returned
    /// separately so the caller can report them.
    #[must_use]
    pub fn resolve_answers(
        &self,
        payload: &QuestionPayload,
    ) -> (BTreeMap<QuestionId, Answer>, Vec<(QuestionId, Option<AnswerError>)>) {
        let mut resolved = BTreeMap::new();
        let mut rejected = Vec::new();
        for (question_id, raw) in &self.answers {
            let Some(question) = payload.question(*question_id) else {
                rejected.push((*question_id, None));
                continue;
            };
            match Answer::resolve(question.kind, raw) {
                Ok(answer) => {
                    resolved.insert(*question_id, answer);
                }
                Err(err) => rejected.push((*question_id, Some(err))),
            }
        }
        (resolved, rejected)
    }
}

/// Answers and timing pushed to the remote authority, for both checkpoints
/// and the final submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub schedule_id: ScheduleId,
    pub exam_id: ExamId,
    pub answers: BTreeMap<QuestionId, Value>,
    pub question_elapsed_times: ElapsedTimes,
}

impl SessionSnapshot {
    #[must_use]
    pub fn new(
        schedule_id: ScheduleId,
        exam_id: ExamId,
        answers: &BTreeMap<QuestionId, Answer>,
        question_elapsed_times: ElapsedTimes,
    ) -> Self {
        Self {
            schedule_id,
            exam_id,
            answers: answers
                .iter()
                .map(|(id, answer)| (*id, answer.to_wire()))
                .collect(),
            question_elapsed_times,
        }
    }
}
