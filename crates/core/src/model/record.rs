use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::SubmitTrigger;
use crate::model::answer::Answer;
use crate::model::ids::QuestionId;

/// Accumulated visible seconds per question.
pub type ElapsedTimes = BTreeMap<QuestionId, u64>;

/// The question currently being timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionVisit {
    pub question_id: QuestionId,
    pub opened_at: DateTime<Utc>,
}

/// A final submission that was started and not yet acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSubmit {
    pub trigger: SubmitTrigger,
    pub requested_at: DateTime<Utc>,
}

/// Local, per-part record of answers and visit timing.
///
/// Persisted whole by the Durable Local Store; callers load it, mutate it with
/// the methods below and write it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamSessionRecord {
    #[serde(default)]
    answers: BTreeMap<QuestionId, Answer>,
    start_time: DateTime<Utc>,
    #[serde(default)]
    question_elapsed_times: ElapsedTimes,
    #[serde(default)]
    last_question_visit: Option<QuestionVisit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending_submit: Option<PendingSubmit>,
    /// Set when the remote authority acknowledged the submission but the
    /// record could not be deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    acknowledged_at: Option<DateTime<Utc>>,
}

impl ExamSessionRecord {
    #[must_use]
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            answers: BTreeMap::new(),
            start_time,
            question_elapsed_times: ElapsedTimes::new(),
            last_question_visit: None,
            pending_submit: None,
            acknowledged_at: None,
        }
    }

    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    #[must_use]
    pub fn answers(&self) -> &BTreeMap<QuestionId, Answer> {
        &self.answers
    }

    #[must_use]
    pub fn question_elapsed_times(&self) -> &ElapsedTimes {
        &self.question_elapsed_times
    }

    #[must_use]
    pub fn last_question_visit(&self) -> Option<QuestionVisit> {
        self.last_question_visit
    }

    #[must_use]
    pub fn pending_submit(&self) -> Option<PendingSubmit> {
        self.pending_submit
    }

    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }

    /// Remember that a final submission started. The first trigger sticks.
    pub fn request_submit(&mut self, trigger: SubmitTrigger, now: DateTime<Utc>) {
        if self.pending_submit.is_none() {
            self.pending_submit = Some(PendingSubmit {
                trigger,
                requested_at: now,
            });
        }
    }

    pub fn acknowledge(&mut self, now: DateTime<Utc>) {
        self.acknowledged_at.get_or_insert(now);
    }

    pub fn set_answer(&mut self, question_id: QuestionId, answer: Answer) {
        self.answers.insert(question_id, answer);
    }

    pub fn clear_answer(&mut self, question_id: QuestionId) -> Option<Answer> {
        self.answers.remove(&question_id)
    }

    /// Open `question_id` for timing at `now`, folding the previously open
    /// question's interval first.
    ///
    /// Re-visiting the question that is already open leaves its interval
    /// running.
    pub fn visit(&mut self, question_id: QuestionId, now: DateTime<Utc>) {
        let opened_at = match self.last_question_visit {
            Some(open) if open.question_id == question_id => open.opened_at,
            Some(open) => self.fold(open, now),
            None => now,
        };
        self.last_question_visit = Some(QuestionVisit {
            question_id,
            opened_at,
        });
        self.question_elapsed_times.entry(question_id).or_insert(0);
    }

    /// Fold the open interval (if any) and close it.
    ///
    /// Calling this again without an intervening `visit` changes nothing.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> &ElapsedTimes {
        if let Some(open) = self.last_question_visit.take() {
            self.fold(open, now);
        }
        &self.question_elapsed_times
    }

    /// Elapsed times as `finalize` would report them at `now`, without
    /// closing the open interval.
    #[must_use]
    pub fn elapsed_snapshot(&self, now: DateTime<Utc>) -> ElapsedTimes {
        let mut snapshot = self.question_elapsed_times.clone();
        if let Some(open) = self.last_question_visit {
            *snapshot.entry(open.question_id).or_insert(0) += whole_seconds(open.opened_at, now);
        }
        snapshot
    }

    #[must_use]
    pub fn total_elapsed(&self) -> u64 {
        self.question_elapsed_times.values().sum()
    }

    /// Overlay the server's view of answers and elapsed times; the server's
    /// value wins for every key it carries.
    ///
    /// A server value already covers the open interval up to its checkpoint,
    /// so an open visit on such a question restarts at `now`.
    pub fn merge_remote(
        &mut self,
        answers: BTreeMap<QuestionId, Answer>,
        elapsed: &ElapsedTimes,
        now: DateTime<Utc>,
    ) {
        self.answers.extend(answers);
        for (question_id, seconds) in elapsed {
            self.question_elapsed_times.insert(*question_id, *seconds);
        }
        if let Some(open) = self.last_question_visit.as_mut() {
            if elapsed.contains_key(&open.question_id) {
                open.opened_at = now;
            }
        }
    }

    /// Adds the whole seconds of `open` to its question and returns the
    /// instant the next interval starts from. The sub-second remainder is
    /// carried into that next interval rather than dropped.
    fn fold(&mut self, open: QuestionVisit, now: DateTime<Utc>) -> DateTime<Utc> {
        let seconds = whole_seconds(open.opened_at, now);
        *self
            .question_elapsed_times
            .entry(open.question_id)
            .or_insert(0) += seconds;
        open.opened_at + Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
    }
}

/// Whole seconds from `from` to `to`, floored; zero if the clock went backwards.
#[must_use]
pub fn whole_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_seconds()).unwrap_or(0)
}
