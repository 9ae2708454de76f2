use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use exam_core::lifecycle::SubmitTrigger;
use exam_core::model::{Answer, ElapsedTimes, ExamKey, ExamSessionRecord, QuestionId};
use exam_storage::repository::{SessionStore, StorageError};

/// Store-backed elapsed-time and answer bookkeeping for exam parts.
///
/// Every mutation is a read-modify-write of the whole record; the record is
/// created lazily by the first write.
#[derive(Clone)]
pub struct ElapsedTimeTracker {
    store: Arc<dyn SessionStore>,
}

impl ElapsedTimeTracker {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    async fn load_or_create(
        &self,
        key: &ExamKey,
        now: DateTime<Utc>,
    ) -> Result<ExamSessionRecord, StorageError> {
        Ok(self
            .store
            .get(key)
            .await?
            .unwrap_or_else(|| ExamSessionRecord::new(now)))
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be read.
    pub async fn record(&self, key: &ExamKey) -> Result<Option<ExamSessionRecord>, StorageError> {
        self.store.get(key).await
    }

    /// Open `question_id` at `now`, folding the previously open question.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be read or written.
    pub async fn visit(
        &self,
        key: &ExamKey,
        question_id: QuestionId,
        now: DateTime<Utc>,
    ) -> Result<ExamSessionRecord, StorageError> {
        let mut record = self.load_or_create(key, now).await?;
        record.visit(question_id, now);
        self.store.put(key, &record).await?;
        Ok(record)
    }

    /// Fold the open interval and close it. Returns `None` when the part has
    /// no local record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be read or written.
    pub async fn finalize(
        &self,
        key: &ExamKey,
        now: DateTime<Utc>,
    ) -> Result<Option<ElapsedTimes>, StorageError> {
        let Some(mut record) = self.store.get(key).await? else {
            return Ok(None);
        };
        if record.last_question_visit().is_none() {
            return Ok(Some(record.question_elapsed_times().clone()));
        }
        let elapsed = record.finalize(now).clone();
        self.store.put(key, &record).await?;
        Ok(Some(elapsed))
    }

    /// Close the open interval and mark the final submission as started, in
    /// one write, so a reload before the acknowledgement resumes at the retry.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be read or written.
    pub async fn finalize_for_submit(
        &self,
        key: &ExamKey,
        trigger: SubmitTrigger,
        now: DateTime<Utc>,
    ) -> Result<ExamSessionRecord, StorageError> {
        let mut record = self.load_or_create(key, now).await?;
        record.finalize(now);
        record.request_submit(trigger, now);
        self.store.put(key, &record).await?;
        Ok(record)
    }

    /// Mark the part as accepted by the remote authority. Used when the
    /// record outlives the acknowledgement because the delete failed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be read or written.
    pub async fn acknowledge(&self, key: &ExamKey, now: DateTime<Utc>) -> Result<(), StorageError> {
        let Some(mut record) = self.store.get(key).await? else {
            return Ok(());
        };
        record.acknowledge(now);
        self.store.put(key, &record).await
    }

    /// Answers and elapsed times as of `now`, including the open interval,
    /// without mutating the stored record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be read.
    pub async fn snapshot(
        &self,
        key: &ExamKey,
        now: DateTime<Utc>,
    ) -> Result<Option<(BTreeMap<QuestionId, Answer>, ElapsedTimes)>, StorageError> {
        Ok(self
            .store
            .get(key)
            .await?
            .map(|record| (record.answers().clone(), record.elapsed_snapshot(now))))
    }

    /// Store or clear (`None`) the answer for `question_id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be read or written.
    pub async fn set_answer(
        &self,
        key: &ExamKey,
        question_id: QuestionId,
        answer: Option<Answer>,
        now: DateTime<Utc>,
    ) -> Result<ExamSessionRecord, StorageError> {
        let mut record = self.load_or_create(key, now).await?;
        match answer {
            Some(answer) => record.set_answer(question_id, answer),
            None => {
                record.clear_answer(question_id);
            }
        }
        self.store.put(key, &record).await?;
        Ok(record)
    }

    /// Overlay the remote session's answers and elapsed times.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be read or written.
    pub async fn merge_remote(
        &self,
        key: &ExamKey,
        answers: BTreeMap<QuestionId, Answer>,
        elapsed: &ElapsedTimes,
        now: DateTime<Utc>,
    ) -> Result<ExamSessionRecord, StorageError> {
        let mut record = self.load_or_create(key, now).await?;
        record.merge_remote(answers, elapsed, now);
        self.store.put(key, &record).await?;
        Ok(record)
    }

    /// Drop the local record. Only called after the remote authority
    /// acknowledged the final submission.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be deleted.
    pub async fn discard(&self, key: &ExamKey) -> Result<(), StorageError> {
        self.store.delete(key).await
    }
}
