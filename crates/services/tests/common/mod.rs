#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use exam_core::model::{
    ExamId, ExamKey, ExamOrderEntry, ExamSessionRecord, Question, QuestionId, QuestionKind,
    QuestionPayload, QuizId, RemoteSession, ScheduleId, SessionSnapshot, TopicId,
};
use exam_services::{RemoteAuthority, RemoteError};
use exam_storage::{InMemorySessionStore, SessionStore, StorageError};
use tokio::sync::Notify;

#[derive(Default)]
pub struct FakeState {
    pub payloads: HashMap<ExamKey, QuestionPayload>,
    pub sessions: HashMap<(ScheduleId, ExamId), RemoteSession>,
    /// Number of upcoming payload fetches that fail.
    pub payload_failures: u32,
    pub fail_submit: bool,
    pub fail_checkpoint: bool,
    /// Checkpoint pushes wait for `FakeRemote::release_checkpoint`.
    pub hold_checkpoints: bool,
    pub checkpoints: Vec<SessionSnapshot>,
    pub submissions: Vec<SessionSnapshot>,
    pub scoring: Vec<ScheduleId>,
    pub course_completions: Vec<(TopicId, QuizId)>,
}

/// In-process remote authority that records every call.
#[derive(Clone, Default)]
pub struct FakeRemote {
    pub state: Arc<Mutex<FakeState>>,
    release: Arc<Notify>,
}

impl FakeRemote {
    pub fn with_payload(self, key: &str, payload: QuestionPayload) -> Self {
        self.state
            .lock()
            .unwrap()
            .payloads
            .insert(ExamKey::new(key), payload);
        self
    }

    pub fn with_session(self, schedule: u64, exam: u64, session: RemoteSession) -> Self {
        self.state
            .lock()
            .unwrap()
            .sessions
            .insert((ScheduleId::new(schedule), ExamId::new(exam)), session);
        self
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.state.lock().unwrap().fail_submit = fail;
    }

    pub fn set_fail_checkpoint(&self, fail: bool) {
        self.state.lock().unwrap().fail_checkpoint = fail;
    }

    pub fn set_hold_checkpoints(&self, hold: bool) {
        self.state.lock().unwrap().hold_checkpoints = hold;
    }

    /// Let one held checkpoint push through.
    pub fn release_checkpoint(&self) {
        self.release.notify_one();
    }

    pub fn set_payload_failures(&self, count: u32) {
        self.state.lock().unwrap().payload_failures = count;
    }

    pub fn submissions(&self) -> Vec<SessionSnapshot> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn checkpoints(&self) -> Vec<SessionSnapshot> {
        self.state.lock().unwrap().checkpoints.clone()
    }

    pub fn scoring(&self) -> Vec<ScheduleId> {
        self.state.lock().unwrap().scoring.clone()
    }

    pub fn course_completions(&self) -> Vec<(TopicId, QuizId)> {
        self.state.lock().unwrap().course_completions.clone()
    }
}

#[async_trait]
impl RemoteAuthority for FakeRemote {
    async fn fetch_payload(
        &self,
        key: &ExamKey,
        _exam_id: ExamId,
    ) -> Result<QuestionPayload, RemoteError> {
        let mut state = self.state.lock().unwrap();
        if state.payload_failures > 0 {
            state.payload_failures -= 1;
            return Err(RemoteError::Unavailable("proxy reset".into()));
        }
        state
            .payloads
            .get(key)
            .cloned()
            .ok_or_else(|| RemoteError::Unavailable(format!("no payload for {key}")))
    }

    async fn active_session(
        &self,
        schedule_id: ScheduleId,
        exam_id: ExamId,
    ) -> Result<Option<RemoteSession>, RemoteError> {
        let state = self.state.lock().unwrap();
        Ok(state.sessions.get(&(schedule_id, exam_id)).cloned())
    }

    async fn save_checkpoint(&self, snapshot: &SessionSnapshot) -> Result<(), RemoteError> {
        let hold = self.state.lock().unwrap().hold_checkpoints;
        if hold {
            self.release.notified().await;
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_checkpoint {
            return Err(RemoteError::Unavailable("offline".into()));
        }
        state.checkpoints.push(snapshot.clone());
        Ok(())
    }

    async fn submit_final(&self, snapshot: &SessionSnapshot) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_submit {
            return Err(RemoteError::Unavailable("offline".into()));
        }
        state.submissions.push(snapshot.clone());
        Ok(())
    }

    async fn trigger_scoring(&self, schedule_id: ScheduleId) -> Result<(), RemoteError> {
        self.state.lock().unwrap().scoring.push(schedule_id);
        Ok(())
    }

    async fn complete_course(
        &self,
        topic_id: TopicId,
        quiz_id: QuizId,
    ) -> Result<(), RemoteError> {
        self.state
            .lock()
            .unwrap()
            .course_completions
            .push((topic_id, quiz_id));
        Ok(())
    }
}

/// Payload of `count` multiple-choice questions with ids `1..=count`.
pub fn payload(count: u64, duration_minutes: u32) -> QuestionPayload {
    QuestionPayload {
        duration: duration_minutes,
        questions: (1..=count)
            .map(|id| Question {
                id: QuestionId::new(id),
                level: None,
                kind: QuestionKind::MultipleChoice,
                prompt: format!("Question {id}"),
                options: None,
                correct: None,
                statements: Vec::new(),
            })
            .collect(),
    }
}

pub fn entry(key: &str, exam_id: u64) -> ExamOrderEntry {
    ExamOrderEntry {
        key: ExamKey::new(key),
        name: key.to_uppercase(),
        exam_id: ExamId::new(exam_id),
        exam_type: "section".into(),
    }
}

/// Store whose deletes can be switched to fail, to model a record that
/// outlives its acknowledged submission.
#[derive(Clone, Default)]
pub struct FlakyDeleteStore {
    pub inner: InMemorySessionStore,
    fail_delete: Arc<AtomicBool>,
}

impl FlakyDeleteStore {
    pub fn over(inner: &InMemorySessionStore) -> Self {
        Self {
            inner: inner.clone(),
            fail_delete: Arc::default(),
        }
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for FlakyDeleteStore {
    async fn get(&self, key: &ExamKey) -> Result<Option<ExamSessionRecord>, StorageError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &ExamKey, record: &ExamSessionRecord) -> Result<(), StorageError> {
        self.inner.put(key, record).await
    }

    async fn delete(&self, key: &ExamKey) -> Result<(), StorageError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("disk is read-only".into()));
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &ExamKey) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }
}
