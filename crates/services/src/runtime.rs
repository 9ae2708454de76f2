//! Runtime for one exam part: drives the lifecycle state machine and
//! coordinates the countdown, the local store and the remote authority.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use exam_core::countdown::{Countdown, TickOutcome, format_clock};
use exam_core::lifecycle::{PartEvent, PartState, SubmitTrigger, TransitionError, transition};
use exam_core::model::{
    Answer, ExamId, ExamKey, ExamOrderEntry, ExamSessionRecord, QuestionId, QuestionPayload,
    RemoteSession, ScheduleId, SessionSnapshot, whole_seconds,
};
use exam_storage::repository::SessionStore;
use tokio::task::JoinHandle;

use crate::Clock;
use crate::checkpoint::CheckpointScheduler;
use crate::error::{RemoteError, RuntimeError};
use crate::remote::RemoteAuthority;
use crate::tracker::ElapsedTimeTracker;
use crate::view::PartView;

/// Identity of the part being taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartContext {
    pub key: ExamKey,
    pub name: String,
    pub exam_id: ExamId,
    /// Without a schedule the part can be answered locally but nothing is
    /// resumed from, checkpointed to, or submitted to the remote authority.
    pub schedule_id: Option<ScheduleId>,
}

impl PartContext {
    #[must_use]
    pub fn for_entry(entry: &ExamOrderEntry, schedule_id: Option<ScheduleId>) -> Self {
        Self {
            key: entry.key.clone(),
            name: entry.name.clone(),
            exam_id: entry.exam_id,
            schedule_id,
        }
    }
}

enum Prepared {
    Gated(DateTime<Utc>),
    Ready,
    PendingSubmit(SubmitTrigger),
    AlreadySubmitted,
}

enum Step {
    Load,
    Begin,
    Countdown,
    Wait,
}

pub struct PartRuntime {
    ctx: PartContext,
    clock: Clock,
    tracker: ElapsedTimeTracker,
    remote: Arc<dyn RemoteAuthority>,
    checkpoints: CheckpointScheduler,
    in_flight: Option<JoinHandle<bool>>,
    state: PartState,
    payload: Option<QuestionPayload>,
    remote_deadline: Option<DateTime<Utc>>,
    answers: BTreeMap<QuestionId, Answer>,
    countdown: Option<Countdown>,
    current: usize,
    torn_down: bool,
}

impl PartRuntime {
    #[must_use]
    pub fn new(
        ctx: PartContext,
        clock: Clock,
        store: Arc<dyn SessionStore>,
        remote: Arc<dyn RemoteAuthority>,
        checkpoint_every_secs: u64,
    ) -> Self {
        Self {
            ctx,
            clock,
            tracker: ElapsedTimeTracker::new(store),
            remote,
            checkpoints: CheckpointScheduler::new(checkpoint_every_secs),
            in_flight: None,
            state: PartState::Initializing,
            payload: None,
            remote_deadline: None,
            answers: BTreeMap::new(),
            countdown: None,
            current: 0,
            torn_down: false,
        }
    }

    #[must_use]
    pub fn context(&self) -> &PartContext {
        &self.ctx
    }

    #[must_use]
    pub fn state(&self) -> &PartState {
        &self.state
    }

    #[must_use]
    pub fn payload(&self) -> Option<&QuestionPayload> {
        self.payload.as_ref()
    }

    #[must_use]
    pub fn answers(&self) -> &BTreeMap<QuestionId, Answer> {
        &self.answers
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> Option<u64> {
        self.countdown.as_ref().map(Countdown::remaining_seconds)
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    fn apply(&mut self, event: PartEvent) -> Result<(), TransitionError> {
        let next = transition(&self.state, event)?;
        tracing::info!(
            part = %self.ctx.key,
            from = self.state.name(),
            to = next.name(),
            "part transition"
        );
        self.state = next;
        Ok(())
    }

    fn question_id_at(&self, index: usize) -> Result<QuestionId, RuntimeError> {
        self.payload
            .as_ref()
            .and_then(|p| p.questions.get(index))
            .map(|q| q.id)
            .ok_or(RuntimeError::NoSuchQuestion(index))
    }

    fn ensure_in_progress(&self) -> Result<(), RuntimeError> {
        if self.torn_down || !self.state.is_timed() {
            return Err(RuntimeError::NotInProgress {
                state: self.state.name(),
            });
        }
        Ok(())
    }

    //
    // ─── LOADING ──────────────────────────────────────────────────────────────
    //

    /// Fetch the payload and remote session, then land in `AnswerableLoaded`,
    /// `NotAccessible` or `LoadFailed`.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Transition` if the part is not in a loadable
    /// state. Fetch failures are not errors; they move the part to
    /// `LoadFailed` with a backoff.
    pub async fn load(&mut self) -> Result<(), RuntimeError> {
        self.apply(PartEvent::Load)?;
        match self.prepare().await {
            Ok(Prepared::Ready) => self.apply(PartEvent::Loaded)?,
            Ok(Prepared::PendingSubmit(trigger)) => {
                tracing::warn!(part = %self.ctx.key, ?trigger, "unacknowledged submission found");
                self.apply(PartEvent::SubmitPending { trigger })?;
            }
            Ok(Prepared::AlreadySubmitted) => {
                tracing::info!(part = %self.ctx.key, "part was already accepted");
                self.apply(PartEvent::AlreadySubmitted)?;
                self.release_record().await;
            }
            Ok(Prepared::Gated(start_time)) => {
                tracing::info!(part = %self.ctx.key, %start_time, "part not accessible yet");
                self.apply(PartEvent::Gated { start_time })?;
            }
            Err(err) => {
                tracing::warn!(part = %self.ctx.key, error = %err, "loading part failed");
                let now = self.clock.now();
                self.apply(PartEvent::PayloadFailed {
                    reason: err.to_string(),
                    now,
                })?;
            }
        }
        Ok(())
    }

    async fn fetch(&self) -> Result<(QuestionPayload, Option<RemoteSession>), RemoteError> {
        let payload = self
            .remote
            .fetch_payload(&self.ctx.key, self.ctx.exam_id)
            .await?;
        payload.validate()?;
        let session = match self.ctx.schedule_id {
            Some(schedule_id) => {
                self.remote
                    .active_session(schedule_id, self.ctx.exam_id)
                    .await?
            }
            None => None,
        };
        Ok((payload, session))
    }

    async fn prepare(&mut self) -> Result<Prepared, RuntimeError> {
        let (payload, session) = self.fetch().await?;
        let now = self.clock.now();

        // A started submission outranks the gate and the remote session: the
        // local record is what was sent.
        if let Some(record) = self.tracker.record(&self.ctx.key).await? {
            if record.is_acknowledged() {
                self.payload = Some(payload);
                return Ok(Prepared::AlreadySubmitted);
            }
            if let Some(pending) = record.pending_submit() {
                self.adopt(payload, Some(&record));
                return Ok(Prepared::PendingSubmit(pending.trigger));
            }
        }

        if let Some(session) = &session {
            if !session.is_accessible(now) {
                self.payload = Some(payload);
                return Ok(Prepared::Gated(session.start_time));
            }
            self.resume_from(session, &payload, now).await?;
        }

        let record = self.tracker.record(&self.ctx.key).await?;
        self.adopt(payload, record.as_ref());
        Ok(Prepared::Ready)
    }

    fn adopt(&mut self, payload: QuestionPayload, record: Option<&ExamSessionRecord>) {
        self.answers = record.map(|r| r.answers().clone()).unwrap_or_default();
        self.current = record
            .and_then(ExamSessionRecord::last_question_visit)
            .and_then(|visit| payload.questions.iter().position(|q| q.id == visit.question_id))
            .unwrap_or(0);
        self.payload = Some(payload);
    }

    async fn resume_from(
        &mut self,
        session: &RemoteSession,
        payload: &QuestionPayload,
        now: DateTime<Utc>,
    ) -> Result<(), RuntimeError> {
        self.remote_deadline = Some(session.end_time);
        let (answers, rejected) = session.resolve_answers(payload);
        for (question_id, err) in rejected {
            let reason = err.map_or_else(|| "unknown question".to_string(), |e| e.to_string());
            tracing::warn!(
                part = %self.ctx.key,
                question = %question_id,
                error = %reason,
                "dropping remote answer"
            );
        }
        let has_remote_data = !answers.is_empty() || !session.question_elapsed_times.is_empty();
        if has_remote_data || self.tracker.record(&self.ctx.key).await?.is_some() {
            self.tracker
                .merge_remote(
                    &self.ctx.key,
                    answers,
                    &session.question_elapsed_times,
                    now,
                )
                .await?;
            tracing::info!(part = %self.ctx.key, "resumed from remote session");
        }
        Ok(())
    }

    /// Re-attempt a failed load without waiting for the backoff.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Transition` unless the part is in `LoadFailed`.
    pub async fn retry_load(&mut self) -> Result<(), RuntimeError> {
        if !matches!(self.state, PartState::LoadFailed { .. }) {
            return Err(stale(&self.state, "retry_load"));
        }
        self.load().await
    }

    /// Manually re-check the accessibility gate.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Transition` unless the part is `NotAccessible`.
    pub async fn recheck(&mut self) -> Result<(), RuntimeError> {
        if !matches!(self.state, PartState::NotAccessible { .. }) {
            return Err(stale(&self.state, "recheck"));
        }
        self.load().await
    }

    //
    // ─── ANSWERING ────────────────────────────────────────────────────────────
    //

    /// Start answering: opens the current question and starts the countdown.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError` if the part is not loaded or the store fails.
    pub async fn begin(&mut self) -> Result<(), RuntimeError> {
        let question_id = self.question_id_at(self.current)?;
        let now = self.clock.now();
        let started_at = self
            .tracker
            .record(&self.ctx.key)
            .await?
            .map_or(now, |r| r.start_time());
        let allotted = self
            .payload
            .as_ref()
            .map_or_else(Duration::zero, QuestionPayload::allotted);
        let deadline = self.remote_deadline.unwrap_or(started_at + allotted);

        self.apply(PartEvent::Begin)?;
        self.countdown = Some(Countdown::until(deadline, now));
        self.checkpoints.reset();
        self.tracker.visit(&self.ctx.key, question_id, now).await?;
        Ok(())
    }

    /// Navigate to the question at `index`.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::NotInProgress`, `RuntimeError::NoSuchQuestion`,
    /// or a storage error.
    pub async fn go_to(&mut self, index: usize) -> Result<(), RuntimeError> {
        self.ensure_in_progress()?;
        let question_id = self.question_id_at(index)?;
        self.tracker
            .visit(&self.ctx.key, question_id, self.clock.now())
            .await?;
        self.current = index;
        Ok(())
    }

    /// # Errors
    ///
    /// See [`PartRuntime::go_to`].
    pub async fn next(&mut self) -> Result<(), RuntimeError> {
        self.go_to(self.current + 1).await
    }

    /// # Errors
    ///
    /// See [`PartRuntime::go_to`].
    pub async fn previous(&mut self) -> Result<(), RuntimeError> {
        let index = self
            .current
            .checked_sub(1)
            .ok_or(RuntimeError::NoSuchQuestion(0))?;
        self.go_to(index).await
    }

    /// Store (`Some`) or clear (`None`) the answer to `question_id`.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Answer` when the answer does not fit the
    /// question, plus the errors of [`PartRuntime::go_to`].
    pub async fn record_answer(
        &mut self,
        question_id: QuestionId,
        answer: Option<Answer>,
    ) -> Result<(), RuntimeError> {
        self.ensure_in_progress()?;
        let question = self
            .payload
            .as_ref()
            .and_then(|p| p.question(question_id))
            .ok_or(RuntimeError::UnknownQuestion(question_id))?;
        if let Some(answer) = &answer {
            answer.check(question.kind, question.statements.len())?;
        }
        let record = self
            .tracker
            .set_answer(&self.ctx.key, question_id, answer, self.clock.now())
            .await?;
        self.answers = record.answers().clone();
        Ok(())
    }

    //
    // ─── TIMERS ───────────────────────────────────────────────────────────────
    //

    /// One scheduler tick. Drives automatic load retries, the gate re-check,
    /// the countdown, checkpoints and forced submission on expiry.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError` only for local failures (store, invalid
    /// payload index); remote failures are absorbed into the state.
    pub async fn tick(&mut self) -> Result<(), RuntimeError> {
        if self.torn_down {
            return Ok(());
        }
        let now = self.clock.now();
        let step = match &self.state {
            PartState::Initializing => Step::Load,
            PartState::LoadFailed { retry_at, .. } if now >= *retry_at => Step::Load,
            PartState::NotAccessible { start_time } if now >= *start_time => Step::Load,
            PartState::AnswerableLoaded => Step::Begin,
            PartState::InProgress => Step::Countdown,
            _ => Step::Wait,
        };
        match step {
            Step::Load => self.load().await,
            Step::Begin => self.begin().await,
            Step::Countdown => self.tick_countdown(now).await,
            Step::Wait => Ok(()),
        }
    }

    async fn tick_countdown(&mut self, now: DateTime<Utc>) -> Result<(), RuntimeError> {
        let Some(countdown) = self.countdown.as_mut() else {
            return Ok(());
        };
        let before = countdown.remaining_seconds();
        match countdown.tick(now) {
            TickOutcome::Expired => {
                tracing::info!(part = %self.ctx.key, "time expired; submitting");
                self.submit_with(SubmitTrigger::TimeExpired).await
            }
            TickOutcome::Advanced { remaining } => {
                if self.checkpoints.on_countdown_advance(before - remaining) {
                    self.spawn_checkpoint().await;
                }
                Ok(())
            }
            TickOutcome::Idle => Ok(()),
        }
    }

    /// Push a checkpoint in the background so a slow remote never holds up
    /// the countdown. At most one push is in flight.
    async fn spawn_checkpoint(&mut self) {
        if self.in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::debug!(part = %self.ctx.key, "previous checkpoint still in flight; skipped");
            return;
        }
        let Some(snapshot) = self.checkpoint_snapshot().await else {
            return;
        };
        let remote = Arc::clone(&self.remote);
        self.in_flight = Some(tokio::spawn(async move {
            CheckpointScheduler::push(remote.as_ref(), &snapshot).await
        }));
    }

    /// Wait for the background checkpoint, if any. `None` when nothing was
    /// in flight.
    pub async fn wait_for_checkpoint(&mut self) -> Option<bool> {
        let handle = self.in_flight.take()?;
        match handle.await {
            Ok(accepted) => Some(accepted),
            Err(err) => {
                tracing::warn!(part = %self.ctx.key, error = %err, "checkpoint task failed");
                Some(false)
            }
        }
    }

    /// Answers and the live elapsed-time snapshot, or `None` when no
    /// checkpoint should go out.
    async fn checkpoint_snapshot(&self) -> Option<SessionSnapshot> {
        if self.torn_down || !self.state.is_timed() {
            return None;
        }
        let Some(schedule_id) = self.ctx.schedule_id else {
            tracing::debug!(part = %self.ctx.key, "no schedule; checkpoint skipped");
            return None;
        };
        let elapsed = match self.tracker.snapshot(&self.ctx.key, self.clock.now()).await {
            Ok(Some((_, elapsed))) => elapsed,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(part = %self.ctx.key, error = %err, "checkpoint snapshot failed");
                return None;
            }
        };
        Some(SessionSnapshot::new(
            schedule_id,
            self.ctx.exam_id,
            &self.answers,
            elapsed,
        ))
    }

    //
    // ─── SUBMISSION ───────────────────────────────────────────────────────────
    //

    /// Submit after the candidate confirmed.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Transition` if the part is not in progress.
    /// A failed delivery is not an error; the part moves to `SubmitFailed`.
    pub async fn submit(&mut self) -> Result<(), RuntimeError> {
        self.submit_with(SubmitTrigger::Confirmed).await
    }

    async fn submit_with(&mut self, trigger: SubmitTrigger) -> Result<(), RuntimeError> {
        self.apply(PartEvent::Submit(trigger))?;
        // A checkpoint must not land after the final submission.
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
        self.send_final(trigger).await
    }

    /// Re-send the final submission after `SubmitFailed`.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Transition` unless the part is in `SubmitFailed`.
    pub async fn retry_submit(&mut self) -> Result<(), RuntimeError> {
        let PartState::SubmitFailed { trigger, .. } = self.state else {
            return Err(stale(&self.state, "retry_submit"));
        };
        self.apply(PartEvent::RetrySubmit)?;
        self.send_final(trigger).await
    }

    async fn send_final(&mut self, trigger: SubmitTrigger) -> Result<(), RuntimeError> {
        match self.deliver(trigger).await {
            Ok(()) => {
                self.apply(PartEvent::Acknowledged)?;
                self.release_record().await;
            }
            Err(err) => {
                tracing::warn!(part = %self.ctx.key, error = %err, "final submission failed");
                self.apply(PartEvent::Rejected {
                    reason: err.to_string(),
                })?;
            }
        }
        Ok(())
    }

    async fn deliver(&self, trigger: SubmitTrigger) -> Result<(), RuntimeError> {
        let record = self
            .tracker
            .finalize_for_submit(&self.ctx.key, trigger, self.clock.now())
            .await?;
        let schedule_id = self.ctx.schedule_id.ok_or(RemoteError::MissingSchedule)?;
        let snapshot = SessionSnapshot::new(
            schedule_id,
            self.ctx.exam_id,
            record.answers(),
            record.question_elapsed_times().clone(),
        );
        self.remote.submit_final(&snapshot).await?;
        Ok(())
    }

    /// Drop the local record once the remote authority has the part. If the
    /// delete fails the record is marked acknowledged so a later mount skips
    /// past it.
    async fn release_record(&self) {
        let Err(err) = self.tracker.discard(&self.ctx.key).await else {
            return;
        };
        tracing::warn!(part = %self.ctx.key, error = %err, "could not drop local record");
        if let Err(err) = self.tracker.acknowledge(&self.ctx.key, self.clock.now()).await {
            tracing::error!(part = %self.ctx.key, error = %err, "could not mark record acknowledged");
        }
    }

    //
    // ─── TEARDOWN & VIEW ──────────────────────────────────────────────────────
    //

    /// Stop reacting to ticks and fold the trailing visit interval.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Err(err) = self.tracker.finalize(&self.ctx.key, self.clock.now()).await {
            tracing::warn!(part = %self.ctx.key, error = %err, "finalize on teardown failed");
        }
        tracing::debug!(part = %self.ctx.key, state = self.state.name(), "part torn down");
    }

    #[must_use]
    pub fn view(&self) -> PartView {
        let now = self.clock.now();
        let answered = self
            .payload
            .as_ref()
            .map(|p| {
                p.questions
                    .iter()
                    .map(|q| self.answers.get(&q.id).is_some_and(Answer::is_answered))
                    .collect()
            })
            .unwrap_or_default();
        let opens_in = match &self.state {
            PartState::NotAccessible { start_time } => {
                Some(format_clock(whole_seconds(now, *start_time)))
            }
            _ => None,
        };
        let last_error = match &self.state {
            PartState::LoadFailed { reason, .. } | PartState::SubmitFailed { reason, .. } => {
                Some(reason.clone())
            }
            _ => None,
        };
        let (can_submit, can_retry_submit, can_retry_load) = PartView::flags_for(&self.state);

        PartView {
            state: self.state.name(),
            part_name: self.ctx.name.clone(),
            current_index: self.current,
            question_count: self.payload.as_ref().map_or(0, |p| p.questions.len()),
            answered,
            remaining: self.countdown.as_ref().map(Countdown::display),
            opens_in,
            can_submit: can_submit && !self.torn_down,
            can_retry_submit,
            can_retry_load,
            last_error,
        }
    }
}

fn stale(state: &PartState, event: &'static str) -> RuntimeError {
    RuntimeError::Transition(TransitionError::Stale {
        state: state.name(),
        event,
    })
}
