use std::sync::Arc;

use exam_core::model::{Answer, ExamChain, ExamKey, QuestionId, ScheduleId};
use exam_storage::repository::SessionStore;

use crate::Clock;
use crate::chain::{ChainNavigator, ChainStep, CourseLink};
use crate::error::RuntimeError;
use crate::remote::RemoteAuthority;
use crate::runtime::PartRuntime;
use crate::view::PartView;

/// Callback run once when the last part of the chain is complete.
pub type ReturnToOrigin = Box<dyn FnOnce() + Send>;

/// Options for mounting an exam session.
pub struct SessionOptions {
    pub explicit_part: Option<ExamKey>,
    pub schedule_id: Option<ScheduleId>,
    pub course: Option<CourseLink>,
    pub checkpoint_every_secs: u64,
}

/// One mounted exam-taking view: a chain navigator plus the runtime of the
/// part currently being taken. All events go through `&mut self`, so they
/// are handled one at a time.
pub struct ExamSession {
    navigator: ChainNavigator,
    runtime: PartRuntime,
    clock: Clock,
    store: Arc<dyn SessionStore>,
    remote: Arc<dyn RemoteAuthority>,
    checkpoint_every_secs: u64,
    return_to_origin: Option<ReturnToOrigin>,
}

impl ExamSession {
    /// Mount the chain and prepare (but do not load) the starting part.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError` if the chain cannot be mounted.
    pub async fn mount(
        chain: ExamChain,
        options: SessionOptions,
        clock: Clock,
        store: Arc<dyn SessionStore>,
        remote: Arc<dyn RemoteAuthority>,
        return_to_origin: ReturnToOrigin,
    ) -> Result<Self, RuntimeError> {
        let navigator = ChainNavigator::mount(
            chain,
            options.explicit_part,
            options.schedule_id,
            options.course,
            store.as_ref(),
            Arc::clone(&remote),
        )
        .await?;
        let runtime = PartRuntime::new(
            navigator.current_context()?,
            clock.clone(),
            Arc::clone(&store),
            Arc::clone(&remote),
            options.checkpoint_every_secs,
        );
        Ok(Self {
            navigator,
            runtime,
            clock,
            store,
            remote,
            checkpoint_every_secs: options.checkpoint_every_secs,
            return_to_origin: Some(return_to_origin),
        })
    }

    #[must_use]
    pub fn runtime(&self) -> &PartRuntime {
        &self.runtime
    }

    #[must_use]
    pub fn current_key(&self) -> &ExamKey {
        self.navigator.current_key()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.navigator.is_finished()
    }

    #[must_use]
    pub fn view(&self) -> PartView {
        self.runtime.view()
    }

    /// # Errors
    ///
    /// Propagates local runtime and chain errors.
    pub async fn tick(&mut self) -> Result<(), RuntimeError> {
        if self.is_finished() {
            return Ok(());
        }
        self.runtime.tick().await?;
        self.advance_if_complete().await
    }

    /// # Errors
    ///
    /// See [`PartRuntime::go_to`].
    pub async fn go_to(&mut self, index: usize) -> Result<(), RuntimeError> {
        self.runtime.go_to(index).await
    }

    /// # Errors
    ///
    /// See [`PartRuntime::go_to`].
    pub async fn next(&mut self) -> Result<(), RuntimeError> {
        self.runtime.next().await
    }

    /// # Errors
    ///
    /// See [`PartRuntime::go_to`].
    pub async fn previous(&mut self) -> Result<(), RuntimeError> {
        self.runtime.previous().await
    }

    /// # Errors
    ///
    /// See [`PartRuntime::record_answer`].
    pub async fn record_answer(
        &mut self,
        question_id: QuestionId,
        answer: Option<Answer>,
    ) -> Result<(), RuntimeError> {
        self.runtime.record_answer(question_id, answer).await
    }

    /// Confirmed submit of the current part.
    ///
    /// # Errors
    ///
    /// See [`PartRuntime::submit`].
    pub async fn submit(&mut self) -> Result<(), RuntimeError> {
        self.runtime.submit().await?;
        self.advance_if_complete().await
    }

    /// # Errors
    ///
    /// See [`PartRuntime::retry_submit`].
    pub async fn retry_submit(&mut self) -> Result<(), RuntimeError> {
        self.runtime.retry_submit().await?;
        self.advance_if_complete().await
    }

    /// # Errors
    ///
    /// See [`PartRuntime::retry_load`].
    pub async fn retry_load(&mut self) -> Result<(), RuntimeError> {
        self.runtime.retry_load().await?;
        self.advance_if_complete().await
    }

    /// # Errors
    ///
    /// See [`PartRuntime::recheck`].
    pub async fn recheck(&mut self) -> Result<(), RuntimeError> {
        self.runtime.recheck().await?;
        self.advance_if_complete().await
    }

    /// Leave the session: cancel timers and fold the trailing interval.
    pub async fn teardown(&mut self) {
        self.runtime.teardown().await;
    }

    /// Wait for background requests: the last checkpoint push and the
    /// post-chain scoring and course completion.
    pub async fn settle(&mut self) {
        self.runtime.wait_for_checkpoint().await;
        self.navigator.settle().await;
    }

    async fn advance_if_complete(&mut self) -> Result<(), RuntimeError> {
        if !self.runtime.state().is_complete() {
            return Ok(());
        }
        self.runtime.teardown().await;
        let return_to_origin = &mut self.return_to_origin;
        let step = self
            .navigator
            .on_part_complete(move || {
                if let Some(navigate) = return_to_origin.take() {
                    navigate();
                }
            })
            .await?;
        if let ChainStep::Next(_) = step {
            // Fresh in-memory state for the next part; it loads on the next tick.
            self.runtime = PartRuntime::new(
                self.navigator.current_context()?,
                self.clock.clone(),
                Arc::clone(&self.store),
                Arc::clone(&self.remote),
                self.checkpoint_every_secs,
            );
        }
        Ok(())
    }
}
