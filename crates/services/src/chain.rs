use std::collections::HashSet;
use std::sync::Arc;

use exam_core::model::{ExamChain, ExamKey, ExamOrderEntry, QuizId, ScheduleId, TopicId};
use exam_storage::repository::SessionStore;
use tokio::task::JoinHandle;

use crate::error::RuntimeError;
use crate::remote::RemoteAuthority;
use crate::runtime::PartContext;

/// Course the chain belongs to, if any; completion is reported once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourseLink {
    pub topic_id: TopicId,
    pub quiz_id: QuizId,
}

/// What happens after a part completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStep {
    Next(ExamOrderEntry),
    Finished,
}

/// Walks an ordered chain of parts, carrying schedule identity forward.
pub struct ChainNavigator {
    chain: ExamChain,
    schedule_id: Option<ScheduleId>,
    course: Option<CourseLink>,
    current: ExamKey,
    finished: bool,
    remote: Arc<dyn RemoteAuthority>,
    follow_ups: Vec<JoinHandle<()>>,
}

impl ChainNavigator {
    /// Pick the starting part.
    ///
    /// With an explicit part, start there. Without one, resume at the latest
    /// part (scanning from the end) that still has a local record, falling
    /// back to the first part. Records left behind by parts the remote
    /// authority already accepted move the resume point past them and are
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Chain` for an unknown explicit part and
    /// `RuntimeError::Storage` if the store cannot be queried.
    pub async fn mount(
        chain: ExamChain,
        explicit: Option<ExamKey>,
        schedule_id: Option<ScheduleId>,
        course: Option<CourseLink>,
        store: &dyn SessionStore,
        remote: Arc<dyn RemoteAuthority>,
    ) -> Result<Self, RuntimeError> {
        let current = match explicit {
            Some(key) => chain.get(&key)?.key.clone(),
            None => {
                let mut in_progress = HashSet::new();
                let mut accepted = HashSet::new();
                for part in chain.parts() {
                    match store.get(&part.key).await? {
                        Some(record) if record.is_acknowledged() => {
                            accepted.insert(part.key.clone());
                        }
                        Some(_) => {
                            in_progress.insert(part.key.clone());
                        }
                        None => {}
                    }
                }
                let current = match chain.resume_point(&in_progress, &accepted) {
                    Some(entry) => {
                        tracing::info!(part = %entry.key, "resuming interrupted chain");
                        entry.key.clone()
                    }
                    None => chain.first().key.clone(),
                };
                for key in accepted.iter().filter(|key| **key != current) {
                    if let Err(err) = store.delete(key).await {
                        tracing::warn!(part = %key, error = %err, "could not drop accepted record");
                    }
                }
                current
            }
        };

        Ok(Self {
            chain,
            schedule_id,
            course,
            current,
            finished: false,
            remote,
            follow_ups: Vec::new(),
        })
    }

    #[must_use]
    pub fn chain(&self) -> &ExamChain {
        &self.chain
    }

    #[must_use]
    pub fn current_key(&self) -> &ExamKey {
        &self.current
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// # Errors
    ///
    /// Returns `RuntimeError::Chain` if the current key left the chain.
    pub fn current_context(&self) -> Result<PartContext, RuntimeError> {
        let entry = self.chain.get(&self.current)?;
        Ok(PartContext::for_entry(entry, self.schedule_id))
    }

    /// Advance after the current part completed.
    ///
    /// After the last part, starts the scoring trigger and the course
    /// completion in the background (both best-effort, both once) and calls
    /// `return_to_origin` without waiting for them.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Chain` if the current key left the chain.
    pub async fn on_part_complete(
        &mut self,
        return_to_origin: impl FnOnce(),
    ) -> Result<ChainStep, RuntimeError> {
        if self.finished {
            return Ok(ChainStep::Finished);
        }
        if let Some(next) = self.chain.next_after(&self.current)? {
            tracing::info!(from = %self.current, to = %next.key, "advancing to next part");
            self.current = next.key.clone();
            return Ok(ChainStep::Next(next.clone()));
        }

        self.finished = true;
        if let Some(schedule_id) = self.schedule_id {
            let remote = Arc::clone(&self.remote);
            self.follow_ups.push(tokio::spawn(async move {
                match remote.trigger_scoring(schedule_id).await {
                    Ok(()) => tracing::info!(%schedule_id, "scoring requested"),
                    Err(err) => tracing::warn!(%schedule_id, error = %err, "scoring trigger failed"),
                }
            }));
        }
        if let Some(course) = self.course {
            let remote = Arc::clone(&self.remote);
            self.follow_ups.push(tokio::spawn(async move {
                if let Err(err) = remote.complete_course(course.topic_id, course.quiz_id).await {
                    tracing::warn!(
                        topic_id = %course.topic_id,
                        quiz_id = %course.quiz_id,
                        error = %err,
                        "course completion failed"
                    );
                }
            }));
        }
        return_to_origin();
        Ok(ChainStep::Finished)
    }

    /// Wait for the background scoring and course-completion requests.
    pub async fn settle(&mut self) {
        for handle in self.follow_ups.drain(..) {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "follow-up request task failed");
            }
        }
    }
}
