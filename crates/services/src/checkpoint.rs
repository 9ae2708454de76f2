use exam_core::model::SessionSnapshot;

use crate::remote::RemoteAuthority;

/// Decides when a checkpoint is due, counted in countdown seconds.
///
/// Only the countdown feeds it, so it stops on its own once the part leaves
/// `InProgress`.
#[derive(Debug, Clone)]
pub struct CheckpointScheduler {
    every_secs: u64,
    accumulated: u64,
}

impl CheckpointScheduler {
    #[must_use]
    pub fn new(every_secs: u64) -> Self {
        Self {
            every_secs: every_secs.max(1),
            accumulated: 0,
        }
    }

    /// Account `seconds` of countdown progress; true when a checkpoint is due.
    pub fn on_countdown_advance(&mut self, seconds: u64) -> bool {
        self.accumulated = self.accumulated.saturating_add(seconds);
        if self.accumulated >= self.every_secs {
            self.accumulated %= self.every_secs;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.accumulated = 0;
    }

    /// Push `snapshot`, logging and swallowing any failure.
    pub async fn push(remote: &dyn RemoteAuthority, snapshot: &SessionSnapshot) -> bool {
        match remote.save_checkpoint(snapshot).await {
            Ok(()) => {
                tracing::debug!(
                    schedule_id = %snapshot.schedule_id,
                    exam_id = %snapshot.exam_id,
                    answers = snapshot.answers.len(),
                    "checkpoint saved"
                );
                true
            }
            Err(err) => {
                tracing::warn!(
                    schedule_id = %snapshot.schedule_id,
                    exam_id = %snapshot.exam_id,
                    error = %err,
                    "checkpoint failed; will retry next cycle"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_every_n_countdown_seconds() {
        let mut scheduler = CheckpointScheduler::new(5);
        let fired: Vec<bool> = (0..10).map(|_| scheduler.on_countdown_advance(1)).collect();
        assert_eq!(fired.iter().filter(|f| **f).count(), 2);
        assert!(fired[4]);
        assert!(fired[9]);
    }

    #[test]
    fn large_jumps_fire_once_and_keep_remainder() {
        let mut scheduler = CheckpointScheduler::new(5);
        assert!(scheduler.on_countdown_advance(12));
        assert!(!scheduler.on_countdown_advance(2));
        assert!(scheduler.on_countdown_advance(1));
    }
}
