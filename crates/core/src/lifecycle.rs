//! Pure transition function for one exam part.
//!
//! The runtime feeds events in and acts on the state that comes back; nothing
//! here touches timers, storage or the network.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransitionError {
    /// The event targets a state the part has already left (for example a
    /// late expiry callback after a manual submit).
    #[error("event {event} does not apply in state {state}")]
    Stale {
        state: &'static str,
        event: &'static str,
    },
}

//
// ─── STATES & EVENTS ──────────────────────────────────────────────────────────
//

/// Why a part is being submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitTrigger {
    /// The candidate confirmed the submit dialog.
    Confirmed,
    /// The countdown reached zero; no confirmation is asked for.
    TimeExpired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartState {
    Initializing,
    Loading {
        attempt: u32,
    },
    /// The payload could not be fetched or decoded; retried after `retry_at`.
    LoadFailed {
        attempt: u32,
        retry_at: DateTime<Utc>,
        reason: String,
    },
    NotAccessible {
        start_time: DateTime<Utc>,
    },
    AnswerableLoaded,
    InProgress,
    Submitting {
        trigger: SubmitTrigger,
    },
    SubmitFailed {
        trigger: SubmitTrigger,
        reason: String,
    },
    PartComplete,
}

impl PartState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PartState::Initializing => "initializing",
            PartState::Loading { .. } => "loading",
            PartState::LoadFailed { .. } => "load_failed",
            PartState::NotAccessible { .. } => "not_accessible",
            PartState::AnswerableLoaded => "answerable_loaded",
            PartState::InProgress => "in_progress",
            PartState::Submitting { .. } => "submitting",
            PartState::SubmitFailed { .. } => "submit_failed",
            PartState::PartComplete => "part_complete",
        }
    }

    /// Countdown and checkpoints only run while the candidate is answering.
    #[must_use]
    pub fn is_timed(&self) -> bool {
        matches!(self, PartState::InProgress)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, PartState::PartComplete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartEvent {
    /// Start (or restart) fetching the part.
    Load,
    PayloadFailed {
        reason: String,
        now: DateTime<Utc>,
    },
    Gated {
        start_time: DateTime<Utc>,
    },
    Loaded,
    Begin,
    Submit(SubmitTrigger),
    Acknowledged,
    Rejected {
        reason: String,
    },
    RetrySubmit,
    /// Loading found a submission that was started but never acknowledged.
    SubmitPending {
        trigger: SubmitTrigger,
    },
    /// Loading found a submission the remote authority already acknowledged.
    AlreadySubmitted,
}

impl PartEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PartEvent::Load => "load",
            PartEvent::PayloadFailed { .. } => "payload_failed",
            PartEvent::Gated { .. } => "gated",
            PartEvent::Loaded => "loaded",
            PartEvent::Begin => "begin",
            PartEvent::Submit(_) => "submit",
            PartEvent::Acknowledged => "acknowledged",
            PartEvent::Rejected { .. } => "rejected",
            PartEvent::RetrySubmit => "retry_submit",
            PartEvent::SubmitPending { .. } => "submit_pending",
            PartEvent::AlreadySubmitted => "already_submitted",
        }
    }
}

//
// ─── TRANSITIONS ──────────────────────────────────────────────────────────────
//

const BASE_RETRY_SECS: i64 = 1;
const MAX_RETRY_SECS: i64 = 30;

const PENDING_SUBMIT_REASON: &str = "submission from an earlier session was not acknowledged";

/// Backoff before load attempt `attempt + 1`: 1s, 2s, 4s, ... capped at 30s.
#[must_use]
pub fn load_retry_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::seconds((BASE_RETRY_SECS << exp).min(MAX_RETRY_SECS))
}

/// Compute the next state.
///
/// # Errors
///
/// Returns `TransitionError::Stale` when `event` is not valid in `state`; the
/// caller should ignore the event.
pub fn transition(state: &PartState, event: PartEvent) -> Result<PartState, TransitionError> {
    let next = match (state, &event) {
        (PartState::Initializing | PartState::NotAccessible { .. }, PartEvent::Load) => {
            PartState::Loading { attempt: 1 }
        }
        (PartState::LoadFailed { attempt, .. }, PartEvent::Load) => PartState::Loading {
            attempt: attempt.saturating_add(1),
        },
        (PartState::Loading { attempt }, PartEvent::PayloadFailed { reason, now }) => {
            PartState::LoadFailed {
                attempt: *attempt,
                retry_at: *now + load_retry_delay(*attempt),
                reason: reason.clone(),
            }
        }
        (PartState::Loading { .. }, PartEvent::Gated { start_time }) => PartState::NotAccessible {
            start_time: *start_time,
        },
        (PartState::Loading { .. }, PartEvent::Loaded) => PartState::AnswerableLoaded,
        (PartState::Loading { .. }, PartEvent::SubmitPending { trigger }) => {
            PartState::SubmitFailed {
                trigger: *trigger,
                reason: PENDING_SUBMIT_REASON.to_string(),
            }
        }
        (PartState::Loading { .. }, PartEvent::AlreadySubmitted) => PartState::PartComplete,
        (PartState::AnswerableLoaded, PartEvent::Begin) => PartState::InProgress,
        (PartState::InProgress, PartEvent::Submit(trigger)) => {
            PartState::Submitting { trigger: *trigger }
        }
        (PartState::Submitting { .. }, PartEvent::Acknowledged) => PartState::PartComplete,
        (PartState::Submitting { trigger }, PartEvent::Rejected { reason }) => {
            PartState::SubmitFailed {
                trigger: *trigger,
                reason: reason.clone(),
            }
        }
        (PartState::SubmitFailed { trigger, .. }, PartEvent::RetrySubmit) => {
            PartState::Submitting { trigger: *trigger }
        }
        _ => {
            return Err(TransitionError::Stale {
                state: state.name(),
                event: event.name(),
            });
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn run(events: Vec<PartEvent>) -> Result<PartState, TransitionError> {
        events
            .into_iter()
            .try_fold(PartState::Initializing, |state, event| transition(&state, event))
    }

    #[test]
    fn happy_path_reaches_part_complete() {
        let state = run(vec![
            PartEvent::Load,
            PartEvent::Loaded,
            PartEvent::Begin,
            PartEvent::Submit(SubmitTrigger::Confirmed),
            PartEvent::Acknowledged,
        ])
        .unwrap();
        assert_eq!(state, PartState::PartComplete);
    }

    #[test]
    fn rejected_submit_can_be_retried_with_same_trigger() {
        let state = run(vec![
            PartEvent::Load,
            PartEvent::Loaded,
            PartEvent::Begin,
            PartEvent::Submit(SubmitTrigger::TimeExpired),
            PartEvent::Rejected {
                reason: "offline".into(),
            },
            PartEvent::RetrySubmit,
        ])
        .unwrap();
        assert_eq!(
            state,
            PartState::Submitting {
                trigger: SubmitTrigger::TimeExpired
            }
        );
    }

    #[test]
    fn late_expiry_after_manual_submit_is_stale() {
        let submitting = PartState::Submitting {
            trigger: SubmitTrigger::Confirmed,
        };
        let err = transition(&submitting, PartEvent::Submit(SubmitTrigger::TimeExpired));
        assert_eq!(
            err,
            Err(TransitionError::Stale {
                state: "submitting",
                event: "submit"
            })
        );
        assert!(transition(&PartState::PartComplete, PartEvent::Submit(SubmitTrigger::TimeExpired)).is_err());
    }

    #[test]
    fn gate_returns_to_loading() {
        let start = fixed_now();
        let gated = run(vec![PartEvent::Load, PartEvent::Gated { start_time: start }]).unwrap();
        assert_eq!(gated, PartState::NotAccessible { start_time: start });
        assert_eq!(
            transition(&gated, PartEvent::Load).unwrap(),
            PartState::Loading { attempt: 1 }
        );
    }

    #[test]
    fn load_failures_back_off() {
        let now = fixed_now();
        let failed = run(vec![
            PartEvent::Load,
            PartEvent::PayloadFailed {
                reason: "bad".into(),
                now,
            },
            PartEvent::Load,
            PartEvent::PayloadFailed {
                reason: "bad".into(),
                now,
            },
        ])
        .unwrap();
        assert_eq!(
            failed,
            PartState::LoadFailed {
                attempt: 2,
                retry_at: now + Duration::seconds(2),
                reason: "bad".into()
            }
        );
        assert_eq!(load_retry_delay(1), Duration::seconds(1));
        assert_eq!(load_retry_delay(10), Duration::seconds(30));
    }

    #[test]
    fn reload_with_pending_submit_lands_in_submit_failed() {
        let state = run(vec![
            PartEvent::Load,
            PartEvent::SubmitPending {
                trigger: SubmitTrigger::TimeExpired,
            },
        ])
        .unwrap();
        assert!(matches!(
            state,
            PartState::SubmitFailed {
                trigger: SubmitTrigger::TimeExpired,
                ..
            }
        ));
        assert_eq!(
            transition(&state, PartEvent::RetrySubmit).unwrap(),
            PartState::Submitting {
                trigger: SubmitTrigger::TimeExpired
            }
        );
        assert!(transition(&state, PartEvent::Begin).is_err());
    }

    #[test]
    fn reload_of_acknowledged_part_completes_it() {
        let state = run(vec![PartEvent::Load, PartEvent::AlreadySubmitted]).unwrap();
        assert_eq!(state, PartState::PartComplete);
        assert!(transition(&PartState::InProgress, PartEvent::AlreadySubmitted).is_err());
    }

    #[test]
    fn only_in_progress_is_timed() {
        assert!(PartState::InProgress.is_timed());
        assert!(!PartState::SubmitFailed {
            trigger: SubmitTrigger::Confirmed,
            reason: String::new()
        }
        .is_timed());
    }
}
