use exam_core::lifecycle::PartState;

/// Snapshot of one part for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartView {
    pub state: &'static str,
    pub part_name: String,
    pub current_index: usize,
    pub question_count: usize,
    /// Answered flag per question, in payload order.
    pub answered: Vec<bool>,
    /// `HH:MM:SS` while a countdown is running.
    pub remaining: Option<String>,
    /// `HH:MM:SS` until the part opens, while gated.
    pub opens_in: Option<String>,
    pub can_submit: bool,
    pub can_retry_submit: bool,
    pub can_retry_load: bool,
    pub last_error: Option<String>,
}

impl PartView {
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answered.iter().filter(|a| **a).count()
    }

    pub(crate) fn flags_for(state: &PartState) -> (bool, bool, bool) {
        (
            matches!(state, PartState::InProgress),
            matches!(state, PartState::SubmitFailed { .. }),
            matches!(state, PartState::LoadFailed { .. }),
        )
    }
}
