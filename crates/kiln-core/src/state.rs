//! Session and worktree state machines.

use serde::{Deserialize, Serialize};

/// Planning-phase steps for one session.
///
/// The flow is linear with one feedback loop:
/// ```text
/// RepoSelect → RepoVerify → WorktreeSetup → Analyze → Planning → PlanReview → Complete
///                                                          ↑            |
///                                                          └── rejected ┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStep {
    RepoSelect,
    RepoVerify,
    WorktreeSetup,
    Analyze,
    Planning,
    PlanReview,
    Complete,
}

impl SessionStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStep::Complete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStep::RepoSelect => "REPO_SELECT",
            SessionStep::RepoVerify => "REPO_VERIFY",
            SessionStep::WorktreeSetup => "WORKTREE_SETUP",
            SessionStep::Analyze => "ANALYZE",
            SessionStep::Planning => "PLANNING",
            SessionStep::PlanReview => "PLAN_REVIEW",
            SessionStep::Complete => "COMPLETE",
        }
    }
}

impl std::fmt::Display for SessionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check if a session step transition is valid.
///
/// Besides the forward flow, rejection loops PlanReview back to Planning,
/// and any non-terminal step may fall back to RepoSelect after a
/// provisioning failure so the user can retry with another repository.
pub fn step_transition_allowed(from: SessionStep, to: SessionStep) -> bool {
    use SessionStep::*;

    if from == to {
        return true;
    }

    match (from, to) {
        (RepoSelect, RepoVerify) => true,
        (RepoVerify, WorktreeSetup) => true,
        (WorktreeSetup, Analyze) => true,
        (Analyze, Planning) => true,
        (Planning, PlanReview) => true,
        (PlanReview, Complete) => true,
        // Plan rejected: regenerate with feedback.
        (PlanReview, Planning) => true,
        // Recoverable provisioning/verification failure.
        (from, RepoSelect) if !from.is_terminal() => true,
        _ => false,
    }
}

/// Execution-phase status for one worktree session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    #[default]
    Idle,
    Planning,
    Running,
    Success,
    Error,
    Stopped,
}

impl WorktreeStatus {
    /// Terminal statuses accept no further transitions or output.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorktreeStatus::Success | WorktreeStatus::Error | WorktreeStatus::Stopped
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, WorktreeStatus::Planning | WorktreeStatus::Running)
    }

    /// Only a running session accepts implementation output chunks.
    pub fn accepts_output(&self) -> bool {
        matches!(self, WorktreeStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorktreeStatus::Idle => "idle",
            WorktreeStatus::Planning => "planning",
            WorktreeStatus::Running => "running",
            WorktreeStatus::Success => "success",
            WorktreeStatus::Error => "error",
            WorktreeStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for WorktreeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_flow_transitions_are_allowed() {
        use SessionStep::*;
        let flow = [
            RepoSelect,
            RepoVerify,
            WorktreeSetup,
            Analyze,
            Planning,
            PlanReview,
            Complete,
        ];
        for pair in flow.windows(2) {
            assert!(
                step_transition_allowed(pair[0], pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn rejection_loops_back_to_planning() {
        assert!(step_transition_allowed(
            SessionStep::PlanReview,
            SessionStep::Planning
        ));
    }

    #[test]
    fn provisioning_failure_falls_back_to_repo_select() {
        assert!(step_transition_allowed(
            SessionStep::WorktreeSetup,
            SessionStep::RepoSelect
        ));
        assert!(step_transition_allowed(
            SessionStep::RepoVerify,
            SessionStep::RepoSelect
        ));
        assert!(!step_transition_allowed(
            SessionStep::Complete,
            SessionStep::RepoSelect
        ));
    }

    #[test]
    fn skipping_steps_is_rejected() {
        assert!(!step_transition_allowed(
            SessionStep::RepoSelect,
            SessionStep::Planning
        ));
        assert!(!step_transition_allowed(
            SessionStep::Analyze,
            SessionStep::Complete
        ));
    }

    #[test]
    fn self_transition_is_allowed() {
        assert!(step_transition_allowed(
            SessionStep::PlanReview,
            SessionStep::PlanReview
        ));
    }

    #[test]
    fn session_step_serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&SessionStep::PlanReview).expect("serialize step");
        assert_eq!(json, "\"PLAN_REVIEW\"");

        let step: SessionStep = serde_json::from_str("\"WORKTREE_SETUP\"").expect("deserialize");
        assert_eq!(step, SessionStep::WorktreeSetup);
    }

    #[test]
    fn worktree_status_terminal_and_active_checks() {
        assert!(WorktreeStatus::Success.is_terminal());
        assert!(WorktreeStatus::Error.is_terminal());
        assert!(WorktreeStatus::Stopped.is_terminal());
        assert!(!WorktreeStatus::Running.is_terminal());

        assert!(WorktreeStatus::Running.is_active());
        assert!(WorktreeStatus::Planning.is_active());
        assert!(!WorktreeStatus::Idle.is_active());
    }

    #[test]
    fn only_running_accepts_output() {
        assert!(WorktreeStatus::Running.accepts_output());
        for status in [
            WorktreeStatus::Idle,
            WorktreeStatus::Planning,
            WorktreeStatus::Success,
            WorktreeStatus::Error,
            WorktreeStatus::Stopped,
        ] {
            assert!(!status.accepts_output(), "{status} must not accept output");
        }
    }

    #[test]
    fn worktree_status_serializes_as_snake_case() {
        let json = serde_json::to_string(&WorktreeStatus::Stopped).expect("serialize status");
        assert_eq!(json, "\"stopped\"");
    }
}
