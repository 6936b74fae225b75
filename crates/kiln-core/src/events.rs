//! Orchestration events appended to the JSONL event log.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::SessionStep;
use crate::types::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionCreated,
    StepChanged {
        from: SessionStep,
        to: SessionStep,
    },
    RepoVerified {
        path: PathBuf,
    },
    WorktreeProvisioned {
        path: PathBuf,
        reused: bool,
    },
    PlanParsed {
        steps: usize,
        questions: usize,
        fallback: bool,
    },
    QuestionsAnswered {
        count: usize,
    },
    PlanApproved,
    PlanRejected {
        feedback: String,
    },
    HandedOff {
        path: PathBuf,
    },
    ImplementationCompleted {
        success: bool,
    },
    DiffSnapshotSaved {
        path: PathBuf,
        diff_len: usize,
    },
    SessionStopped,
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub session_id: Option<SessionId>,
    pub worktree_path: Option<PathBuf>,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn now(id: EventId, session_id: Option<SessionId>, kind: EventKind) -> Self {
        Self {
            id,
            session_id,
            worktree_path: None,
            at: Utc::now(),
            kind,
        }
    }

    pub fn with_worktree(mut self, path: impl Into<PathBuf>) -> Self {
        self.worktree_path = Some(path.into());
        self
    }
}
