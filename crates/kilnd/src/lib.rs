//! Kiln orchestration daemon: in-memory session stores, the plan/approve
//! protocol, atomic hand-off, and detached implementation runs.

pub mod detach;
pub mod event_log;
pub mod handoff;
pub mod service;
pub mod session;
pub mod worktree_session;
pub mod wrap;

pub use detach::{ChunkSink, CompletionSink, Detacher};
pub use event_log::{EventLogError, JsonlEventLog};
pub use handoff::{hand_off, HandoffError};
pub use service::{
    normalize_approval, ApprovalDecision, Orchestrator, PlanningOutcome, ServiceError,
};
pub use session::{Session, SessionError, SessionStore};
pub use worktree_session::{WorktreeSession, WorktreeSessionError, WorktreeSessionStore};
pub use wrap::wrap_text;
