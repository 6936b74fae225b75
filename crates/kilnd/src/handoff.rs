//! Atomic hand-off from a planning session to a worktree session.
//!
//! Ownership of a ticket moves in one direction: the worktree session is
//! registered as running first, and only then is the planning session
//! removed. A failure at any point leaves the session store untouched, so
//! the ticket is never owned by zero stores or by two.

use std::path::PathBuf;

use kiln_core::types::SessionId;

use crate::session::SessionStore;
use crate::worktree_session::{WorktreeSession, WorktreeSessionError, WorktreeSessionStore};

#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("session {id} not found")]
    UnknownSession { id: String },
    #[error("session {id} has no provisioned worktree")]
    WorktreeMissing { id: String },
    #[error("worktree at {path} already has an active session")]
    PathBusy { path: PathBuf },
}

/// Move `id` from the session store into the worktree session store.
/// Returns the worktree path now owning the work.
pub fn hand_off(
    sessions: &SessionStore,
    worktrees: &WorktreeSessionStore,
    id: &SessionId,
) -> Result<PathBuf, HandoffError> {
    let session = sessions
        .get(id)
        .ok_or_else(|| HandoffError::UnknownSession { id: id.to_string() })?;

    let path = session
        .worktree_path
        .clone()
        .ok_or_else(|| HandoffError::WorktreeMissing { id: id.to_string() })?;

    let mut worktree_session = WorktreeSession::new(
        path.clone(),
        session.id.clone(),
        session.ticket.clone(),
        session.branch.clone(),
    );
    worktree_session.analysis = session.analysis.clone();

    match worktrees.start_run(worktree_session) {
        Ok(()) => {}
        Err(WorktreeSessionError::Busy { path }) => {
            return Err(HandoffError::PathBusy { path });
        }
        Err(WorktreeSessionError::NotFound { path }) => {
            // start_run never reports NotFound; keep the session intact.
            return Err(HandoffError::PathBusy { path });
        }
    }

    sessions.remove(id);
    Ok(path)
}
