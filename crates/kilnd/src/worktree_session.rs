//! Worktree sessions: implementation runs keyed by worktree path.
//!
//! A worktree session is created when a plan is handed off and owns the
//! work from then on. Output is only accepted while the run is live; once
//! a session reaches a terminal status it never changes again, though a
//! later hand-off to the same path may replace the record with a fresh run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use kiln_core::state::WorktreeStatus;
use kiln_core::types::{SessionId, Ticket};

#[derive(Debug, thiserror::Error)]
pub enum WorktreeSessionError {
    #[error("no worktree session at {path}")]
    NotFound { path: PathBuf },
    #[error("worktree at {path} already has an active session")]
    Busy { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeSession {
    pub path: PathBuf,
    pub session_id: SessionId,
    pub ticket: Ticket,
    pub branch: String,
    pub status: WorktreeStatus,
    /// Analysis carried over from the planning session at hand-off.
    pub analysis: String,
    /// Streamed implementation output, one chunk per entry.
    pub output: Vec<String>,
    /// Failure detail when the run ended with `Error`.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Diff snapshot persisted when the run finished, if any.
    pub diff_path: Option<PathBuf>,
}

impl WorktreeSession {
    pub fn new(
        path: impl Into<PathBuf>,
        session_id: SessionId,
        ticket: Ticket,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            session_id,
            ticket,
            branch: branch.into(),
            status: WorktreeStatus::Idle,
            analysis: String::new(),
            output: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            diff_path: None,
        }
    }
}

/// Thread-safe store of worktree sessions, keyed by worktree path.
#[derive(Debug, Default)]
pub struct WorktreeSessionStore {
    inner: Mutex<HashMap<PathBuf, WorktreeSession>>,
}

impl WorktreeSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, WorktreeSession>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register `session` as the running session for its path.
    ///
    /// Fails with [`WorktreeSessionError::Busy`] when an active session
    /// already holds the path. A previous terminal record is replaced by
    /// the fresh run.
    pub fn start_run(&self, mut session: WorktreeSession) -> Result<(), WorktreeSessionError> {
        let mut guard = self.lock();
        if let Some(existing) = guard.get(&session.path) {
            if existing.status.is_active() {
                return Err(WorktreeSessionError::Busy {
                    path: session.path.clone(),
                });
            }
        }
        session.status = WorktreeStatus::Running;
        session.started_at = Utc::now();
        session.finished_at = None;
        guard.insert(session.path.clone(), session);
        Ok(())
    }

    /// Append an output chunk. Returns true when the chunk was accepted;
    /// output for a missing or non-running session is dropped.
    pub fn append_output(&self, path: &Path, chunk: &str) -> bool {
        let mut guard = self.lock();
        match guard.get_mut(path) {
            Some(session) if session.status.accepts_output() => {
                session.output.push(chunk.to_string());
                true
            }
            _ => false,
        }
    }

    /// Finish a running session with success or error. Terminal sessions
    /// are left untouched.
    pub fn complete(
        &self,
        path: &Path,
        success: bool,
        error: Option<String>,
    ) -> Result<(), WorktreeSessionError> {
        self.with_active(path, |session| {
            session.status = if success {
                WorktreeStatus::Success
            } else {
                WorktreeStatus::Error
            };
            session.error = if success { None } else { error };
            session.finished_at = Some(Utc::now());
        })
    }

    /// Stop an active session. A no-op error for already-terminal ones.
    pub fn mark_stopped(&self, path: &Path) -> Result<(), WorktreeSessionError> {
        self.with_active(path, |session| {
            session.status = WorktreeStatus::Stopped;
            session.finished_at = Some(Utc::now());
        })
    }

    pub fn set_diff_path(
        &self,
        path: &Path,
        diff_path: impl Into<PathBuf>,
    ) -> Result<(), WorktreeSessionError> {
        let mut guard = self.lock();
        let session = guard
            .get_mut(path)
            .ok_or_else(|| WorktreeSessionError::NotFound {
                path: path.to_path_buf(),
            })?;
        session.diff_path = Some(diff_path.into());
        Ok(())
    }

    pub fn get(&self, path: &Path) -> Option<WorktreeSession> {
        self.lock().get(path).cloned()
    }

    pub fn remove(&self, path: &Path) -> Option<WorktreeSession> {
        self.lock().remove(path)
    }

    pub fn list(&self) -> Vec<WorktreeSession> {
        let mut sessions: Vec<WorktreeSession> = self.lock().values().cloned().collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }

    fn with_active(
        &self,
        path: &Path,
        f: impl FnOnce(&mut WorktreeSession),
    ) -> Result<(), WorktreeSessionError> {
        let mut guard = self.lock();
        let session = guard
            .get_mut(path)
            .ok_or_else(|| WorktreeSessionError::NotFound {
                path: path.to_path_buf(),
            })?;
        if session.status.is_terminal() {
            return Err(WorktreeSessionError::Busy {
                path: path.to_path_buf(),
            });
        }
        f(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::types::TicketId;
    use std::path::PathBuf;

    fn session(path: &str, id: &str) -> WorktreeSession {
        let ticket = Ticket::new(TicketId::new("t-1"), "ENG-42", "Add Login Button");
        WorktreeSession::new(path, SessionId::new(id), ticket, "eng-42-add-login-button")
    }

    #[test]
    fn start_run_marks_session_running() {
        let store = WorktreeSessionStore::new();
        store
            .start_run(session("/wt/eng-42", "s-1"))
            .expect("start run");

        let live = store.get(Path::new("/wt/eng-42")).expect("present");
        assert_eq!(live.status, WorktreeStatus::Running);
        assert!(live.finished_at.is_none());
    }

    #[test]
    fn start_run_rejects_busy_path_but_replaces_terminal_record() {
        let store = WorktreeSessionStore::new();
        let path = Path::new("/wt/eng-42");
        store.start_run(session("/wt/eng-42", "s-1")).expect("first run");

        let err = store
            .start_run(session("/wt/eng-42", "s-2"))
            .expect_err("path is busy");
        assert!(matches!(err, WorktreeSessionError::Busy { .. }));

        store.complete(path, true, None).expect("complete");
        store
            .start_run(session("/wt/eng-42", "s-3"))
            .expect("terminal record replaced");
        assert_eq!(
            store.get(path).expect("present").session_id,
            SessionId::new("s-3")
        );
    }

    #[test]
    fn output_only_accepted_while_running() {
        let store = WorktreeSessionStore::new();
        let path = Path::new("/wt/eng-42");
        store.start_run(session("/wt/eng-42", "s-1")).expect("run");

        assert!(store.append_output(path, "building..."));
        store.mark_stopped(path).expect("stop");
        assert!(!store.append_output(path, "late chunk"));

        let stopped = store.get(path).expect("present");
        assert_eq!(stopped.status, WorktreeStatus::Stopped);
        assert_eq!(stopped.output, vec!["building...".to_string()]);
    }

    #[test]
    fn output_for_unknown_path_is_dropped() {
        let store = WorktreeSessionStore::new();
        assert!(!store.append_output(Path::new("/wt/ghost"), "chunk"));
    }

    #[test]
    fn complete_sets_terminal_status_and_finish_time() {
        let store = WorktreeSessionStore::new();
        let path = Path::new("/wt/eng-42");
        store.start_run(session("/wt/eng-42", "s-1")).expect("run");

        store
            .complete(path, false, Some("assistant turn failed".to_string()))
            .expect("complete");
        let done = store.get(path).expect("present");
        assert_eq!(done.status, WorktreeStatus::Error);
        assert_eq!(done.error.as_deref(), Some("assistant turn failed"));
        assert!(done.finished_at.is_some());

        let err = store
            .complete(path, true, None)
            .expect_err("already terminal");
        assert!(matches!(err, WorktreeSessionError::Busy { .. }));
    }

    #[test]
    fn per_path_isolation_between_concurrent_runs() {
        let store = WorktreeSessionStore::new();
        let a = PathBuf::from("/wt/eng-1");
        let b = PathBuf::from("/wt/eng-2");
        store.start_run(session("/wt/eng-1", "s-a")).expect("run a");
        store.start_run(session("/wt/eng-2", "s-b")).expect("run b");

        store.mark_stopped(&a).expect("stop a");
        assert!(!store.append_output(&a, "late"));
        assert!(store.append_output(&b, "still running"));

        assert_eq!(store.get(&a).expect("a").status, WorktreeStatus::Stopped);
        assert_eq!(store.get(&b).expect("b").status, WorktreeStatus::Running);
    }
}
