//! Planning-phase sessions and their in-memory store.
//!
//! A session owns one ticket from creation until the plan is approved and
//! handed off to a worktree session; after hand-off the session record is
//! gone and the worktree session is the sole owner of the work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use kiln_core::state::{step_transition_allowed, SessionStep};
use kiln_core::types::{LogEntry, PlanQuestion, PlanStep, SessionId, Ticket};

use crate::wrap::wrap_text;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {id} not found")]
    NotFound { id: String },
    #[error("session step transition {from} -> {to} is not allowed")]
    InvalidTransition { from: SessionStep, to: SessionStep },
    #[error("session {id} is already processing a turn")]
    Busy { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub ticket: Ticket,
    pub step: SessionStep,
    /// Branch derived from the ticket; fixed for the session's lifetime.
    pub branch: String,
    pub repo_path: Option<PathBuf>,
    pub worktree_path: Option<PathBuf>,
    pub analysis: String,
    /// Live assistant output for the current turn; cleared once the turn
    /// finishes and its parsed result lands in the log.
    pub streaming_output: String,
    pub questions: Vec<PlanQuestion>,
    pub plan: Vec<PlanStep>,
    pub used_fallback_plan: bool,
    /// Accumulated user-supplied context: answers, free text, rejection
    /// feedback. Folded into every planning prompt.
    pub additional_context: String,
    pub log: Vec<LogEntry>,
    /// True when the session is blocked on user input.
    pub needs_input: bool,
    /// True while an assistant turn is running for this session.
    pub is_processing: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, ticket: Ticket) -> Self {
        let branch = kiln_core::branch::derive_branch_name(&ticket.identifier, &ticket.title);
        let now = Utc::now();
        Self {
            id,
            ticket,
            step: SessionStep::RepoSelect,
            branch,
            repo_path: None,
            worktree_path: None,
            analysis: String::new(),
            streaming_output: String::new(),
            questions: Vec::new(),
            plan: Vec::new(),
            used_fallback_plan: false,
            additional_context: String::new(),
            log: Vec::new(),
            needs_input: false,
            is_processing: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn advance(&mut self, to: SessionStep) -> Result<(), SessionError> {
        if !step_transition_allowed(self.step, to) {
            return Err(SessionError::InvalidTransition {
                from: self.step,
                to,
            });
        }
        self.step = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Append `text` to the session log, word-wrapped to `columns`.
    pub fn push_log(&mut self, text: &str, columns: usize) {
        for line in wrap_text(text, columns) {
            self.log.push(LogEntry::now(line));
        }
        self.updated_at = Utc::now();
    }

    /// Mark the session as running an assistant turn. `needs_input` and
    /// `is_processing` are mutually exclusive.
    pub fn begin_processing(&mut self) -> Result<(), SessionError> {
        if self.is_processing {
            return Err(SessionError::Busy {
                id: self.id.to_string(),
            });
        }
        self.is_processing = true;
        self.needs_input = false;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn finish_processing(&mut self, needs_input: bool) {
        self.is_processing = false;
        self.needs_input = needs_input;
        self.streaming_output.clear();
        self.updated_at = Utc::now();
    }

    pub fn append_streaming(&mut self, chunk: &str) {
        self.streaming_output.push_str(chunk);
        self.streaming_output.push('\n');
        self.updated_at = Utc::now();
    }

    pub fn unanswered_questions(&self) -> usize {
        self.questions
            .iter()
            .filter(|question| !question.is_answered())
            .count()
    }

    pub fn fold_context(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.additional_context.is_empty() {
            self.additional_context.push_str("\n\n");
        }
        self.additional_context.push_str(text);
        self.updated_at = Utc::now();
    }
}

/// Thread-safe in-memory session store.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<SessionId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn insert(&self, session: Session) {
        self.lock().insert(session.id.clone(), session);
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.lock().get(id).cloned()
    }

    /// Mutate one session under the store lock.
    pub fn with<R>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, SessionError> {
        let mut guard = self.lock();
        let session = guard.get_mut(id).ok_or_else(|| SessionError::NotFound {
            id: id.to_string(),
        })?;
        Ok(f(session))
    }

    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        self.lock().remove(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.lock().values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::types::TicketId;

    fn session(id: &str) -> Session {
        let ticket = Ticket::new(TicketId::new(format!("t-{id}")), "ENG-42", "Add Login Button");
        Session::new(SessionId::new(id), ticket)
    }

    #[test]
    fn new_session_starts_at_repo_select_with_derived_branch() {
        let session = session("s-1");
        assert_eq!(session.step, SessionStep::RepoSelect);
        assert_eq!(session.branch, "eng-42-add-login-button");
        assert!(!session.needs_input);
        assert!(!session.is_processing);
    }

    #[test]
    fn advance_rejects_step_skips() {
        let mut session = session("s-1");
        let err = session
            .advance(SessionStep::Planning)
            .expect_err("skip should fail");
        assert!(matches!(err, SessionError::InvalidTransition { .. }));
        assert_eq!(session.step, SessionStep::RepoSelect);

        session.advance(SessionStep::RepoVerify).expect("forward");
        assert_eq!(session.step, SessionStep::RepoVerify);
    }

    #[test]
    fn processing_and_needs_input_are_mutually_exclusive() {
        let mut session = session("s-1");
        session.needs_input = true;

        session.begin_processing().expect("begin");
        assert!(session.is_processing);
        assert!(!session.needs_input);

        let err = session.begin_processing().expect_err("already processing");
        assert!(matches!(err, SessionError::Busy { .. }));

        session.finish_processing(true);
        assert!(!session.is_processing);
        assert!(session.needs_input);
    }

    #[test]
    fn streaming_output_clears_when_the_turn_finishes() {
        let mut session = session("s-1");
        session.begin_processing().expect("begin");
        session.append_streaming("chunk one");
        session.append_streaming("chunk two");
        assert_eq!(session.streaming_output, "chunk one\nchunk two\n");

        session.finish_processing(true);
        assert!(session.streaming_output.is_empty());
    }

    #[test]
    fn push_log_wraps_long_entries() {
        let mut session = session("s-1");
        session.push_log(
            "a fairly long log line that should be wrapped into several entries",
            20,
        );
        assert!(session.log.len() > 1);
        assert!(session
            .log
            .iter()
            .all(|entry| entry.text.chars().count() <= 20));
    }

    #[test]
    fn fold_context_accumulates_with_separators() {
        let mut session = session("s-1");
        session.fold_context("Q1: use OAuth");
        session.fold_context("   ");
        session.fold_context("keep steps small");
        assert_eq!(
            session.additional_context,
            "Q1: use OAuth\n\nkeep steps small"
        );
    }

    #[test]
    fn store_insert_get_remove_roundtrip() {
        let store = SessionStore::new();
        store.insert(session("s-1"));
        store.insert(session("s-2"));

        assert_eq!(store.len(), 2);
        assert!(store.get(&SessionId::new("s-1")).is_some());

        store
            .with(&SessionId::new("s-1"), |s| s.fold_context("note"))
            .expect("mutate");
        assert_eq!(
            store
                .get(&SessionId::new("s-1"))
                .expect("present")
                .additional_context,
            "note"
        );

        assert!(store.remove(&SessionId::new("s-1")).is_some());
        assert!(!store.contains(&SessionId::new("s-1")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn with_reports_missing_session() {
        let store = SessionStore::new();
        let err = store
            .with(&SessionId::new("ghost"), |_| ())
            .expect_err("missing session");
        assert!(matches!(err, SessionError::NotFound { .. }));
    }
}
