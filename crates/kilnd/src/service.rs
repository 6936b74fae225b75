//! Orchestrator façade: ticket in, planning protocol in the middle,
//! detached implementation run out.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use kiln_agent::adapter::adapter_for;
use kiln_agent::error::AgentError;
use kiln_agent::plan::{build_implementation_prompt, build_plan_prompt, parse_plan_response};
use kiln_agent::runner::TurnRunner;
use kiln_agent::types::{TurnRequest, TurnStopReason};
use kiln_core::config::KilnConfig;
use kiln_core::events::{Event, EventId, EventKind};
use kiln_core::state::SessionStep;
use kiln_core::types::{PlanQuestion, PlanStep, SessionId, Ticket};
use kiln_git::command::GitRunner;
use kiln_git::error::GitError;
use kiln_git::repo::discover_repo;
use kiln_git::snapshot::DiffStore;
use kiln_git::worktree::WorktreeProvisioner;

use crate::detach::Detacher;
use crate::event_log::{EventLogError, JsonlEventLog};
use crate::handoff::{hand_off, HandoffError};
use crate::session::{Session, SessionError, SessionStore};
use crate::worktree_session::{WorktreeSession, WorktreeSessionError, WorktreeSessionStore};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Handoff(#[from] HandoffError),
    #[error(transparent)]
    EventLog(#[from] EventLogError),
    #[error(transparent)]
    Worktree(#[from] WorktreeSessionError),
    #[error("session {id} has no provisioned worktree")]
    NoWorktree { id: String },
    #[error("session {id} is not awaiting plan review")]
    NotInReview { id: String },
    #[error("planning turn for session {id} failed: {reason}")]
    PlanningFailed { id: String, reason: String },
}

/// What the caller should do next after a planning turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanningOutcome {
    /// The assistant raised questions; answer them and re-run planning.
    NeedsAnswers { questions: Vec<PlanQuestion> },
    /// A plan is parsed and waiting for approval or rejection.
    ReadyForReview {
        steps: Vec<PlanStep>,
        used_fallback: bool,
    },
}

/// How a free-form review reply maps onto the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Reject,
    /// Anything else is treated as extra context for the next round.
    Context(String),
}

/// Empty input and y/yes approve; n/no rejects; everything else becomes
/// additional context.
pub fn normalize_approval(input: &str) -> ApprovalDecision {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return ApprovalDecision::Approve;
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::Approve,
        "n" | "no" => ApprovalDecision::Reject,
        _ => ApprovalDecision::Context(trimmed.to_string()),
    }
}

pub struct Orchestrator {
    config: KilnConfig,
    git: GitRunner,
    runner: TurnRunner,
    sessions: SessionStore,
    worktrees: Arc<WorktreeSessionStore>,
    detacher: Detacher,
    event_log: Arc<JsonlEventLog>,
    diff_store: DiffStore,
    nonce: Arc<AtomicU64>,
}

impl Orchestrator {
    /// Build an orchestrator rooted at `base_dir`: the event log and diff
    /// snapshots live under it, at the paths the config names.
    pub fn new(config: KilnConfig, base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let git = GitRunner::new(config.git.binary.clone());
        let event_log = Arc::new(JsonlEventLog::new(base_dir.join(&config.log.root)));
        let diff_store = DiffStore::new(base_dir.join(&config.log.snapshot_dir));
        Self {
            config,
            git,
            runner: TurnRunner::default(),
            sessions: SessionStore::new(),
            worktrees: Arc::new(WorktreeSessionStore::new()),
            detacher: Detacher::new(),
            event_log,
            diff_store,
            nonce: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn session(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id)
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.sessions.list()
    }

    pub fn worktree(&self, path: &Path) -> Option<WorktreeSession> {
        self.worktrees.get(path)
    }

    pub fn list_worktrees(&self) -> Vec<WorktreeSession> {
        self.worktrees.list()
    }

    pub fn diff_store(&self) -> &DiffStore {
        &self.diff_store
    }

    /// Create a planning session for `ticket`.
    pub fn start_session(&self, ticket: Ticket) -> Result<SessionId, ServiceError> {
        let id = SessionId::new(format!(
            "s-{}-{}",
            ticket.identifier.to_lowercase(),
            self.nonce.fetch_add(1, Ordering::SeqCst) + 1
        ));
        let mut session = Session::new(id.clone(), ticket);
        session.needs_input = true;
        session.push_log(
            &format!(
                "session created for {} ({})",
                session.ticket.identifier, session.ticket.title
            ),
            self.config.log.wrap_columns,
        );
        self.sessions.insert(session);
        self.record(Some(id.clone()), None, EventKind::SessionCreated)?;
        Ok(id)
    }

    /// Verify `repo_path` and provision the session's worktree. Any failure
    /// drops the session back to repository selection so the user can retry.
    pub fn select_repo(&self, id: &SessionId, repo_path: &Path) -> Result<PathBuf, ServiceError> {
        self.advance_step(id, SessionStep::RepoVerify)?;

        let repo = match discover_repo(repo_path, &self.git) {
            Ok(repo) => repo,
            Err(err) => {
                self.fail_back_to_repo_select(id, "repo_verify_failed", &err)?;
                return Err(err.into());
            }
        };
        self.record(
            Some(id.clone()),
            None,
            EventKind::RepoVerified {
                path: repo.root.clone(),
            },
        )?;
        let branch = self.sessions.with(id, |session| {
            session.repo_path = Some(repo.root.clone());
            session.branch.clone()
        })?;

        self.advance_step(id, SessionStep::WorktreeSetup)?;
        let provisioner =
            WorktreeProvisioner::new(self.git.clone(), self.config.worktree.root.clone());
        let provisioned = match provisioner.provision(&repo, &branch) {
            Ok(provisioned) => provisioned,
            Err(err) => {
                self.fail_back_to_repo_select(id, "worktree_setup_failed", &err)?;
                return Err(err.into());
            }
        };

        let wrap = self.config.log.wrap_columns;
        self.sessions.with(id, |session| {
            for warning in &provisioned.warnings {
                session.push_log(warning, wrap);
            }
            session.push_log(
                &format!(
                    "worktree {} at {}",
                    if provisioned.reused { "reused" } else { "created" },
                    provisioned.path.display()
                ),
                wrap,
            );
            session.worktree_path = Some(provisioned.path.clone());
        })?;
        self.record(
            Some(id.clone()),
            Some(&provisioned.path),
            EventKind::WorktreeProvisioned {
                path: provisioned.path.clone(),
                reused: provisioned.reused,
            },
        )?;

        self.advance_step(id, SessionStep::Analyze)?;
        Ok(provisioned.path)
    }

    /// Run one planning turn against the assistant on the caller's thread.
    pub fn run_planning(&self, id: &SessionId) -> Result<PlanningOutcome, ServiceError> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        let worktree_path = session
            .worktree_path
            .clone()
            .ok_or_else(|| ServiceError::NoWorktree { id: id.to_string() })?;

        match session.step {
            // A session in review may loop back for a fresh round, e.g.
            // after new context was submitted.
            SessionStep::Analyze | SessionStep::PlanReview => {
                self.advance_step(id, SessionStep::Planning)?;
            }
            SessionStep::Planning => {}
            other => {
                return Err(SessionError::InvalidTransition {
                    from: other,
                    to: SessionStep::Planning,
                }
                .into());
            }
        }

        self.sessions.with(id, |s| s.begin_processing())??;

        let prompt = build_plan_prompt(&session.ticket, &session.additional_context);
        let mut request = TurnRequest::new(prompt, &worktree_path).plan_only();
        request.timeout_secs = self.config.assistant.turn_timeout_secs;
        let adapter = adapter_for(
            self.config.assistant.kind,
            self.config.assistant.executable.as_deref(),
        );

        let wrap = self.config.log.wrap_columns;
        let stop = AtomicBool::new(false);
        let mut on_chunk = |chunk: &str| {
            let _ = self.sessions.with(id, |s| s.append_streaming(chunk));
        };
        let result = match self
            .runner
            .run_turn(&request, adapter.as_ref(), &mut on_chunk, &stop)
        {
            Ok(result) => result,
            Err(err) => {
                let _ = self.sessions.with(id, |s| s.finish_processing(true));
                self.record(
                    Some(id.clone()),
                    Some(&worktree_path),
                    EventKind::Error {
                        code: "planning_turn_failed".to_string(),
                        message: err.to_string(),
                    },
                )?;
                return Err(err.into());
            }
        };

        if !result.success() {
            let reason = format!("{:?}", result.stop_reason);
            let _ = self.sessions.with(id, |s| s.finish_processing(true));
            self.record(
                Some(id.clone()),
                Some(&worktree_path),
                EventKind::Error {
                    code: "planning_turn_failed".to_string(),
                    message: reason.clone(),
                },
            )?;
            return Err(ServiceError::PlanningFailed {
                id: id.to_string(),
                reason,
            });
        }

        let parsed = parse_plan_response(&result.response);
        self.record(
            Some(id.clone()),
            Some(&worktree_path),
            EventKind::PlanParsed {
                steps: parsed.steps.len(),
                questions: parsed.questions.len(),
                fallback: parsed.used_fallback,
            },
        )?;

        let has_questions = !parsed.questions.is_empty();
        self.sessions.with(id, |s| {
            s.analysis = parsed.analysis.clone();
            s.questions = parsed.questions.clone();
            s.plan = parsed.steps.clone();
            s.used_fallback_plan = parsed.used_fallback;
            if !parsed.analysis.is_empty() {
                s.push_log(&parsed.analysis, wrap);
            }
            for step in &parsed.steps {
                s.push_log(&format!("step {}: {}", step.id, step.description), wrap);
            }
        })?;

        if has_questions {
            self.sessions.with(id, |s| s.finish_processing(true))?;
            return Ok(PlanningOutcome::NeedsAnswers {
                questions: parsed.questions,
            });
        }

        self.advance_step(id, SessionStep::PlanReview)?;
        self.sessions.with(id, |s| s.finish_processing(true))?;
        Ok(PlanningOutcome::ReadyForReview {
            steps: parsed.steps,
            used_fallback: parsed.used_fallback,
        })
    }

    /// Record answers to the current planning questions and fold them into
    /// the context for the next planning round.
    pub fn submit_answers(
        &self,
        id: &SessionId,
        answers: &[(u32, String)],
    ) -> Result<usize, ServiceError> {
        let answered = self.sessions.with(id, |session| {
            let mut answered = 0usize;
            for (question_id, answer) in answers {
                let answer = answer.trim();
                if answer.is_empty() {
                    continue;
                }
                if let Some(question) = session
                    .questions
                    .iter_mut()
                    .find(|question| question.id == *question_id)
                {
                    question.answer = answer.to_string();
                    answered += 1;
                }
            }
            let folded: Vec<String> = session
                .questions
                .iter()
                .filter(|question| question.is_answered())
                .map(|question| format!("Q: {}\nA: {}", question.question, question.answer))
                .collect();
            for entry in folded {
                session.fold_context(&entry);
            }
            answered
        })?;

        self.record(
            Some(id.clone()),
            None,
            EventKind::QuestionsAnswered { count: answered },
        )?;
        Ok(answered)
    }

    /// Attach free-form user context to the session.
    pub fn submit_context(&self, id: &SessionId, text: &str) -> Result<(), ServiceError> {
        let wrap = self.config.log.wrap_columns;
        self.sessions.with(id, |session| {
            session.fold_context(text);
            session.push_log(&format!("context added: {text}"), wrap);
        })?;
        Ok(())
    }

    /// Approve the reviewed plan: hand the ticket off to a worktree session
    /// and start the detached implementation run.
    pub fn approve_plan(&self, id: &SessionId) -> Result<PathBuf, ServiceError> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        if session.step != SessionStep::PlanReview {
            return Err(ServiceError::NotInReview { id: id.to_string() });
        }
        if session.worktree_path.is_none() {
            return Err(ServiceError::NoWorktree { id: id.to_string() });
        }

        // Hand off before recording anything: a busy path must leave the
        // session untouched at plan review, free to approve again later.
        let path = hand_off(&self.sessions, &self.worktrees, id)?;
        self.record(Some(id.clone()), Some(&path), EventKind::PlanApproved)?;
        self.record(
            Some(id.clone()),
            None,
            EventKind::StepChanged {
                from: SessionStep::PlanReview,
                to: SessionStep::Complete,
            },
        )?;
        self.record(
            Some(id.clone()),
            Some(&path),
            EventKind::HandedOff { path: path.clone() },
        )?;

        self.spawn_implementation(&session, path.clone());
        Ok(path)
    }

    /// Reject the reviewed plan with feedback; the session loops back to
    /// planning and the next round must produce a freshly approved plan.
    pub fn reject_plan(&self, id: &SessionId, feedback: &str) -> Result<(), ServiceError> {
        let step = self
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?
            .step;
        if step != SessionStep::PlanReview {
            return Err(ServiceError::NotInReview { id: id.to_string() });
        }

        self.record(
            Some(id.clone()),
            None,
            EventKind::PlanRejected {
                feedback: feedback.to_string(),
            },
        )?;
        let wrap = self.config.log.wrap_columns;
        self.sessions.with(id, |session| {
            session.fold_context(&format!("Plan feedback: {feedback}"));
            session.push_log(&format!("plan rejected: {feedback}"), wrap);
        })?;
        self.advance_step(id, SessionStep::Planning)?;
        Ok(())
    }

    /// Abandon a planning session before hand-off.
    pub fn stop_session(&self, id: &SessionId) -> Result<(), ServiceError> {
        let session = self
            .sessions
            .remove(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        self.record(
            Some(session.id),
            session.worktree_path.as_deref(),
            EventKind::SessionStopped,
        )?;
        Ok(())
    }

    /// Stop a detached implementation run. The stop flag is raised first so
    /// no further output reaches the store, then the session is finalized.
    pub fn stop_worktree(&self, path: &Path) -> Result<(), ServiceError> {
        self.detacher.stop(path);
        let session_id = self.worktrees.get(path).map(|session| session.session_id);
        self.worktrees.mark_stopped(path)?;
        self.record(session_id, Some(path), EventKind::SessionStopped)?;
        Ok(())
    }

    /// Drop a finished worktree session record. Active runs must be stopped
    /// first.
    pub fn remove_worktree(&self, path: &Path) -> Result<(), ServiceError> {
        let session = self
            .worktrees
            .get(path)
            .ok_or_else(|| WorktreeSessionError::NotFound {
                path: path.to_path_buf(),
            })?;
        if session.status.is_active() {
            return Err(WorktreeSessionError::Busy {
                path: path.to_path_buf(),
            }
            .into());
        }
        self.worktrees.remove(path);
        self.detacher.forget(path);
        Ok(())
    }

    fn spawn_implementation(&self, session: &Session, path: PathBuf) {
        let prompt = build_implementation_prompt(
            &session.ticket,
            &session.plan,
            &session.additional_context,
        );
        let mut request = TurnRequest::new(prompt, &path);
        request.timeout_secs = self.config.assistant.turn_timeout_secs;
        let adapter = adapter_for(
            self.config.assistant.kind,
            self.config.assistant.executable.as_deref(),
        );

        let worktrees = Arc::clone(&self.worktrees);
        let chunk_store = Arc::clone(&self.worktrees);
        let event_log = Arc::clone(&self.event_log);
        let nonce = Arc::clone(&self.nonce);
        let diff_store = self.diff_store.clone();
        let git = self.git.clone();
        let session_id = session.id.clone();

        self.detacher.spawn(
            self.runner.clone(),
            adapter,
            request,
            path,
            Arc::new(move |path, chunk| {
                chunk_store.append_output(path, chunk);
            }),
            Arc::new(move |path, result| {
                let record = |kind: EventKind| {
                    let event = Event::now(
                        EventId(format!("E{}", nonce.fetch_add(1, Ordering::SeqCst) + 1)),
                        Some(session_id.clone()),
                        kind,
                    )
                    .with_worktree(path);
                    let _ = event_log.append_both(&event);
                };

                if result.stop_reason == TurnStopReason::Stopped {
                    // stop_worktree usually finalized the record already.
                    let _ = worktrees.mark_stopped(path);
                } else {
                    let success = result.success();
                    let error = (!success).then(|| {
                        format!(
                            "assistant turn ended with {:?} (exit code {:?})",
                            result.stop_reason, result.exit_code
                        )
                    });
                    let _ = worktrees.complete(path, success, error);
                    record(EventKind::ImplementationCompleted { success });
                }

                // Best-effort snapshot of whatever the run left behind.
                match diff_store.save(&git, path, session_id.as_ref(), None) {
                    Ok(saved) => {
                        let _ = worktrees.set_diff_path(path, saved.path.clone());
                        record(EventKind::DiffSnapshotSaved {
                            path: saved.path,
                            diff_len: saved.diff_len,
                        });
                    }
                    Err(err) => record(EventKind::Error {
                        code: "diff_snapshot_failed".to_string(),
                        message: err.to_string(),
                    }),
                }
            }),
        );
    }

    fn advance_step(&self, id: &SessionId, to: SessionStep) -> Result<(), ServiceError> {
        let from = self.sessions.with(id, |session| {
            let from = session.step;
            session.advance(to).map(|_| from)
        })??;
        self.record(Some(id.clone()), None, EventKind::StepChanged { from, to })?;
        Ok(())
    }

    fn fail_back_to_repo_select(
        &self,
        id: &SessionId,
        code: &str,
        err: &GitError,
    ) -> Result<(), ServiceError> {
        let wrap = self.config.log.wrap_columns;
        self.sessions.with(id, |session| {
            session.push_log(&err.to_string(), wrap);
            let _ = session.advance(SessionStep::RepoSelect);
            session.finish_processing(true);
        })?;
        self.record(
            Some(id.clone()),
            None,
            EventKind::Error {
                code: code.to_string(),
                message: err.to_string(),
            },
        )?;
        Ok(())
    }

    fn record(
        &self,
        session_id: Option<SessionId>,
        worktree: Option<&Path>,
        kind: EventKind,
    ) -> Result<(), ServiceError> {
        let mut event = Event::now(
            EventId(format!(
                "E{}",
                self.nonce.fetch_add(1, Ordering::SeqCst) + 1
            )),
            session_id,
            kind,
        );
        if let Some(path) = worktree {
            event = event.with_worktree(path);
        }
        self.event_log.append_both(&event)?;
        Ok(())
    }
}
