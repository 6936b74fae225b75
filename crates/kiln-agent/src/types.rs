use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Rendered assistant invocation: what to exec, with which args and env.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantCommand {
    pub executable: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// One request/stream/response cycle against the assistant process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub prompt: String,
    /// Working directory the assistant runs in (repo or worktree).
    pub cwd: PathBuf,
    #[serde(default)]
    pub context_files: Vec<PathBuf>,
    /// Suppress file-mutating tool use (planning phase).
    #[serde(default)]
    pub plan_only: bool,
    /// Deadline in seconds; 0 means no deadline.
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

impl TurnRequest {
    pub fn new(prompt: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            cwd: cwd.into(),
            context_files: Vec::new(),
            plan_only: false,
            timeout_secs: 0,
            extra_args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn plan_only(mut self) -> Self {
        self.plan_only = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStopReason {
    Completed,
    Failed,
    Timeout,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stop_reason: TurnStopReason,
    pub exit_code: Option<i32>,
    /// Full accumulated response text (all streamed chunks).
    pub response: String,
}

impl TurnResult {
    pub fn success(&self) -> bool {
        self.stop_reason == TurnStopReason::Completed
    }
}
