//! Assistant CLI adapters. Each adapter knows how to render a turn request
//! into a concrete command line, including the flags that suppress
//! file-mutating tool use during planning.

use kiln_core::config::AssistantKind;

use crate::types::{AssistantCommand, TurnRequest};

pub trait AssistantAdapter: Send + Sync {
    fn kind(&self) -> AssistantKind;
    fn build_command(&self, request: &TurnRequest) -> AssistantCommand;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeAdapter {
    pub executable: String,
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
        }
    }
}

impl AssistantAdapter for ClaudeAdapter {
    fn kind(&self) -> AssistantKind {
        AssistantKind::Claude
    }

    fn build_command(&self, request: &TurnRequest) -> AssistantCommand {
        let mut args = vec!["-p".to_string()];
        if request.plan_only {
            args.push("--permission-mode".to_string());
            args.push("plan".to_string());
        }
        for file in &request.context_files {
            args.push("--add-dir".to_string());
            args.push(file.display().to_string());
        }
        args.extend(request.extra_args.iter().cloned());
        args.push(request.prompt.clone());

        AssistantCommand {
            executable: self.executable.clone(),
            args,
            env: request.env.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexAdapter {
    pub executable: String,
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self {
            executable: "codex".to_string(),
        }
    }
}

impl AssistantAdapter for CodexAdapter {
    fn kind(&self) -> AssistantKind {
        AssistantKind::Codex
    }

    fn build_command(&self, request: &TurnRequest) -> AssistantCommand {
        let mut args = vec!["exec".to_string()];
        if request.plan_only {
            args.push("--sandbox".to_string());
            args.push("read-only".to_string());
        }
        args.extend(request.extra_args.iter().cloned());
        args.push(request.prompt.clone());

        AssistantCommand {
            executable: self.executable.clone(),
            args,
            env: request.env.clone(),
        }
    }
}

/// Build the adapter for a configured assistant kind, optionally overriding
/// the executable name.
pub fn adapter_for(kind: AssistantKind, executable: Option<&str>) -> Box<dyn AssistantAdapter> {
    match kind {
        AssistantKind::Claude => Box::new(ClaudeAdapter {
            executable: executable.unwrap_or("claude").to_string(),
        }),
        AssistantKind::Codex => Box::new(CodexAdapter {
            executable: executable.unwrap_or("codex").to_string(),
        }),
    }
}
