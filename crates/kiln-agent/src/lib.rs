//! Assistant process integration: command adapters for the supported CLIs,
//! a PTY-backed streaming turn runner, and the plan protocol codec.

pub mod adapter;
pub mod error;
pub mod plan;
pub mod runner;
pub mod types;

pub use adapter::{adapter_for, AssistantAdapter, ClaudeAdapter, CodexAdapter};
pub use error::AgentError;
pub use plan::{
    build_implementation_prompt, build_plan_prompt, fallback_plan, parse_plan_response, ParsedPlan,
};
pub use runner::{RunnerPtySize, TurnRunner};
pub use types::{AssistantCommand, TurnRequest, TurnResult, TurnStopReason};
