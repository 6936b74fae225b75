//! Streaming turn runner. Spawns the assistant CLI in a PTY, forwards each
//! output line to the caller's sink as it arrives, and honors an external
//! stop flag before every side effect.

use chrono::Utc;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::adapter::AssistantAdapter;
use crate::error::AgentError;
use crate::types::{AssistantCommand, TurnRequest, TurnResult, TurnStopReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerPtySize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for RunnerPtySize {
    fn default() -> Self {
        Self {
            rows: 40,
            cols: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRunner {
    pub shell_bin: String,
    pub pty_size: RunnerPtySize,
    pub poll_interval: Duration,
}

impl Default for TurnRunner {
    fn default() -> Self {
        Self {
            shell_bin: "bash".to_string(),
            pty_size: RunnerPtySize::default(),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl TurnRunner {
    /// Run one assistant turn.
    ///
    /// Every output line is delivered to `on_chunk` without its trailing
    /// newline, in arrival order, as soon as it is read. Once `stop` is
    /// observed set, the child is killed and no further chunk is delivered;
    /// the result's stop reason is `Stopped`. A `timeout_secs` of 0 means
    /// no deadline.
    pub fn run_turn(
        &self,
        request: &TurnRequest,
        adapter: &dyn AssistantAdapter,
        on_chunk: &mut dyn FnMut(&str),
        stop: &AtomicBool,
    ) -> Result<TurnResult, AgentError> {
        if request.prompt.trim().is_empty() {
            return Err(AgentError::InvalidRequest {
                message: "prompt must not be empty".to_string(),
            });
        }

        let started_at = Utc::now();
        let deadline = (request.timeout_secs > 0)
            .then(|| Instant::now() + Duration::from_secs(request.timeout_secs));

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: self.pty_size.rows,
                cols: self.pty_size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| AgentError::PtySetup {
                message: err.to_string(),
            })?;

        let assistant_command = adapter.build_command(request);
        let invocation = render_shell_invocation(&request.cwd, &assistant_command);

        let mut command = CommandBuilder::new(self.shell_bin.clone());
        command.arg("-lc");
        command.arg(invocation);

        let mut child = pair
            .slave
            .spawn_command(command)
            .map_err(|err| AgentError::Spawn {
                message: err.to_string(),
            })?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| AgentError::PtySetup {
                message: err.to_string(),
            })?;
        let (tx, rx) = mpsc::channel::<String>();
        let reader_handle = thread::spawn(move || {
            let mut buf = BufReader::new(reader);
            loop {
                let mut line = String::new();
                match buf.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let _ = tx.send(line);
                    }
                    Err(_) => break,
                }
            }
        });

        let mut response = String::new();
        let mut stop_reason: Option<TurnStopReason> = None;
        let mut wait_status = None;

        loop {
            if stop.load(Ordering::SeqCst) {
                let _ = child.kill();
                stop_reason = Some(TurnStopReason::Stopped);
                break;
            }

            if forward_lines(&rx, stop, on_chunk, &mut response) {
                let _ = child.kill();
                stop_reason = Some(TurnStopReason::Stopped);
                break;
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    stop_reason = Some(TurnStopReason::Timeout);
                    break;
                }
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    wait_status = Some(status);
                    break;
                }
                Ok(None) => {}
                Err(err) => {
                    return Err(AgentError::Runtime {
                        message: err.to_string(),
                    });
                }
            }

            thread::sleep(self.poll_interval);
        }

        let final_status = match wait_status {
            Some(status) => Some(status),
            None => child.wait().ok(),
        };

        if stop_reason.is_none() {
            // Child exited on its own: pick up whatever is still buffered.
            let _ = reader_handle.join();
            if forward_lines(&rx, stop, on_chunk, &mut response) {
                stop_reason = Some(TurnStopReason::Stopped);
            }
        }

        let exit_code = final_status
            .as_ref()
            .and_then(|status| i32::try_from(status.exit_code()).ok());

        let stop_reason = stop_reason.unwrap_or_else(|| {
            if final_status.map(|status| status.success()).unwrap_or(false) {
                TurnStopReason::Completed
            } else {
                TurnStopReason::Failed
            }
        });

        Ok(TurnResult {
            started_at,
            finished_at: Utc::now(),
            stop_reason,
            exit_code,
            response,
        })
    }
}

/// Forward buffered lines to the sink. Returns true the moment the stop
/// flag is observed; the pending line is dropped, not delivered.
fn forward_lines(
    rx: &mpsc::Receiver<String>,
    stop: &AtomicBool,
    on_chunk: &mut dyn FnMut(&str),
    response: &mut String,
) -> bool {
    while let Ok(line) = rx.try_recv() {
        if stop.load(Ordering::SeqCst) {
            return true;
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        on_chunk(trimmed);
        response.push_str(trimmed);
        response.push('\n');
    }
    false
}

fn render_shell_invocation(cwd: &Path, command: &AssistantCommand) -> String {
    let mut rendered = String::new();
    rendered.push_str("cd ");
    rendered.push_str(&shell_quote(&cwd.display().to_string()));
    rendered.push_str(" && ");

    for (key, value) in &command.env {
        if key.trim().is_empty() {
            continue;
        }
        rendered.push_str(key);
        rendered.push('=');
        rendered.push_str(&shell_quote(value));
        rendered.push(' ');
    }

    rendered.push_str(&shell_quote(&command.executable));
    for arg in &command.args {
        rendered.push(' ');
        rendered.push_str(&shell_quote(arg));
    }
    rendered
}

fn shell_quote(value: &str) -> String {
    let escaped = value.replace('\'', "'\"'\"'");
    format!("'{escaped}'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::config::AssistantKind;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    /// Adapter that runs an arbitrary command instead of a real assistant.
    struct FakeAdapter {
        executable: String,
        args: Vec<String>,
    }

    impl FakeAdapter {
        fn new(executable: &str, args: &[&str]) -> Self {
            Self {
                executable: executable.to_string(),
                args: args.iter().map(|arg| arg.to_string()).collect(),
            }
        }
    }

    impl AssistantAdapter for FakeAdapter {
        fn kind(&self) -> AssistantKind {
            AssistantKind::Claude
        }

        fn build_command(&self, request: &TurnRequest) -> AssistantCommand {
            AssistantCommand {
                executable: self.executable.clone(),
                args: self.args.clone(),
                env: request.env.clone(),
            }
        }
    }

    #[test]
    fn shell_quote_wraps_and_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("O'Reilly"), "'O'\"'\"'Reilly'");
    }

    #[test]
    fn render_shell_invocation_renders_cd_env_and_command() {
        let command = AssistantCommand {
            executable: "claude".to_string(),
            args: vec!["-p".to_string(), "it's".to_string()],
            env: vec![
                ("FOO".to_string(), "BAR".to_string()),
                ("".to_string(), "SKIP".to_string()),
            ],
        };

        let rendered = render_shell_invocation(Path::new("/tmp/work dir"), &command);
        assert!(rendered.starts_with("cd '/tmp/work dir' && "));
        assert!(rendered.contains("FOO='BAR' "));
        assert!(!rendered.contains("SKIP"));
        assert!(rendered.contains("'claude' '-p' 'it'\"'\"'s'"));
    }

    #[test]
    fn run_turn_rejects_empty_prompt_before_spawning() {
        let runner = TurnRunner::default();
        let adapter = FakeAdapter::new("true", &[]);
        let stop = AtomicBool::new(false);

        let err = runner
            .run_turn(
                &TurnRequest::new("   ", "/tmp"),
                &adapter,
                &mut |_| {},
                &stop,
            )
            .expect_err("empty prompt must fail");

        assert!(matches!(
            err,
            AgentError::InvalidRequest { message } if message.contains("prompt")
        ));
    }

    #[test]
    fn run_turn_streams_lines_and_collects_response() {
        let dir = TempDir::new().expect("temp dir");
        let runner = TurnRunner::default();
        let adapter = FakeAdapter::new("printf", &["line one\\nline two\\n"]);
        let stop = AtomicBool::new(false);

        let mut chunks: Vec<String> = Vec::new();
        let result = runner
            .run_turn(
                &TurnRequest::new("prompt", dir.path()),
                &adapter,
                &mut |chunk| chunks.push(chunk.to_string()),
                &stop,
            )
            .expect("turn should run");

        assert_eq!(result.stop_reason, TurnStopReason::Completed);
        assert!(result.success());
        assert!(result.response.contains("line one"));
        assert!(result.response.contains("line two"));
        assert!(chunks.iter().any(|chunk| chunk.contains("line one")));
    }

    #[test]
    fn run_turn_reports_failed_for_non_zero_exit() {
        let dir = TempDir::new().expect("temp dir");
        let runner = TurnRunner::default();
        let adapter = FakeAdapter::new("false", &[]);
        let stop = AtomicBool::new(false);

        let result = runner
            .run_turn(
                &TurnRequest::new("prompt", dir.path()),
                &adapter,
                &mut |_| {},
                &stop,
            )
            .expect("turn should run");

        assert_eq!(result.stop_reason, TurnStopReason::Failed);
        assert!(!result.success());
    }

    #[test]
    fn pre_set_stop_flag_yields_stopped_with_no_chunks() {
        let dir = TempDir::new().expect("temp dir");
        let runner = TurnRunner::default();
        let adapter = FakeAdapter::new("printf", &["should never be seen\\n"]);
        let stop = AtomicBool::new(true);

        let mut chunks: Vec<String> = Vec::new();
        let result = runner
            .run_turn(
                &TurnRequest::new("prompt", dir.path()),
                &adapter,
                &mut |chunk| chunks.push(chunk.to_string()),
                &stop,
            )
            .expect("turn should run");

        assert_eq!(result.stop_reason, TurnStopReason::Stopped);
        assert!(chunks.is_empty(), "no chunk may be delivered after stop");
    }

    #[test]
    fn deadline_kills_long_running_turn() {
        let dir = TempDir::new().expect("temp dir");
        let runner = TurnRunner::default();
        let adapter = FakeAdapter::new("sleep", &["30"]);
        let stop = AtomicBool::new(false);

        let mut request = TurnRequest::new("prompt", dir.path());
        request.timeout_secs = 1;

        let result = runner
            .run_turn(&request, &adapter, &mut |_| {}, &stop)
            .expect("turn should run");

        assert_eq!(result.stop_reason, TurnStopReason::Timeout);
    }
}
