use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kiln_core::config::{load_config, KilnConfig};
use kiln_core::types::Ticket;
use kiln_git::snapshot::DiffStore;
use kilnd::service::{normalize_approval, ApprovalDecision, Orchestrator, PlanningOutcome};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Parser)]
#[command(name = "kiln", about = "Ticket-to-worktree task orchestrator")]
struct Cli {
    /// Path to the kiln config file; defaults are used when it is absent.
    #[arg(long, default_value = "kiln.toml")]
    config: PathBuf,
    /// Directory holding event logs and diff snapshots.
    #[arg(long, default_value = ".kiln")]
    state_dir: PathBuf,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Plan and run a ticket against a repository.
    Run {
        /// TOML file describing the ticket.
        #[arg(long)]
        ticket: PathBuf,
        /// Repository to work in.
        #[arg(long)]
        repo: PathBuf,
        /// Extra context handed to the first planning round.
        #[arg(long)]
        context: Option<String>,
    },
    /// Print the diff snapshot saved for a finished session.
    Diff { session_id: String },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("kiln: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_cli_config(&cli.config)?;

    match cli.command {
        CliCommand::Run {
            ticket,
            repo,
            context,
        } => run_ticket(config, &cli.state_dir, &ticket, &repo, context.as_deref()),
        CliCommand::Diff { session_id } => print_diff(&config, &cli.state_dir, &session_id),
    }
}

fn load_cli_config(path: &Path) -> anyhow::Result<KilnConfig> {
    if path.exists() {
        load_config(path).with_context(|| format!("loading config from {}", path.display()))
    } else {
        Ok(KilnConfig::default())
    }
}

fn run_ticket(
    config: KilnConfig,
    state_dir: &Path,
    ticket_path: &Path,
    repo: &Path,
    context: Option<&str>,
) -> anyhow::Result<()> {
    let ticket = read_ticket(ticket_path)?;
    let orchestrator = Orchestrator::new(config, state_dir);

    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted))
        .context("registering SIGINT handler")?;

    let id = orchestrator.start_session(ticket)?;
    println!("session {id} created");

    let worktree_path = orchestrator
        .select_repo(&id, repo)
        .with_context(|| format!("verifying repository at {}", repo.display()))?;
    println!("worktree ready at {}", worktree_path.display());

    if let Some(context) = context {
        orchestrator.submit_context(&id, context)?;
    }

    let stdin = io::stdin();
    loop {
        if interrupted.load(Ordering::SeqCst) {
            orchestrator.stop_session(&id)?;
            println!("session stopped");
            return Ok(());
        }

        println!("planning...");
        match orchestrator.run_planning(&id)? {
            PlanningOutcome::NeedsAnswers { questions } => {
                println!("\nthe assistant has questions:");
                let mut answers = Vec::new();
                for question in &questions {
                    println!("  {}. {}", question.id, question.question);
                    let answer = prompt_line(&stdin, "  answer> ")?;
                    answers.push((question.id, answer));
                }
                orchestrator.submit_answers(&id, &answers)?;
            }
            PlanningOutcome::ReadyForReview {
                steps,
                used_fallback,
            } => {
                println!("\nproposed plan{}:", if used_fallback { " (fallback)" } else { "" });
                for step in &steps {
                    println!("  {}. {}", step.id, step.description);
                    if !step.files.is_empty() {
                        println!("     files: {}", step.files.join(", "));
                    }
                }
                let reply = prompt_line(&stdin, "approve? [Enter=yes, n=no, text=more context] ")?;
                match normalize_approval(&reply) {
                    ApprovalDecision::Approve => break,
                    ApprovalDecision::Reject => {
                        let feedback = prompt_line(&stdin, "feedback> ")?;
                        orchestrator.reject_plan(&id, &feedback)?;
                    }
                    ApprovalDecision::Context(text) => {
                        orchestrator.submit_context(&id, &text)?;
                    }
                }
            }
        }
    }

    let path = orchestrator.approve_plan(&id)?;
    println!("plan approved; implementation running in {}", path.display());
    stream_run(&orchestrator, &path, &interrupted)
}

/// Echo implementation output until the run reaches a terminal status.
/// Ctrl-C stops the run; closing the terminal would leave it going.
fn stream_run(
    orchestrator: &Orchestrator,
    path: &Path,
    interrupted: &AtomicBool,
) -> anyhow::Result<()> {
    let mut printed = 0usize;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            orchestrator.stop_worktree(path)?;
            println!("\nrun stopped");
            return Ok(());
        }

        let Some(session) = orchestrator.worktree(path) else {
            bail!("worktree session at {} disappeared", path.display());
        };

        for chunk in &session.output[printed.min(session.output.len())..] {
            println!("{chunk}");
        }
        printed = session.output.len();

        if session.status.is_terminal() {
            println!("\nrun finished: {}", session.status);
            if let Some(diff_path) = &session.diff_path {
                println!("diff snapshot: {}", diff_path.display());
            }
            return Ok(());
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn print_diff(config: &KilnConfig, state_dir: &Path, session_id: &str) -> anyhow::Result<()> {
    let store = DiffStore::new(state_dir.join(&config.log.snapshot_dir));
    let diff = store
        .read(session_id)
        .with_context(|| format!("no diff snapshot for session {session_id}"))?;
    print!("{diff}");
    Ok(())
}

fn read_ticket(path: &Path) -> anyhow::Result<Ticket> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("reading ticket file {}", path.display()))?;
    toml::from_str(&body).with_context(|| format!("parsing ticket file {}", path.display()))
}

fn prompt_line(stdin: &io::Stdin, prompt: &str) -> anyhow::Result<String> {
    print!("{prompt}");
    io::stdout().flush().context("flushing prompt")?;
    let mut line = String::new();
    stdin
        .lock()
        .read_line(&mut line)
        .context("reading from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::read_ticket;
    use kiln_core::types::TicketId;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn read_ticket_parses_toml_with_optional_fields_defaulted() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("ticket.toml");
        fs::write(
            &path,
            r#"
id = "t-1"
identifier = "ENG-42"
title = "Add Login Button"
description = "Users need a login button."
"#,
        )
        .expect("write ticket");

        let ticket = read_ticket(&path).expect("parse ticket");
        assert_eq!(ticket.id, TicketId::new("t-1"));
        assert_eq!(ticket.identifier, "ENG-42");
        assert!(ticket.labels.is_empty());
    }

    #[test]
    fn read_ticket_rejects_missing_required_fields() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("ticket.toml");
        fs::write(&path, "identifier = \"ENG-42\"\n").expect("write ticket");

        assert!(read_ticket(&path).is_err());
    }
}
