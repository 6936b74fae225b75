//! Plan protocol codec. The planning prompt instructs the assistant to
//! answer with four fenced sections:
//!
//! ```text
//! ---ANALYSIS---
//! ...free text...
//! ---QUESTIONS---
//! 1. First question?
//! 2. Second question?
//! ---PLAN---
//! STEP 1: Do the thing
//! FILES: src/a.rs, src/b.rs
//! ---END---
//! ```
//!
//! Parsing is deliberately forgiving: a malformed or missing PLAN section
//! degrades to a generic fallback plan instead of failing the session.

use kiln_core::types::{PlanQuestion, PlanStep, Ticket};

pub const ANALYSIS_MARKER: &str = "---ANALYSIS---";
pub const QUESTIONS_MARKER: &str = "---QUESTIONS---";
pub const PLAN_MARKER: &str = "---PLAN---";
pub const END_MARKER: &str = "---END---";

/// Sentinel the assistant writes in QUESTIONS when it has none.
const NO_QUESTIONS_SENTINEL: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPlan {
    pub analysis: String,
    pub questions: Vec<PlanQuestion>,
    pub steps: Vec<PlanStep>,
    /// True when the PLAN section was missing or unparsable and the
    /// generic fallback plan was substituted.
    pub used_fallback: bool,
}

/// Parse a full planning response. Never fails: missing sections come back
/// empty, and an empty or garbled plan is replaced by [`fallback_plan`].
pub fn parse_plan_response(text: &str) -> ParsedPlan {
    let sections = extract_sections(text);

    let analysis = sections.analysis.unwrap_or_default();
    let questions = sections
        .questions
        .map(|body| parse_questions(&body))
        .unwrap_or_default();
    let mut steps = sections
        .plan
        .map(|body| parse_steps(&body))
        .unwrap_or_default();

    let used_fallback = steps.is_empty();
    if used_fallback {
        steps = fallback_plan();
    }

    ParsedPlan {
        analysis,
        questions,
        steps,
        used_fallback,
    }
}

/// Generic plan used when the assistant's PLAN section cannot be parsed.
pub fn fallback_plan() -> Vec<PlanStep> {
    [
        "Review the ticket and explore the relevant code",
        "Implement the core change described by the ticket",
        "Update related modules and call sites",
        "Add or update tests covering the change",
        "Verify the change builds and existing tests pass",
    ]
    .iter()
    .enumerate()
    .map(|(index, description)| PlanStep::new(index as u32 + 1, *description))
    .collect()
}

struct Sections {
    analysis: Option<String>,
    questions: Option<String>,
    plan: Option<String>,
}

fn extract_sections(text: &str) -> Sections {
    let mut markers: Vec<(usize, &str)> = [ANALYSIS_MARKER, QUESTIONS_MARKER, PLAN_MARKER, END_MARKER]
        .iter()
        .filter_map(|marker| text.find(marker).map(|pos| (pos, *marker)))
        .collect();
    markers.sort_by_key(|(pos, _)| *pos);

    let section_body = |marker: &str| -> Option<String> {
        let index = markers.iter().position(|(_, m)| *m == marker)?;
        let (pos, _) = markers[index];
        let start = pos + marker.len();
        let end = markers
            .get(index + 1)
            .map(|(next_pos, _)| *next_pos)
            .unwrap_or(text.len());
        Some(text[start..end].trim().to_string())
    };

    Sections {
        analysis: section_body(ANALYSIS_MARKER),
        questions: section_body(QUESTIONS_MARKER),
        plan: section_body(PLAN_MARKER),
    }
}

/// Parse the QUESTIONS section into numbered questions. "None"
/// (case-insensitive) or an empty body means no questions. A numbered line
/// only starts a new question when its number exceeds the last top-level
/// number, so inner lists inside a question stay attached to it.
fn parse_questions(body: &str) -> Vec<PlanQuestion> {
    if body.trim().is_empty() || body.trim().eq_ignore_ascii_case(NO_QUESTIONS_SENTINEL) {
        return Vec::new();
    }

    let mut questions: Vec<PlanQuestion> = Vec::new();
    let mut last_top = 0u32;

    for raw in body.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        match leading_number(line) {
            Some((number, rest)) if number > last_top => {
                last_top = number;
                questions.push(PlanQuestion::new(number, rest));
            }
            _ => {
                if let Some(current) = questions.last_mut() {
                    current.question.push(' ');
                    current.question.push_str(line);
                }
            }
        }
    }

    questions
}

/// Split a `N. text` or `N) text` line into its number and remainder.
fn leading_number(line: &str) -> Option<(u32, &str)> {
    let digits_end = line.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let rest = &line[digits_end..];
    let rest = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')'))?;
    let number = line[..digits_end].parse().ok()?;
    Some((number, rest.trim_start()))
}

fn parse_steps(body: &str) -> Vec<PlanStep> {
    let mut steps: Vec<PlanStep> = Vec::new();

    for raw in body.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((id, title)) = parse_step_header(line) {
            steps.push(PlanStep::new(id, title));
            continue;
        }

        let Some(current) = steps.last_mut() else {
            continue;
        };

        if let Some(files) = line
            .strip_prefix("FILES:")
            .or_else(|| line.strip_prefix("Files:"))
        {
            current.files = parse_files(files);
        } else {
            current.description.push(' ');
            current.description.push_str(line);
        }
    }

    steps
}

/// Parse a `STEP n: <title>` header (case-insensitive keyword).
fn parse_step_header(line: &str) -> Option<(u32, &str)> {
    let rest = if let Some(rest) = line.strip_prefix("STEP ") {
        rest
    } else if let Some(rest) = line.strip_prefix("Step ") {
        rest
    } else {
        return None;
    };

    let colon = rest.find(':')?;
    let id: u32 = rest[..colon].trim().parse().ok()?;
    Some((id, rest[colon + 1..].trim()))
}

/// Comma-separated file list; the literal `TBD` means none named yet.
fn parse_files(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("tbd") {
        return Vec::new();
    }
    raw.split(',')
        .map(str::trim)
        .filter(|file| !file.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build the planning prompt for a ticket. `additional_context` carries
/// answered questions, user-supplied context, and rejection feedback from
/// earlier rounds.
pub fn build_plan_prompt(ticket: &Ticket, additional_context: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are planning the implementation of a ticket in this repository.\n");
    prompt.push_str("Read the code as needed, but do not modify any files.\n\n");

    prompt.push_str(&format!("Ticket {}: {}\n", ticket.identifier, ticket.title));
    if !ticket.description.trim().is_empty() {
        prompt.push_str("\nDescription:\n");
        prompt.push_str(ticket.description.trim());
        prompt.push('\n');
    }
    if !ticket.labels.is_empty() {
        prompt.push_str(&format!("\nLabels: {}\n", ticket.labels.join(", ")));
    }
    for comment in &ticket.comments {
        prompt.push_str("\nComment:\n");
        prompt.push_str(comment.trim());
        prompt.push('\n');
    }
    if !additional_context.trim().is_empty() {
        prompt.push_str("\nAdditional context:\n");
        prompt.push_str(additional_context.trim());
        prompt.push('\n');
    }

    prompt.push_str("\nRespond in exactly this format:\n");
    prompt.push_str(ANALYSIS_MARKER);
    prompt.push_str("\n<your analysis of the ticket and the relevant code>\n");
    prompt.push_str(QUESTIONS_MARKER);
    prompt.push_str("\n<numbered questions you need answered, or the single word None>\n");
    prompt.push_str(PLAN_MARKER);
    prompt.push_str(
        "\nSTEP 1: <short step title>\n\
         <step details>\n\
         FILES: <comma-separated files this step touches, or TBD>\n\
         STEP 2: ...\n",
    );
    prompt.push_str(END_MARKER);
    prompt.push('\n');
    prompt
}

/// Build the implementation prompt handed to the detached run.
pub fn build_implementation_prompt(
    ticket: &Ticket,
    steps: &[PlanStep],
    additional_context: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Implement ticket {} ({}) following the approved plan below.\n",
        ticket.identifier, ticket.title
    ));
    if !ticket.description.trim().is_empty() {
        prompt.push_str("\nTicket description:\n");
        prompt.push_str(ticket.description.trim());
        prompt.push('\n');
    }

    prompt.push_str("\nApproved plan:\n");
    for step in steps {
        prompt.push_str(&format!("{}. {}\n", step.id, step.description));
        if !step.files.is_empty() {
            prompt.push_str(&format!("   Files: {}\n", step.files.join(", ")));
        }
    }

    if !additional_context.trim().is_empty() {
        prompt.push_str("\nAdditional context:\n");
        prompt.push_str(additional_context.trim());
        prompt.push('\n');
    }

    prompt.push_str(
        "\nWork through the steps in order. Commit logically grouped changes \
         as you go and make sure the project still builds when you finish.\n",
    );
    prompt
}
