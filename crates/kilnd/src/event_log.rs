//! Append-only JSONL event log: one global file plus one file per session.

use kiln_core::events::Event;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize event: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append to log file {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonlEventLog {
    pub root: PathBuf,
    pub global_file: PathBuf,
    pub session_dir: PathBuf,
}

impl JsonlEventLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let global_file = root.join("global.jsonl");
        let session_dir = root.join("sessions");
        Self {
            root,
            global_file,
            session_dir,
        }
    }

    pub fn ensure_layout(&self) -> Result<(), EventLogError> {
        fs::create_dir_all(&self.root).map_err(|source| EventLogError::CreateDir {
            path: self.root.clone(),
            source,
        })?;
        fs::create_dir_all(&self.session_dir).map_err(|source| EventLogError::CreateDir {
            path: self.session_dir.clone(),
            source,
        })?;
        Ok(())
    }

    pub fn append_global(&self, event: &Event) -> Result<(), EventLogError> {
        append_json_line(&self.global_file, event)
    }

    pub fn append_session(&self, event: &Event) -> Result<(), EventLogError> {
        if let Some(session_id) = &event.session_id {
            let file = self.session_log_path(session_id.as_ref());
            append_json_line(&file, event)?;
        }
        Ok(())
    }

    /// Append to the global log and, when the event carries a session id,
    /// to that session's log as well.
    pub fn append_both(&self, event: &Event) -> Result<(), EventLogError> {
        self.ensure_layout()?;
        self.append_global(event)?;
        self.append_session(event)?;
        Ok(())
    }

    pub fn session_log_path(&self, session_id: &str) -> PathBuf {
        self.session_dir
            .join(format!("{}.jsonl", sanitize_component(session_id)))
    }

    pub fn global_log_path(&self) -> &Path {
        self.global_file.as_path()
    }
}

fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn append_json_line(path: &Path, event: &Event) -> Result<(), EventLogError> {
    let line =
        serde_json::to_string(event).map_err(|source| EventLogError::Serialize { source })?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })?;

    file.write_all(line.as_bytes())
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })?;
    file.write_all(b"\n")
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::events::{EventId, EventKind};
    use kiln_core::types::SessionId;
    use std::fs;
    use tempfile::TempDir;

    fn event(id: &str, session_id: Option<&str>) -> Event {
        Event::now(
            EventId(id.to_string()),
            session_id.map(SessionId::new),
            EventKind::PlanApproved,
        )
    }

    #[test]
    fn append_both_writes_global_and_session_files() {
        let dir = TempDir::new().expect("temp dir");
        let log = JsonlEventLog::new(dir.path().join("events"));

        log.append_both(&event("E1", Some("s-eng-42")))
            .expect("append");
        log.append_both(&event("E2", Some("s-eng-42")))
            .expect("append");

        let global = fs::read_to_string(log.global_log_path()).expect("read global");
        assert_eq!(global.lines().count(), 2);

        let session =
            fs::read_to_string(log.session_log_path("s-eng-42")).expect("read session log");
        assert_eq!(session.lines().count(), 2);
        assert!(session.contains("plan_approved"));
    }

    #[test]
    fn events_without_session_id_only_hit_the_global_log() {
        let dir = TempDir::new().expect("temp dir");
        let log = JsonlEventLog::new(dir.path().join("events"));

        log.append_both(&event("E1", None)).expect("append");

        assert!(log.global_log_path().exists());
        let entries = fs::read_dir(&log.session_dir)
            .expect("read session dir")
            .count();
        assert_eq!(entries, 0);
    }

    #[test]
    fn session_log_path_sanitizes_separator_characters() {
        let log = JsonlEventLog::new("/tmp/events");
        let path = log.session_log_path("s/etc:passwd");
        assert_eq!(path.parent(), Some(log.session_dir.as_path()));
        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some("s_etc_passwd.jsonl")
        );
    }
}
