//! Configuration types for the kiln orchestrator.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config at {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to create config parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which assistant CLI drives planning and implementation turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssistantKind {
    #[default]
    Claude,
    Codex,
}

impl AssistantKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssistantKind::Claude => "claude",
            AssistantKind::Codex => "codex",
        }
    }
}

impl std::fmt::Display for AssistantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
    /// git binary to invoke.
    #[serde(default = "default_git_binary")]
    pub binary: PathBuf,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
        }
    }
}

fn default_git_binary() -> PathBuf {
    PathBuf::from("git")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AssistantConfig {
    #[serde(default)]
    pub kind: AssistantKind,
    /// Override the assistant executable; defaults to the kind's name.
    #[serde(default)]
    pub executable: Option<String>,
    /// Deadline for one assistant turn in seconds; 0 disables the deadline.
    #[serde(default)]
    pub turn_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeConfig {
    /// Worktree root, relative to the selected repository.
    #[serde(default = "default_worktree_root")]
    pub root: PathBuf,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            root: default_worktree_root(),
        }
    }
}

fn default_worktree_root() -> PathBuf {
    PathBuf::from(".kiln/wt")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Event log root, relative to the selected repository.
    #[serde(default = "default_log_root")]
    pub root: PathBuf,
    /// Column count for word-wrapping session log entries.
    #[serde(default = "default_wrap_columns")]
    pub wrap_columns: usize,
    /// Directory holding persisted diff snapshots.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            root: default_log_root(),
            wrap_columns: default_wrap_columns(),
            snapshot_dir: default_snapshot_dir(),
        }
    }
}

fn default_log_root() -> PathBuf {
    PathBuf::from(".kiln/events")
}

fn default_wrap_columns() -> usize {
    80
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from(".kiln/diffs")
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KilnConfig {
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub worktree: WorktreeConfig,
    #[serde(default)]
    pub log: LogConfig,
}

pub fn parse_config(contents: &str) -> Result<KilnConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<KilnConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

pub fn save_config(path: impl AsRef<Path>, config: &KilnConfig) -> Result<(), ConfigError> {
    let path_ref = path.as_ref();
    let body = toml::to_string_pretty(config).map_err(|source| ConfigError::Serialize {
        path: path_ref.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path_ref.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    fs::write(path_ref, body).map_err(|source| ConfigError::Write {
        path: path_ref.to_path_buf(),
        source,
    })
}
