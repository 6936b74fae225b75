//! Persisted diff snapshots: one `<session-id>.diff` file per hand-off,
//! capturing the worktree against its merge base for later inspection.

use std::fs;
use std::path::{Path, PathBuf};

use crate::command::GitRunner;
use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedDiff {
    pub path: PathBuf,
    pub diff_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffStore {
    root: PathBuf,
}

impl DiffStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Diff `worktree_path` against the merge base of HEAD and `base_ref`
    /// (HEAD itself when no base is given) and persist the raw text.
    pub fn save(
        &self,
        git: &GitRunner,
        worktree_path: &Path,
        session_id: &str,
        base_ref: Option<&str>,
    ) -> Result<SavedDiff, GitError> {
        let against = match base_ref {
            Some(base) => {
                let output = git.run(worktree_path, ["merge-base", "HEAD", base])?;
                output.stdout.trim().to_string()
            }
            None => "HEAD".to_string(),
        };

        let diff = git.run(worktree_path, ["diff", against.as_str()])?;

        fs::create_dir_all(&self.root).map_err(|source| GitError::Io {
            context: format!("create snapshot directory {}", self.root.display()),
            source,
        })?;

        let path = self.snapshot_path(session_id);
        fs::write(&path, &diff.stdout).map_err(|source| GitError::Io {
            context: format!("write diff snapshot {}", path.display()),
            source,
        })?;

        Ok(SavedDiff {
            path,
            diff_len: diff.stdout.len(),
        })
    }

    pub fn read(&self, session_id: &str) -> Result<String, GitError> {
        let path = self.snapshot_path(session_id);
        fs::read_to_string(&path).map_err(|source| GitError::Io {
            context: format!("read diff snapshot {}", path.display()),
            source,
        })
    }

    pub fn delete(&self, session_id: &str) -> Result<(), GitError> {
        let path = self.snapshot_path(session_id);
        fs::remove_file(&path).map_err(|source| GitError::Io {
            context: format!("delete diff snapshot {}", path.display()),
            source,
        })
    }

    pub fn snapshot_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{}.diff", sanitize_id(session_id)))
    }
}

/// Keep snapshot filenames shell- and filesystem-safe.
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
