//! Worktree provisioning: one isolated, branch-checked-out working copy
//! per unit of work, created idempotently.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::command::GitRunner;
use crate::error::GitError;
use crate::repo::{branch_exists, fetch, RepoHandle};

pub const DEFAULT_WORKTREE_ROOT: &str = ".kiln/wt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedWorktree {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head: Option<String>,
}

/// Result of a provisioning attempt. `path` is always the canonical
/// absolute path reported by git, never a caller-constructed join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub path: PathBuf,
    pub reused: bool,
    /// Non-fatal degradations, e.g. a failed fetch.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeProvisioner {
    git: GitRunner,
    relative_root: PathBuf,
}

impl Default for WorktreeProvisioner {
    fn default() -> Self {
        Self {
            git: GitRunner::default(),
            relative_root: PathBuf::from(DEFAULT_WORKTREE_ROOT),
        }
    }
}

impl WorktreeProvisioner {
    pub fn new(git: GitRunner, relative_root: impl Into<PathBuf>) -> Self {
        Self {
            git,
            relative_root: relative_root.into(),
        }
    }

    /// Create or locate the worktree for `branch`.
    ///
    /// Fetches remote refs best-effort first, then short-circuits to the
    /// existing worktree when one already maps to the branch. Otherwise a
    /// new worktree is added: with `-b` only when the branch exists neither
    /// locally nor on a remote. A failed add never leaves a partial
    /// worktree registered.
    pub fn provision(&self, repo: &RepoHandle, branch: &str) -> Result<Provisioned, GitError> {
        let mut warnings = Vec::new();
        if let Err(err) = fetch(repo, &self.git) {
            warnings.push(format!("fetch failed, continuing with local refs: {err}"));
        }

        if let Some(existing) = self.find_by_branch(repo, branch)? {
            return Ok(Provisioned {
                path: existing.path,
                reused: true,
                warnings,
            });
        }

        let root = repo.root.join(&self.relative_root);
        fs::create_dir_all(&root).map_err(|source| GitError::Io {
            context: format!("create worktree root {}", root.display()),
            source,
        })?;

        let candidate = root.join(branch);
        let create_branch = !branch_exists(repo, &self.git, branch)?;

        let mut args = vec![OsString::from("worktree"), OsString::from("add")];
        if create_branch {
            args.push(OsString::from("-b"));
            args.push(OsString::from(branch));
        }
        args.push(candidate.as_os_str().to_os_string());
        if !create_branch {
            args.push(OsString::from(branch));
        }

        if let Err(err) = self.git.run(&repo.root, args) {
            // Drop any half-registered state before reporting the failure.
            let _ = self.git.run(&repo.root, ["worktree", "prune"]);
            return Err(err);
        }

        let listed = self.find_by_branch(repo, branch)?.ok_or(GitError::Parse {
            context: format!("worktree for branch '{branch}' missing after add"),
        })?;

        Ok(Provisioned {
            path: listed.path,
            reused: false,
            warnings,
        })
    }

    pub fn list(&self, repo: &RepoHandle) -> Result<Vec<ListedWorktree>, GitError> {
        let output = self.git.run(&repo.root, ["worktree", "list", "--porcelain"])?;
        parse_worktree_list(&output.stdout)
    }

    pub fn remove(&self, repo: &RepoHandle, path: &Path, force: bool) -> Result<(), GitError> {
        let mut args = vec![OsString::from("worktree"), OsString::from("remove")];
        if force {
            args.push(OsString::from("--force"));
        }
        args.push(path.as_os_str().to_os_string());
        self.git.run(&repo.root, args)?;
        Ok(())
    }

    fn find_by_branch(
        &self,
        repo: &RepoHandle,
        branch: &str,
    ) -> Result<Option<ListedWorktree>, GitError> {
        Ok(self
            .list(repo)?
            .into_iter()
            .find(|wt| wt.branch.as_deref() == Some(branch)))
    }
}

fn parse_worktree_list(raw: &str) -> Result<Vec<ListedWorktree>, GitError> {
    let mut listed = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut branch: Option<String> = None;
    let mut head: Option<String> = None;

    for line in raw.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if let Some(done) = path.take() {
                listed.push(ListedWorktree {
                    path: done,
                    branch: branch.take(),
                    head: head.take(),
                });
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(rest.trim()));
        } else if let Some(rest) = line.strip_prefix("branch ") {
            branch = Some(rest.trim().trim_start_matches("refs/heads/").to_string());
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            head = Some(rest.trim().to_string());
        }
        // "bare", "detached" and future attributes are ignored.
    }

    if listed.is_empty() && !raw.trim().is_empty() {
        return Err(GitError::Parse {
            context: "unable to parse git worktree list output".to_string(),
        });
    }

    Ok(listed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::test_support::{init_repo, run_git};
    use crate::repo::discover_repo;
    use tempfile::TempDir;

    fn provisioner() -> WorktreeProvisioner {
        WorktreeProvisioner::default()
    }

    fn setup() -> (TempDir, RepoHandle) {
        let dir = TempDir::new().expect("temp dir");
        let root = init_repo(dir.path());
        let repo = discover_repo(&root, &GitRunner::default()).expect("discover repo");
        (dir, repo)
    }

    #[test]
    fn parse_worktree_list_extracts_path_branch_and_head() {
        let raw = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\n\
                   worktree /repo/.kiln/wt/eng-1\nHEAD def456\nbranch refs/heads/eng-1\n\n";

        let listed = parse_worktree_list(raw).expect("parse list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].path, PathBuf::from("/repo"));
        assert_eq!(listed[0].branch.as_deref(), Some("main"));
        assert_eq!(listed[1].head.as_deref(), Some("def456"));
        assert_eq!(listed[1].branch.as_deref(), Some("eng-1"));
    }

    #[test]
    fn parse_worktree_list_rejects_garbage() {
        let err = parse_worktree_list("nonsense without keys\n").expect_err("should fail");
        assert!(matches!(err, GitError::Parse { .. }));
    }

    #[test]
    fn provision_creates_worktree_and_new_branch() {
        let (_dir, repo) = setup();
        let wt = provisioner();

        let provisioned = wt.provision(&repo, "eng-42-add-login-button").expect("provision");
        assert!(!provisioned.reused);
        assert!(provisioned.path.is_absolute());
        assert!(provisioned.path.join("README.md").exists());

        let listed = wt.list(&repo).expect("list");
        assert!(listed
            .iter()
            .any(|w| w.branch.as_deref() == Some("eng-42-add-login-button")));
    }

    #[test]
    fn provision_is_idempotent_for_same_branch() {
        let (_dir, repo) = setup();
        let wt = provisioner();

        let first = wt.provision(&repo, "eng-7-fix-crash").expect("first provision");
        let second = wt.provision(&repo, "eng-7-fix-crash").expect("second provision");

        assert_eq!(first.path, second.path);
        assert!(!first.reused);
        assert!(second.reused);

        let count = wt
            .list(&repo)
            .expect("list")
            .iter()
            .filter(|w| w.branch.as_deref() == Some("eng-7-fix-crash"))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn provision_checks_out_existing_branch_without_creating_a_new_one() {
        let (_dir, repo) = setup();
        run_git(&repo.root, &["branch", "pre-existing"]);

        let wt = provisioner();
        let provisioned = wt.provision(&repo, "pre-existing").expect("provision");
        assert!(!provisioned.reused);

        // Still exactly one local branch of that name.
        let heads = crate::repo::local_branches(&repo, &GitRunner::default()).expect("branches");
        assert_eq!(heads.iter().filter(|b| *b == "pre-existing").count(), 1);
    }

    #[test]
    fn provision_failure_leaves_no_worktree_registered() {
        let (_dir, repo) = setup();
        let wt = provisioner();

        // "main" is already checked out in the primary worktree; git refuses
        // to check it out a second time.
        let err = wt.provision(&repo, "main").expect_err("checked-out branch must fail");
        assert!(matches!(err, GitError::Exit { .. }));

        let listed = wt.list(&repo).expect("list");
        assert_eq!(listed.len(), 1, "only the primary worktree remains");
    }

    #[test]
    fn provision_reports_fetch_failure_as_warning_only() {
        let (_dir, repo) = setup();
        // No remote configured: fetch fails, provisioning continues.
        let wt = provisioner();

        let provisioned = wt.provision(&repo, "eng-9-offline").expect("provision");
        assert!(!provisioned.warnings.is_empty());
        assert!(provisioned.warnings[0].contains("fetch failed"));
    }

    #[test]
    fn remove_deregisters_the_worktree() {
        let (_dir, repo) = setup();
        let wt = provisioner();

        let provisioned = wt.provision(&repo, "to-remove").expect("provision");
        wt.remove(&repo, &provisioned.path, true).expect("remove");

        let listed = wt.list(&repo).expect("list");
        assert!(!listed
            .iter()
            .any(|w| w.branch.as_deref() == Some("to-remove")));
    }
}
