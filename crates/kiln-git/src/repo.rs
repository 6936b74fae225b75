//! Repository verification and branch queries.

use std::path::{Path, PathBuf};

use crate::command::{GitOutput, GitRunner};
use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    /// Canonical toplevel as reported by git, never a caller-supplied path.
    pub root: PathBuf,
}

/// Check whether `path` lies inside a git work tree. A non-zero exit from
/// `rev-parse` means "no"; anything else (missing binary, bad path) is a
/// real error and propagates.
pub fn is_repo(path: &Path, git: &GitRunner) -> Result<bool, GitError> {
    match git.run(path, ["rev-parse", "--is-inside-work-tree"]) {
        Ok(output) => Ok(output.stdout.trim() == "true"),
        Err(GitError::Exit { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}

pub fn discover_repo(start_path: &Path, git: &GitRunner) -> Result<RepoHandle, GitError> {
    if !is_repo(start_path, git)? {
        return Err(GitError::NotARepository {
            path: start_path.to_path_buf(),
        });
    }

    let toplevel = git.run(start_path, ["rev-parse", "--show-toplevel"])?;
    Ok(RepoHandle {
        root: PathBuf::from(toplevel.stdout.trim()),
    })
}

pub fn current_branch(repo: &RepoHandle, git: &GitRunner) -> Result<String, GitError> {
    let output = git.run(&repo.root, ["rev-parse", "--abbrev-ref", "HEAD"])?;
    Ok(output.stdout.trim().to_string())
}

pub fn local_branches(repo: &RepoHandle, git: &GitRunner) -> Result<Vec<String>, GitError> {
    let output = git.run(
        &repo.root,
        ["for-each-ref", "--format=%(refname:short)", "refs/heads"],
    )?;
    Ok(branch_lines(&output))
}

pub fn remote_branches(repo: &RepoHandle, git: &GitRunner) -> Result<Vec<String>, GitError> {
    let output = git.run(
        &repo.root,
        ["for-each-ref", "--format=%(refname:short)", "refs/remotes"],
    )?;
    // "origin/feature-x" -> "feature-x"; skip symbolic HEAD entries.
    Ok(branch_lines(&output)
        .into_iter()
        .filter_map(|name| {
            name.split_once('/')
                .map(|(_, branch)| branch.to_string())
                .filter(|branch| branch != "HEAD")
        })
        .collect())
}

/// True when `branch` exists locally or on any remote.
pub fn branch_exists(repo: &RepoHandle, git: &GitRunner, branch: &str) -> Result<bool, GitError> {
    if local_branches(repo, git)?.iter().any(|name| name == branch) {
        return Ok(true);
    }
    Ok(remote_branches(repo, git)?.iter().any(|name| name == branch))
}

/// Plain `git fetch`. Callers treat failure as a warning, not fatal.
pub fn fetch(repo: &RepoHandle, git: &GitRunner) -> Result<(), GitError> {
    git.run(&repo.root, ["fetch"])?;
    Ok(())
}

pub fn has_uncommitted_changes(repo: &RepoHandle, git: &GitRunner) -> Result<bool, GitError> {
    let output = git.run(&repo.root, ["status", "--porcelain"])?;
    Ok(!output.stdout.trim().is_empty())
}

fn branch_lines(output: &GitOutput) -> Vec<String> {
    output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
