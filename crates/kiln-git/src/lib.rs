pub mod command;
pub mod error;
pub mod repo;
pub mod snapshot;
pub mod worktree;

pub use command::{GitOutput, GitRunner};
pub use error::GitError;
pub use repo::{
    branch_exists, current_branch, discover_repo, fetch, has_uncommitted_changes, is_repo,
    local_branches, remote_branches, RepoHandle,
};
pub use snapshot::{DiffStore, SavedDiff};
pub use worktree::{
    ListedWorktree, Provisioned, WorktreeProvisioner, DEFAULT_WORKTREE_ROOT,
};
