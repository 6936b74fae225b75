use std::path::PathBuf;
use std::string::FromUtf8Error;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git command failed to start ({command}): {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git command returned non-zero exit ({command}) status={status:?}")]
    Exit {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("git command output was not valid UTF-8 ({command}, {stream}): {source}")]
    NonUtf8 {
        command: String,
        stream: &'static str,
        #[source]
        source: FromUtf8Error,
    },
    #[error("path is not inside a git repository: {path}")]
    NotARepository { path: PathBuf },
    #[error("invalid git output: {context}")]
    Parse { context: String },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::GitError;
    use std::error::Error;
    use std::path::PathBuf;

    #[test]
    fn spawn_variant_includes_command_and_source() {
        let err = GitError::Spawn {
            command: "git fetch".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing binary"),
        };

        let rendered = err.to_string();
        assert!(rendered.contains("git command failed to start (git fetch)"));
        assert!(err.source().is_some());
    }

    #[test]
    fn exit_variant_mentions_command_and_status() {
        let err = GitError::Exit {
            command: "git worktree add x".to_string(),
            status: Some(128),
            stdout: String::new(),
            stderr: "fatal: branch exists".to_string(),
        };

        let rendered = err.to_string();
        assert!(rendered.contains("git worktree add x"));
        assert!(rendered.contains("status=Some(128)"));
    }

    #[test]
    fn repository_and_parse_variants_include_context() {
        let repo_err = GitError::NotARepository {
            path: PathBuf::from("/tmp/plain"),
        };
        assert!(repo_err
            .to_string()
            .contains("path is not inside a git repository: /tmp/plain"));

        let parse_err = GitError::Parse {
            context: "expected worktree line".to_string(),
        };
        assert!(parse_err
            .to_string()
            .contains("invalid git output: expected worktree line"));
    }
}
