#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("invalid turn request: {message}")]
    InvalidRequest { message: String },
    #[error("failed to set up pty: {message}")]
    PtySetup { message: String },
    #[error("failed to spawn assistant process: {message}")]
    Spawn { message: String },
    #[error("assistant runtime failure: {message}")]
    Runtime { message: String },
}

#[cfg(test)]
mod tests {
    use super::AgentError;

    #[test]
    fn variants_render_their_context() {
        let err = AgentError::InvalidRequest {
            message: "prompt must not be empty".to_string(),
        };
        assert!(err.to_string().contains("invalid turn request"));

        let err = AgentError::Spawn {
            message: "no such file".to_string(),
        };
        assert!(err.to_string().contains("failed to spawn assistant process"));
    }
}
