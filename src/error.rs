use thiserror::Error;

/// Typed errors for the boundaries that callers need to match on.
/// Everywhere else in the crate propagates via `anyhow::Result`.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("tool invocation failed: {0}")]
    ToolFailure(String),

    #[error("llm returned an unparsable structured response: {0}")]
    LlmStructural(String),

    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        let e = AgentError::Config("missing REDIS_URL".to_string());
        assert_eq!(e.to_string(), "configuration error: missing REDIS_URL");
    }

    #[test]
    fn store_error_wraps_redis_error() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "boom"));
        let e: AgentError = redis_err.into();
        assert!(matches!(e, AgentError::Store(_)));
    }
}
