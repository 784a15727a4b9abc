//! Error types for Shipgate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid pattern '{pattern}' for target '{target}': {message}")]
    Classification {
        target: String,
        pattern: String,
        message: String,
    },

    #[error("build failed: {0}")]
    Build(String),

    #[error("push failed: {0}")]
    Push(String),

    #[error("pull failed: {0}")]
    Pull(String),

    #[error("tag failed: {0}")]
    Tag(String),

    #[error("credentials: {0}")]
    Credentials(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error must abort the run before any target executes.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Classification { .. } | Error::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_pre_run_errors_are_fatal() {
        let classification = Error::Classification {
            target: "export".to_string(),
            pattern: "export/[a-".to_string(),
            message: "unclosed character class".to_string(),
        };

        assert!(classification.is_fatal());
        assert!(Error::InvalidInput("unknown target 'x'".to_string()).is_fatal());
        assert!(!Error::Build("exit 1".to_string()).is_fatal());
        assert!(!Error::Push("denied".to_string()).is_fatal());
        assert!(!Error::Pull("not found".to_string()).is_fatal());
    }
}
