//! Sandbox service errors.
//!
//! A candidate program failing, crashing or timing out is not an error: it
//! is reported in the response body. These variants cover bad requests and
//! failures of the service itself.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to spawn interpreter {interpreter:?}: {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported language {0:?}")]
    UnsupportedLanguage(String),

    #[error("invalid run budget {0}")]
    InvalidBudget(f64),

    #[error("file path {0:?} escapes the scratch directory")]
    InvalidPath(String),

    #[error("file {name:?} is not valid base64: {source}")]
    Decode {
        name: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("sandbox is shutting down")]
    ShuttingDown,

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl SandboxError {
    /// Whether the request itself was at fault.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            SandboxError::UnsupportedLanguage(_)
                | SandboxError::InvalidBudget(_)
                | SandboxError::InvalidPath(_)
                | SandboxError::Decode { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_classification() {
        assert!(SandboxError::InvalidPath("../x".into()).is_bad_request());
        assert!(SandboxError::UnsupportedLanguage("cobol".into()).is_bad_request());
        assert!(!SandboxError::ShuttingDown.is_bad_request());
        let io = SandboxError::from(std::io::Error::other("disk full"));
        assert!(!io.is_bad_request());
        assert!(io.to_string().contains("disk full"));
    }
}
