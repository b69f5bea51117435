//! Error taxonomy for reward computation.
//!
//! Modeled outcomes (no answer, invalid code, inapplicable rule) are plain
//! values and never appear here. These types cover rule preconditions the
//! caller violated and engine misconfiguration.

use std::path::PathBuf;

/// Errors a single rule can raise while scoring.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("metadata field `{field}` is missing")]
    MissingMetadata { field: String },

    #[error("metadata field `{field}` is malformed: {reason}")]
    InvalidMetadata { field: String, reason: String },

    #[error("a reference answer is required")]
    MissingReference,

    #[error("no shown style rule matches task descriptor {descriptor:?}")]
    NoStyleRule { descriptor: String },
}

impl RuleError {
    pub fn missing(field: &str) -> Self {
        RuleError::MissingMetadata {
            field: field.to_string(),
        }
    }

    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        RuleError::InvalidMetadata {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Engine-level errors. All of them indicate caller or configuration
/// mistakes and are returned rather than recovered.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("task descriptor {descriptor:?} matches no registered rule")]
    UnroutableTask { descriptor: String },

    #[error("rule id registered twice: {0}")]
    DuplicateRule(String),

    #[error("rule {rule} failed: {source}")]
    Rule {
        rule: String,
        #[source]
        source: RuleError,
    },
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unroutable_task_display() {
        let err = EngineError::UnroutableTask {
            descriptor: "plain_task".to_string(),
        };
        assert!(err.to_string().contains("plain_task"));
        assert!(err.to_string().contains("no registered rule"));
    }

    #[test]
    fn test_rule_error_is_source_of_engine_error() {
        let err = EngineError::Rule {
            rule: "reward_check_function".to_string(),
            source: RuleError::missing("check_function"),
        };
        let msg = err.to_string();
        assert!(msg.contains("reward_check_function"));
        assert!(msg.contains("check_function"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_invalid_metadata_display() {
        let err = RuleError::invalid("fetched_files", "expected an object");
        assert!(err.to_string().contains("expected an object"));
    }
}
