//! Engine configuration.
//!
//! Every field has a default, so an empty TOML file (or none at all) yields
//! a working setup against a sandbox on `127.0.0.1:5555`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;
use crate::rules::universal::DEFAULT_LENGTH_CAP;
use crate::validation::SandboxClientConfig;

/// What a rule error does to the evaluation it happened in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleFailurePolicy {
    /// Abort the call with [`crate::domain::EngineError::Rule`].
    #[default]
    Abort,
    /// Score the failed rule at the floor, record the failure and go on.
    Isolate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sandbox: SandboxClientConfig,
    /// Descriptor families whose answers are not code and skip the sandbox.
    pub non_code_families: Vec<String>,
    /// Token count above which `length_reward` starts penalising.
    pub length_cap: usize,
    /// Evaluations in flight at once in [`crate::engine::RewardEngine::score_batch`].
    pub concurrency: usize,
    pub failure_policy: RuleFailurePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxClientConfig::default(),
            non_code_families: vec!["memory".to_string()],
            length_cap: DEFAULT_LENGTH_CAP,
            concurrency: 16,
            failure_policy: RuleFailurePolicy::Abort,
        }
    }
}

impl EngineConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.sandbox.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("sandbox.endpoint is empty".into()));
        }
        if self.non_code_families.iter().any(|f| f.is_empty()) {
            return Err(ConfigError::Invalid(
                "non_code_families entries must be non-empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.non_code_families, vec!["memory".to_string()]);
        assert_eq!(config.length_cap, 1000);
        assert_eq!(config.failure_policy, RuleFailurePolicy::Abort);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "concurrency = 4\nfailure_policy = \"isolate\"\n\n[sandbox]\nendpoint = \"http://sandbox:8080\""
        )
        .expect("write");
        let config = EngineConfig::load(file.path()).expect("loads");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.failure_policy, RuleFailurePolicy::Isolate);
        assert_eq!(config.sandbox.endpoint, "http://sandbox:8080");
        assert_eq!(config.sandbox.request_timeout_ms, 5_000);
        assert_eq!(config.length_cap, 1000);
    }

    #[test]
    fn test_load_errors() {
        let missing = EngineConfig::load(Path::new("/nonexistent/reward.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "concurrency = \"many\"").expect("write");
        let bad = EngineConfig::load(file.path()).unwrap_err();
        assert!(matches!(bad, ConfigError::Parse { .. }));

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "concurrency = 0").expect("write");
        let invalid = EngineConfig::load(file.path()).unwrap_err();
        assert!(matches!(invalid, ConfigError::Invalid(_)));
    }
}
