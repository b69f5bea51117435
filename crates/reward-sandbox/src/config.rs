//! Sandbox service configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SandboxError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxServiceConfig {
    /// Listen address, `host:port`.
    pub bind: String,
    /// Interpreter binary, resolved through `PATH`.
    pub interpreter: String,
    /// Wall-clock budget for a `/message` check, in milliseconds.
    pub budget_ms: u64,
    /// Time between SIGTERM and SIGKILL on expiry, in milliseconds.
    pub grace_ms: u64,
    /// Worker processes alive at once.
    pub max_workers: usize,
    /// Bytes of stdout and stderr kept per worker; the rest is discarded.
    pub max_output_bytes: usize,
}

impl Default for SandboxServiceConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5555".to_string(),
            interpreter: "python3".to_string(),
            budget_ms: 170,
            grace_ms: 10,
            max_workers: 32,
            max_output_bytes: 1 << 20,
        }
    }
}

impl SandboxServiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SandboxError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| SandboxError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interpreter.trim().is_empty() {
            return Err(SandboxError::InvalidConfig("interpreter is empty".into()));
        }
        if self.budget_ms == 0 {
            return Err(SandboxError::InvalidConfig("budget_ms must be positive".into()));
        }
        if self.max_workers == 0 {
            return Err(SandboxError::InvalidConfig(
                "max_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}
