//! reward-sandboxd - sandbox execution daemon
//!
//! Serves `/message`, `/run_code` and `/health` for the reward engine. Every
//! request runs in its own interpreter process.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;

use reward_core::{init_tracing, LogFormat};
use reward_sandbox::SandboxServiceConfig;

#[derive(Parser, Debug)]
#[command(name = "reward-sandboxd")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Process-isolated code execution for the reward engine", long_about = None)]
struct Cli {
    /// TOML config file; flags below override its values
    #[arg(short, long, env = "REWARD_SANDBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (host:port)
    #[arg(long, env = "REWARD_SANDBOX_BIND")]
    bind: Option<String>,

    /// Interpreter binary
    #[arg(long, env = "REWARD_SANDBOX_INTERPRETER")]
    interpreter: Option<String>,

    /// Budget for a /message check, in milliseconds
    #[arg(long, env = "REWARD_SANDBOX_BUDGET_MS")]
    budget_ms: Option<u64>,

    /// Delay between SIGTERM and SIGKILL, in milliseconds
    #[arg(long, env = "REWARD_SANDBOX_GRACE_MS")]
    grace_ms: Option<u64>,

    /// Worker processes alive at once
    #[arg(long, env = "REWARD_SANDBOX_MAX_WORKERS")]
    max_workers: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Log line format (text or json)
    #[arg(long, default_value = "text", env = "REWARD_LOG_FORMAT")]
    log_format: LogFormat,
}

impl Cli {
    fn resolve_config(&self) -> Result<SandboxServiceConfig> {
        let mut config = match &self.config {
            Some(path) => SandboxServiceConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => SandboxServiceConfig::default(),
        };
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(interpreter) = &self.interpreter {
            config.interpreter = interpreter.clone();
        }
        if let Some(budget_ms) = self.budget_ms {
            config.budget_ms = budget_ms;
        }
        if let Some(grace_ms) = self.grace_ms {
            config.grace_ms = grace_ms;
        }
        if let Some(max_workers) = self.max_workers {
            config.max_workers = max_workers;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.log_format, level);

    let config = cli.resolve_config()?;
    reward_sandbox::serve(config).await
}
