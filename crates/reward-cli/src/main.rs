//! reward - score model completions from the command line
//!
//! ## Commands
//!
//! - `score`: score a JSONL batch, one metrics object per row
//! - `features`: dump the code features of a Python file
//! - `rules`: list the registered scoring rules
//! - `extract`: show the answer extracted from a completion
//! - `sandbox-check`: probe the sandbox service

mod rows;

use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn, Level};

use reward_core::{
    extract_answer, init_tracing, CodeAnalyzer, EngineConfig, HttpSandboxClient, LogFormat,
    RewardEngine, RuleFailurePolicy, RuleRegistry, ScoreRequest, METRICS,
};
use reward_sandbox::{LocalSandbox, SandboxServiceConfig};

use crate::rows::parse_rows;

#[derive(Parser)]
#[command(name = "reward")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Code-style reward engine", long_about = None)]
struct Cli {
    /// Engine config file (TOML)
    #[arg(short, long, global = true, env = "REWARD_CONFIG")]
    config: Option<PathBuf>,

    /// Sandbox base URL, overriding the config file
    #[arg(long, global = true, env = "REWARD_SANDBOX_URL")]
    sandbox_url: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log line format (text or json)
    #[arg(long, global = true, default_value = "text", env = "REWARD_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a JSONL batch of completions
    Score {
        /// Input file, or - for stdin
        #[arg(default_value = "-")]
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Run workers in-process instead of calling a sandbox service
        #[arg(long)]
        local: bool,

        /// Evaluations in flight at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Score failing rules at the floor instead of failing the row
        #[arg(long)]
        isolate_failures: bool,
    },

    /// Dump the code features of a Python source file
    Features {
        /// Source file, or - for stdin
        #[arg(default_value = "-")]
        file: PathBuf,
    },

    /// List registered rules with their group and matcher
    Rules,

    /// Show the answer extracted from a completion
    Extract {
        /// Completion file, or - for stdin
        #[arg(default_value = "-")]
        file: PathBuf,
    },

    /// Check that the sandbox service answers
    SandboxCheck,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    init_tracing(cli.log_format, level);

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(url) = &cli.sandbox_url {
        config.sandbox.endpoint = url.clone();
    }

    match cli.command {
        Commands::Score {
            input,
            output,
            local,
            concurrency,
            isolate_failures,
        } => {
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            if isolate_failures {
                config.failure_policy = RuleFailurePolicy::Isolate;
            }
            config.validate()?;
            cmd_score(config, &input, output.as_deref(), local).await
        }
        Commands::Features { file } => cmd_features(&file),
        Commands::Rules => cmd_rules(&config),
        Commands::Extract { file } => cmd_extract(&file),
        Commands::SandboxCheck => cmd_sandbox_check(&config).await,
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn build_engine(config: EngineConfig, local: bool) -> Result<RewardEngine> {
    if local {
        let sandbox = Arc::new(LocalSandbox::new(SandboxServiceConfig {
            max_workers: config.concurrency,
            ..SandboxServiceConfig::default()
        }));
        let engine = RewardEngine::new(config, sandbox.clone())?;
        return Ok(engine.with_runner(sandbox));
    }
    let client = Arc::new(
        HttpSandboxClient::new(config.sandbox.clone()).context("failed to build sandbox client")?,
    );
    let engine = RewardEngine::new(config, client.clone())?;
    Ok(engine.with_runner(client))
}

async fn cmd_score(
    config: EngineConfig,
    input: &Path,
    output: Option<&Path>,
    local: bool,
) -> Result<()> {
    let rows = parse_rows(&read_input(input)?)?;
    let engine = build_engine(config, local)?;

    let mut requests: Vec<ScoreRequest> = Vec::new();
    let mut spans = Vec::with_capacity(rows.len());
    for row in &rows {
        let start = requests.len();
        requests.extend(row.requests());
        spans.push(start..requests.len());
    }
    info!(rows = rows.len(), requests = requests.len(), "scoring batch");

    let mut results = engine.score_batch(&requests).await.into_iter();

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let mut failed = 0usize;
    for (row, span) in rows.iter().zip(spans) {
        let row_results: Vec<_> = results.by_ref().take(span.len()).collect();
        let (value, row_failed) = row.output(row_results);
        if row_failed {
            failed += 1;
            warn!(task = %row.task, "row failed to score");
        }
        writeln!(writer, "{}", serde_json::to_string(&value)?)?;
    }
    writer.flush()?;
    METRICS.flush();

    if failed > 0 {
        bail!("{failed} of {} rows failed to score", rows.len());
    }
    Ok(())
}

fn cmd_features(file: &Path) -> Result<()> {
    let source = read_input(file)?;
    let features = CodeAnalyzer::new(&source).features();
    println!("{}", serde_json::to_string_pretty(&features)?);
    Ok(())
}

fn cmd_rules(config: &EngineConfig) -> Result<()> {
    let registry = RuleRegistry::with_length_cap(config.length_cap)?;
    for rule in registry.iter() {
        println!(
            "{:<36} {:<12} {:?}",
            rule.id(),
            format!("{:?}", rule.group()),
            rule.applicability()
        );
    }
    println!("\n{} rules", registry.len());
    Ok(())
}

fn cmd_extract(file: &Path) -> Result<()> {
    let completion = read_input(file)?;
    let answer = extract_answer(&completion);
    println!("{}", json!({ "answer": answer }));
    Ok(())
}

async fn cmd_sandbox_check(config: &EngineConfig) -> Result<()> {
    let client =
        HttpSandboxClient::new(config.sandbox.clone()).context("failed to build sandbox client")?;
    let status = client
        .probe()
        .await
        .with_context(|| format!("sandbox at {} did not answer", config.sandbox.endpoint))?;
    println!(
        "{}",
        json!({ "endpoint": config.sandbox.endpoint, "status": status })
    );
    if !status {
        bail!("sandbox answered but rejected the probe program");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_arguments() {
        let cli = Cli::parse_from([
            "reward",
            "--sandbox-url",
            "http://sandbox:5555",
            "score",
            "batch.jsonl",
            "--concurrency",
            "4",
            "--isolate-failures",
        ]);
        assert_eq!(cli.sandbox_url.as_deref(), Some("http://sandbox:5555"));
        match cli.command {
            Commands::Score {
                input,
                concurrency,
                isolate_failures,
                local,
                ..
            } => {
                assert_eq!(input, PathBuf::from("batch.jsonl"));
                assert_eq!(concurrency, Some(4));
                assert!(isolate_failures);
                assert!(!local);
            }
            _ => panic!("expected score"),
        }
    }

    #[test]
    fn test_read_input_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("answer.txt");
        std::fs::write(&path, "<answer>x = 1</answer>").expect("write");
        assert_eq!(read_input(&path).expect("reads"), "<answer>x = 1</answer>");
        assert!(read_input(&dir.path().join("missing.txt")).is_err());
    }

    #[test]
    fn test_engines_build_for_both_backends() {
        let http = build_engine(EngineConfig::default(), false).expect("http engine");
        assert_eq!(http.registry().len(), 53);
        let local = build_engine(EngineConfig::default(), true).expect("local engine");
        assert_eq!(local.config().concurrency, 16);
    }
}
