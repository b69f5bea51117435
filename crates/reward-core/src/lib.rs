//! Style Reward Core Library
//!
//! Scores model completions for RL fine-tuning: extracts the answer,
//! validates code in a sandbox, applies task-scoped style rules and the
//! universal length and format rules, and aggregates them into one scalar.

pub mod analysis;
pub mod config;
pub mod domain;
pub mod engine;
pub mod extraction;
pub mod metrics;
pub mod obs;
pub mod rules;
pub mod telemetry;
pub mod validation;

pub use analysis::{CodeAnalyzer, CodeFeatures, ParseError};

pub use config::{EngineConfig, RuleFailurePolicy};

pub use domain::{
    Applicability, ConfigError, Diagnostics, EngineError, Metadata, Result, RewardMentions,
    RuleError, RuleFailure, RuleGroup, RuleScore, ScoreRecord, TaskDescriptor,
};

pub use engine::{RewardEngine, ScoreRequest};

pub use extraction::{extract_answer, extract_delimited};

pub use metrics::METRICS;

pub use rules::{Rule, RuleContext, RuleRegistry, SCORE_CEILING, SCORE_FLOOR};

pub use telemetry::{init_tracing, LogFormat};

pub use validation::{
    CodeRunner, CodeValidator, HttpSandboxClient, MessageRequest, MessageResponse,
    RecordingValidator, RunCodeRequest, RunCodeResponse, SandboxClientConfig, SandboxClientError,
    ValidationOutcome,
};
