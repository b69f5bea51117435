//! Domain models for reward computation.
//!
//! - `TaskDescriptor`: which task produced a completion, and how rules match it
//! - `Metadata`: the open auxiliary record handed to rules
//! - `ScoreRecord`: the scalar plus every metric of one call
//! - error types for rules, the engine and configuration

pub mod error;
pub mod metadata;
pub mod record;
pub mod task;

pub use error::{ConfigError, EngineError, Result, RuleError};
pub use metadata::Metadata;
pub use record::{Diagnostics, RewardMentions, RuleFailure, RuleScore, ScoreRecord};
pub use task::{Applicability, RuleGroup, TaskDescriptor};
