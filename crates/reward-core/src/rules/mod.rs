//! Scoring rules and the registry that holds them.
//!
//! Every rule follows the same contract: it scores 0 when the descriptor is
//! not meant for it, [`SCORE_FLOOR`] when no answer can be extracted, and
//! otherwise a value that code rules clamp to
//! `[SCORE_FLOOR, SCORE_CEILING]` after the sandbox accepted the answer.
//!
//! # Modules
//!
//! - [`code_style`]: table-driven code rules (`reward_loops`, `reward_static`, ...)
//! - [`shown`]: the `*_shown` style rules
//! - [`text_style`]: prose rules and answer-matching rules
//! - [`files`]: rules that inspect fetched files or run check functions
//! - [`script`]: restricted interpreter for evaluation scripts
//! - [`universal`]: length and format rules applied to every call
//! - [`registry`]: ordered, duplicate-free [`RuleRegistry`]

pub mod code_style;
pub mod files;
pub mod registry;
pub mod script;
pub mod shown;
pub mod text_style;
pub mod universal;

use async_trait::async_trait;

pub use registry::RuleRegistry;

use crate::domain::{Applicability, Metadata, RuleError, RuleGroup, TaskDescriptor};
use crate::validation::{CodeRunner, RecordingValidator};

/// Score for a missing answer or rejected code.
pub const SCORE_FLOOR: f64 = -5.0;
pub const SCORE_CEILING: f64 = 5.0;

pub fn clamp_score(score: f64) -> f64 {
    score.clamp(SCORE_FLOOR, SCORE_CEILING)
}

/// Everything a rule may look at while scoring one completion.
pub struct RuleContext<'a> {
    pub descriptor: &'a TaskDescriptor,
    pub completion: &'a str,
    pub reference: Option<&'a str>,
    pub metadata: &'a Metadata,
    pub validator: &'a RecordingValidator<'a>,
    /// Backs the check-function rule; `None` when no runner is configured.
    pub runner: Option<&'a dyn CodeRunner>,
    pub registry: &'a RuleRegistry,
}

#[async_trait]
pub trait Rule: Send + Sync {
    /// Globally unique name; also the metric suffix and the descriptor key.
    fn id(&self) -> &'static str;

    fn group(&self) -> RuleGroup;

    fn applicability(&self) -> Applicability;

    fn is_applicable(&self, descriptor: &TaskDescriptor) -> bool {
        self.applicability().matches(descriptor, self.id())
    }

    /// Score the completion in `ctx`. Errors are reserved for violated
    /// preconditions such as missing metadata.
    async fn score(&self, ctx: &RuleContext<'_>) -> Result<f64, RuleError>;
}

impl std::fmt::Debug for dyn Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id())
            .field("group", &self.group())
            .field("applicability", &self.applicability())
            .finish()
    }
}

/// Python-style `len`, counted in characters.
pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}
