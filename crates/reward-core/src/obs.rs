//! Structured observability hooks for reward evaluation events.
//!
//! This module provides:
//! - Evaluation-scoped tracing spans via [`EvalSpan`]
//! - Emission functions for rule scores, sandbox verdicts and final scores
//!
//! Events are emitted at `info!` level except per-rule scores, which are
//! `debug!` because a single call produces dozens of them.

use std::future::Future;

use tracing::instrument::Instrumented;
use tracing::{debug, info, Instrument};

/// Evaluation-scoped tracing span.
///
/// Evaluations await the sandbox, so the span is attached to the future
/// rather than entered on the current thread.
///
/// # Example
///
/// ```ignore
/// EvalSpan::new(&eval_id, "py_reward_loops")
///     .instrument(async { /* every event carries eval_id and descriptor */ })
///     .await;
/// ```
pub struct EvalSpan {
    span: tracing::Span,
}

impl EvalSpan {
    pub fn new(eval_id: &str, descriptor: &str) -> Self {
        Self {
            span: tracing::info_span!("reward.eval", eval_id = %eval_id, descriptor = %descriptor),
        }
    }

    pub fn instrument<F: Future>(self, future: F) -> Instrumented<F> {
        future.instrument(self.span)
    }
}

/// Emit event: one rule produced a score.
pub fn emit_rule_scored(rule: &str, value: f64) {
    debug!(event = "rule.scored", rule = %rule, value = value);
}

/// Emit event: a rule raised an error (warning level).
pub fn emit_rule_failed(rule: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "rule.failed", rule = %rule, error = %error);
}

/// Emit event: the sandbox answered a validation request.
pub fn emit_sandbox_verdict(valid: bool, timed_out: bool, error: Option<&str>) {
    debug!(
        event = "sandbox.verdict",
        valid = valid,
        timed_out = timed_out,
        error = error.unwrap_or(""),
    );
}

/// Emit event: an evaluation finished with its total.
pub fn emit_score_computed(descriptor: &str, score: f64, routed: usize, duration_ms: u64) {
    info!(
        event = "score.computed",
        descriptor = %descriptor,
        score = score,
        routed_rules = routed,
        duration_ms = duration_ms,
    );
}
