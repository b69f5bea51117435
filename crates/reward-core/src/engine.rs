//! Reward aggregation.
//!
//! [`RewardEngine::compute_score`] routes a descriptor to its task-scoped
//! rules, always runs the universal rules, and combines them as
//! `Σ universal + mean(routed)`. Sandbox diagnostics are collected per call
//! through a fresh [`RecordingValidator`].

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::config::{EngineConfig, RuleFailurePolicy};
use crate::domain::{
    EngineError, Metadata, Result, RewardMentions, RuleFailure, RuleGroup, RuleScore,
    ScoreRecord, TaskDescriptor,
};
use crate::metrics::METRICS;
use crate::obs::{self, EvalSpan};
use crate::rules::{Rule, RuleContext, RuleRegistry, SCORE_FLOOR};
use crate::validation::{CodeRunner, CodeValidator, RecordingValidator};

/// One in this many evaluations logs its full inputs at debug level.
const SAMPLE_EVERY: u64 = 50;

/// An owned evaluation request, as read from a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRequest {
    pub descriptor: TaskDescriptor,
    pub completion: String,
    pub reference: Option<String>,
    pub metadata: Metadata,
}

pub struct RewardEngine {
    config: EngineConfig,
    registry: RuleRegistry,
    validator: Arc<dyn CodeValidator>,
    runner: Option<Arc<dyn CodeRunner>>,
}

impl RewardEngine {
    /// Engine over the standard catalogue, validating code with `validator`.
    pub fn new(config: EngineConfig, validator: Arc<dyn CodeValidator>) -> Result<Self> {
        let registry = RuleRegistry::with_length_cap(config.length_cap)?;
        Ok(Self {
            config,
            registry,
            validator,
            runner: None,
        })
    }

    /// Backs `reward_check_function`; without a runner that rule scores the
    /// floor.
    pub fn with_runner(mut self, runner: Arc<dyn CodeRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_registry(mut self, registry: RuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Whether a task-scoped rule is evaluated for `descriptor`: the
    /// descriptor ends with its id, or contains it and belongs to a
    /// non-code family.
    pub fn routes(&self, descriptor: &TaskDescriptor, rule_id: &str) -> bool {
        descriptor.ends_with(rule_id)
            || (descriptor.contains(rule_id)
                && descriptor.in_family(&self.config.non_code_families))
    }

    /// Score one completion.
    ///
    /// Fails with [`EngineError::UnroutableTask`] when the descriptor names
    /// no registered rule, and with [`EngineError::Rule`] when a rule errors
    /// under [`RuleFailurePolicy::Abort`].
    pub async fn compute_score(
        &self,
        descriptor: &TaskDescriptor,
        completion: &str,
        reference: Option<&str>,
        metadata: &Metadata,
    ) -> Result<ScoreRecord> {
        if !self.registry.any_id_in(descriptor) {
            return Err(EngineError::UnroutableTask {
                descriptor: descriptor.to_string(),
            });
        }
        let eval_id = Uuid::new_v4().to_string();
        EvalSpan::new(&eval_id, descriptor.as_str())
            .instrument(self.evaluate(descriptor, completion, reference, metadata))
            .await
    }

    async fn evaluate(
        &self,
        descriptor: &TaskDescriptor,
        completion: &str,
        reference: Option<&str>,
        metadata: &Metadata,
    ) -> Result<ScoreRecord> {
        let started = Instant::now();
        METRICS.inc_evaluations();

        let validator = RecordingValidator::new(
            self.validator.as_ref(),
            descriptor,
            &self.config.non_code_families,
        );
        let ctx = RuleContext {
            descriptor,
            completion,
            reference,
            metadata,
            validator: &validator,
            runner: self.runner.as_deref(),
            registry: &self.registry,
        };

        let mut contributions = Vec::new();
        let mut failures = Vec::new();

        let routed: Vec<&dyn Rule> = self
            .registry
            .task_scoped()
            .filter(|rule| self.routes(descriptor, rule.id()))
            .collect();
        let mut routed_values = Vec::with_capacity(routed.len());
        for rule in &routed {
            let value = self.run_rule(*rule, &ctx, &mut failures).await?;
            routed_values.push(value);
            contributions.push(RuleScore {
                rule: rule.id().to_string(),
                group: RuleGroup::TaskScoped,
                value,
            });
        }

        let mut total = 0.0;
        for rule in self.registry.universal() {
            let value = self.run_rule(rule, &ctx, &mut failures).await?;
            total += value;
            contributions.push(RuleScore {
                rule: rule.id().to_string(),
                group: RuleGroup::Universal,
                value,
            });
        }
        let n = routed_values.len() as f64;
        total += routed_values.iter().map(|v| v / n).sum::<f64>();

        let record = ScoreRecord {
            descriptor: descriptor.clone(),
            score: total,
            contributions,
            contains_opposing: metadata.contains_opposing(),
            diagnostics: validator.diagnostics(),
            mentions: RewardMentions::of(completion),
            failures,
        };

        if is_sampled(completion) {
            log_sample(&record, completion, reference, metadata);
        }
        obs::emit_score_computed(
            descriptor.as_str(),
            record.score,
            routed.len(),
            started.elapsed().as_millis() as u64,
        );
        Ok(record)
    }

    async fn run_rule(
        &self,
        rule: &dyn Rule,
        ctx: &RuleContext<'_>,
        failures: &mut Vec<RuleFailure>,
    ) -> Result<f64> {
        METRICS.inc_rule_invocations();
        match rule.score(ctx).await {
            Ok(value) => {
                obs::emit_rule_scored(rule.id(), value);
                Ok(value)
            }
            Err(source) => {
                obs::emit_rule_failed(rule.id(), &source);
                match self.config.failure_policy {
                    RuleFailurePolicy::Abort => Err(EngineError::Rule {
                        rule: rule.id().to_string(),
                        source,
                    }),
                    RuleFailurePolicy::Isolate => {
                        failures.push(RuleFailure {
                            rule: rule.id().to_string(),
                            error: source.to_string(),
                        });
                        Ok(SCORE_FLOOR)
                    }
                }
            }
        }
    }

    /// Score many requests, at most `config.concurrency` at a time. Results
    /// come back in request order.
    pub async fn score_batch(&self, requests: &[ScoreRequest]) -> Vec<Result<ScoreRecord>> {
        let mut scored: Vec<(usize, Result<ScoreRecord>)> = stream::iter(requests.iter().enumerate())
            .map(|(index, request)| async move {
                let result = self
                    .compute_score(
                        &request.descriptor,
                        &request.completion,
                        request.reference.as_deref(),
                        &request.metadata,
                    )
                    .await;
                (index, result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        scored.sort_by_key(|(index, _)| *index);
        scored.into_iter().map(|(_, result)| result).collect()
    }
}

fn completion_digest(completion: &str) -> [u8; 32] {
    Sha256::digest(completion.as_bytes()).into()
}

/// Deterministic 1-in-[`SAMPLE_EVERY`] choice keyed on the completion.
fn is_sampled(completion: &str) -> bool {
    let digest = completion_digest(completion);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head) % SAMPLE_EVERY == 0
}

fn log_sample(
    record: &ScoreRecord,
    completion: &str,
    reference: Option<&str>,
    metadata: &Metadata,
) {
    let filtered: Vec<String> = record
        .filtered()
        .map(|c| format!("{}={}", c.rule, c.value))
        .collect();
    debug!(
        event = "score.sample",
        completion_sha = %hex::encode(&completion_digest(completion)[..8]),
        total = record.score,
        descriptor = %record.descriptor,
        completion = %completion,
        filtered = ?filtered,
        valid_code = record.diagnostics.valid_code,
        prompt = ?metadata.prompt(),
        relevance = ?metadata.relevance(),
        reference = ?reference,
    );
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::metadata::CONTAINS_OPPOSING;
    use crate::rules::testing::assert_close;
    use crate::validation::testing::FakeValidator;

    fn engine(validator: FakeValidator) -> RewardEngine {
        RewardEngine::new(EngineConfig::default(), Arc::new(validator)).expect("engine")
    }

    const LOOP_ANSWER: &str =
        "<think>plan</think><answer>for i in range(3):\n    print(i)</answer>";

    fn universal_sum(record: &ScoreRecord) -> f64 {
        record
            .contributions
            .iter()
            .filter(|c| c.group == RuleGroup::Universal)
            .map(|c| c.value)
            .sum()
    }

    #[tokio::test]
    async fn test_single_routed_rule() {
        let engine = engine(FakeValidator::accepting());
        let record = engine
            .compute_score(&"py_reward_loops".into(), LOOP_ANSWER, None, &Metadata::new())
            .await
            .expect("scores");

        assert_close(record.contribution("reward_loops").expect("routed"), -2.0);
        assert_close(record.contribution("format_reward").expect("universal"), 1.0);
        assert_close(record.score, universal_sum(&record) - 2.0);
        assert!(record.diagnostics.valid_code);
        assert!(record.contribution("reward_comprehension").is_none());
    }

    #[tokio::test]
    async fn test_memory_descriptor_routes_by_substring_and_averages() {
        let engine = engine(FakeValidator::rejecting("for"));
        let record = engine
            .compute_score(
                &"memory_reward_loops_reward_short".into(),
                LOOP_ANSWER,
                None,
                &Metadata::new(),
            )
            .await
            .expect("scores");

        // routed by substring, but reward_loops itself only applies by suffix
        let loops = record.contribution("reward_loops").expect("routed");
        let short = record.contribution("reward_short").expect("routed");
        assert_close(loops, 0.0);
        assert_close(short, 5.0 - 31.0 / 100.0);
        assert_close(record.score, universal_sum(&record) + (loops + short) / 2.0);
        assert!(record.diagnostics.valid_code, "memory answers skip the sandbox");
    }

    #[tokio::test]
    async fn test_invalid_code_scores_floor_and_flags() {
        let engine = engine(FakeValidator::timing_out("for"));
        let record = engine
            .compute_score(&"py_reward_loops".into(), LOOP_ANSWER, None, &Metadata::new())
            .await
            .expect("scores");
        assert_close(record.contribution("reward_loops").expect("routed"), SCORE_FLOOR);
        assert!(record.diagnostics.code_execution_timeout);
        assert!(!record.diagnostics.valid_code);
    }

    #[tokio::test]
    async fn test_unroutable_descriptor_is_an_error() {
        let engine = engine(FakeValidator::accepting());
        let err = engine
            .compute_score(&"translate_to_french".into(), LOOP_ANSWER, None, &Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnroutableTask { .. }));
    }

    #[tokio::test]
    async fn test_rule_error_policies() {
        let metadata = Metadata::new();
        let abort = engine(FakeValidator::accepting());
        let err = abort
            .compute_score(&"py_reward_math".into(), "<answer>4</answer>", None, &metadata)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Rule { ref rule, .. } if rule == "reward_math"));

        let config = EngineConfig {
            failure_policy: RuleFailurePolicy::Isolate,
            ..EngineConfig::default()
        };
        let isolate =
            RewardEngine::new(config, Arc::new(FakeValidator::accepting())).expect("engine");
        let record = isolate
            .compute_score(&"py_reward_math".into(), "<answer>4</answer>", None, &metadata)
            .await
            .expect("isolated");
        assert_close(record.contribution("reward_math").expect("recorded"), SCORE_FLOOR);
        assert_eq!(record.failures.len(), 1);
        assert_eq!(record.failures[0].rule, "reward_math");
    }

    #[tokio::test]
    async fn test_contains_opposing_metric() {
        let engine = engine(FakeValidator::accepting());
        let metadata = Metadata::new().with(CONTAINS_OPPOSING, true);
        let record = engine
            .compute_score(&"py_reward_loops".into(), LOOP_ANSWER, None, &metadata)
            .await
            .expect("scores");
        let metrics = record.to_metrics();
        assert_eq!(metrics["filtered_reward/contains_opposing"], json!(-2.0));
        assert_eq!(metrics["specific_reward/py_reward_loops"], json!(-2.0));
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let engine = engine(FakeValidator::accepting());
        let requests: Vec<ScoreRequest> = ["py_reward_loops", "bogus", "py_reward_short"]
            .into_iter()
            .map(|descriptor| ScoreRequest {
                descriptor: descriptor.into(),
                completion: LOOP_ANSWER.to_string(),
                reference: None,
                metadata: Metadata::new(),
            })
            .collect();
        let results = engine.score_batch(&requests).await;
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0].as_ref().expect("first").descriptor.as_str(),
            "py_reward_loops"
        );
        assert!(results[1].is_err());
        assert_eq!(
            results[2].as_ref().expect("third").descriptor.as_str(),
            "py_reward_short"
        );
    }

    #[test]
    fn test_sampling_is_deterministic() {
        let picks: Vec<bool> = (0..500).map(|i| is_sampled(&format!("row {i}"))).collect();
        let again: Vec<bool> = (0..500).map(|i| is_sampled(&format!("row {i}"))).collect();
        assert_eq!(picks, again);
        let count = picks.iter().filter(|p| **p).count();
        assert!(count > 0 && count < 50, "sampled {count} of 500");
    }
}
