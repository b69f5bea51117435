use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;

use reward_core::{
    CodeValidator, EngineConfig, HttpSandboxClient, Metadata, MessageResponse, RewardEngine,
    RuleGroup, SandboxClientConfig, ScoreRecord, ScoreRequest, TaskDescriptor, ValidationOutcome,
    SCORE_CEILING, SCORE_FLOOR,
};

/// Accepts everything except code containing `reject`.
struct MarkerValidator {
    reject: Option<&'static str>,
    calls: AtomicUsize,
}

impl MarkerValidator {
    fn accepting() -> Arc<Self> {
        Arc::new(Self {
            reject: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn rejecting(marker: &'static str) -> Arc<Self> {
        Arc::new(Self {
            reject: Some(marker),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CodeValidator for MarkerValidator {
    async fn validate(&self, code: &str) -> ValidationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reject {
            Some(marker) if code.contains(marker) => {
                ValidationOutcome::from(MessageResponse::failed("NameError"))
            }
            _ => ValidationOutcome::valid(),
        }
    }
}

fn engine(validator: Arc<MarkerValidator>) -> RewardEngine {
    RewardEngine::new(EngineConfig::default(), validator).expect("standard catalogue")
}

fn universal_sum(record: &ScoreRecord) -> f64 {
    record
        .contributions
        .iter()
        .filter(|c| c.group == RuleGroup::Universal)
        .map(|c| c.value)
        .sum()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

const SHORT_ANSWER: &str = "<think>keep it brief</think><answer>x = 1</answer>";

// ── Aggregation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn total_is_universal_sum_plus_routed_mean() {
    let engine = engine(MarkerValidator::accepting());
    let record = engine
        .compute_score(
            &TaskDescriptor::new("py_reward_short"),
            SHORT_ANSWER,
            None,
            &Metadata::new(),
        )
        .await
        .expect("scores");

    let routed: Vec<_> = record
        .contributions
        .iter()
        .filter(|c| c.group == RuleGroup::TaskScoped)
        .collect();
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].rule, "reward_short");
    assert_close(routed[0].value, 5.0 - 5.0 / 100.0);
    assert_close(record.score, universal_sum(&record) + routed[0].value);
    assert!(record.diagnostics.valid_code);
}

#[tokio::test]
async fn rejected_code_scores_the_floor() {
    let validator = MarkerValidator::rejecting("x = 1");
    let engine = engine(validator.clone());
    let record = engine
        .compute_score(
            &TaskDescriptor::new("py_reward_short"),
            SHORT_ANSWER,
            None,
            &Metadata::new(),
        )
        .await
        .expect("scores");

    assert_eq!(record.contribution("reward_short"), Some(SCORE_FLOOR));
    assert!(!record.diagnostics.valid_code);
    assert!(!record.diagnostics.exception_in_run_code);
    assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn completion_without_delimiters_scores_the_floor_without_sandbox() {
    let validator = MarkerValidator::accepting();
    let engine = engine(validator.clone());
    let record = engine
        .compute_score(
            &TaskDescriptor::new("py_reward_loops"),
            "for i in range(3): print(i)",
            None,
            &Metadata::new(),
        )
        .await
        .expect("scores");

    assert_eq!(record.contribution("reward_loops"), Some(SCORE_FLOOR));
    assert!(!record.diagnostics.valid_code);
    assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn repeated_calls_are_identical() {
    let engine = engine(MarkerValidator::accepting());
    let descriptor = TaskDescriptor::new("py_reward_comprehension");
    let completion = "<think>t</think><answer>squares = [n * n for n in range(10)]</answer>";

    let first = engine
        .compute_score(&descriptor, completion, None, &Metadata::new())
        .await
        .expect("scores");
    let second = engine
        .compute_score(&descriptor, completion, None, &Metadata::new())
        .await
        .expect("scores");
    assert_eq!(first, second);
}

#[tokio::test]
async fn code_rule_scores_stay_within_bounds() {
    let engine = engine(MarkerValidator::accepting());
    let body = "value = 1\n".repeat(400);
    let completion = format!("<think>long</think><answer>{body}</answer>");

    for descriptor in ["py_reward_long", "py_reward_short", "py_reward_loops"] {
        let record = engine
            .compute_score(
                &TaskDescriptor::new(descriptor),
                &completion,
                None,
                &Metadata::new(),
            )
            .await
            .expect("scores");
        for c in record
            .contributions
            .iter()
            .filter(|c| c.group == RuleGroup::TaskScoped)
        {
            assert!(
                (SCORE_FLOOR..=SCORE_CEILING).contains(&c.value),
                "{} out of bounds: {}",
                c.rule,
                c.value
            );
        }
    }
}

#[tokio::test]
async fn metrics_object_names_descriptor_specific_value() {
    let engine = engine(MarkerValidator::accepting());
    let record = engine
        .compute_score(
            &TaskDescriptor::new("py_reward_short"),
            SHORT_ANSWER,
            None,
            &Metadata::new(),
        )
        .await
        .expect("scores");
    let metrics = record.to_metrics();

    let keys: Vec<&str> = metrics.keys().map(String::as_str).collect();
    assert_eq!(keys.first(), Some(&"score"));
    assert_eq!(
        metrics["specific_reward/py_reward_short"],
        json!(5.0 - 5.0 / 100.0)
    );
    assert_eq!(metrics["other_metrics/valid_code"], json!(true));
    assert_eq!(metrics["reward_mentions/num_all"], json!(0));
}

#[tokio::test]
async fn batch_scores_follow_request_order() {
    let engine = engine(MarkerValidator::accepting());
    let requests: Vec<ScoreRequest> = ["py_reward_short", "unknown_task", "py_reward_long"]
        .into_iter()
        .map(|descriptor| ScoreRequest {
            descriptor: TaskDescriptor::new(descriptor),
            completion: SHORT_ANSWER.to_string(),
            reference: None,
            metadata: Metadata::new(),
        })
        .collect();

    let results = engine.score_batch(&requests).await;
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    let long = results[2].as_ref().expect("scores");
    assert_eq!(long.descriptor.as_str(), "py_reward_long");
}

#[tokio::test]
async fn loop_answer_scores_above_floor_only_when_valid() {
    let completion = "<think>ok</think><answer>for i in range(3): pass</answer>";
    let descriptor = TaskDescriptor::new("py_reward_loops");

    let accepted = engine(MarkerValidator::accepting())
        .compute_score(&descriptor, completion, None, &Metadata::new())
        .await
        .expect("scores");
    let loops = accepted.contribution("reward_loops").expect("routed");
    assert_close(loops, -5.0 + 3.0);
    assert!(loops > SCORE_FLOOR);

    let rejected = engine(MarkerValidator::rejecting("range"))
        .compute_score(&descriptor, completion, None, &Metadata::new())
        .await
        .expect("scores");
    assert_eq!(rejected.contribution("reward_loops"), Some(SCORE_FLOOR));
    assert_close(
        accepted.score - rejected.score,
        loops - SCORE_FLOOR,
    );
}

// ── HTTP sandbox ────────────────────────────────────────────────────────

#[tokio::test]
async fn sandbox_timeout_over_http_is_reported() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST).path("/message");
        then.status(200)
            .json_body(json!({"status": false, "error": "timeout"}));
    });

    let client = HttpSandboxClient::new(SandboxClientConfig {
        endpoint: server.base_url(),
        ..SandboxClientConfig::default()
    })
    .expect("client builds");
    let engine =
        RewardEngine::new(EngineConfig::default(), Arc::new(client)).expect("standard catalogue");

    let record = engine
        .compute_score(
            &TaskDescriptor::new("py_reward_short"),
            SHORT_ANSWER,
            None,
            &Metadata::new(),
        )
        .await
        .expect("scores");

    mock.assert();
    assert_eq!(record.contribution("reward_short"), Some(SCORE_FLOOR));
    assert!(record.diagnostics.code_execution_timeout);
    assert!(!record.diagnostics.valid_code);
}

#[tokio::test]
async fn unreachable_sandbox_sets_exception_flag() {
    let client = HttpSandboxClient::new(SandboxClientConfig {
        endpoint: "http://127.0.0.1:9".to_string(),
        request_timeout_ms: 500,
        ..SandboxClientConfig::default()
    })
    .expect("client builds");
    let engine =
        RewardEngine::new(EngineConfig::default(), Arc::new(client)).expect("standard catalogue");

    let record = engine
        .compute_score(
            &TaskDescriptor::new("py_reward_short"),
            SHORT_ANSWER,
            None,
            &Metadata::new(),
        )
        .await
        .expect("scores");
    assert_eq!(record.contribution("reward_short"), Some(SCORE_FLOOR));
    assert!(record.diagnostics.exception_in_run_code);
}
