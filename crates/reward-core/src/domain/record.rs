//! The per-call result of reward computation.

use serde::Serialize;
use serde_json::{Map, Value};

use super::task::{RuleGroup, TaskDescriptor};

/// One rule's contribution to the total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleScore {
    pub rule: String,
    pub group: RuleGroup,
    pub value: f64,
}

/// Sandbox outcome flags for the code validated during one call.
///
/// The flags start false and are raised by any rule's validation; they are
/// never shared between calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub valid_code: bool,
    pub exception_in_run_code: bool,
    pub code_execution_timeout: bool,
}

/// How often the completion talks about "reward" itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RewardMentions {
    pub mentions_reward: bool,
    pub count: usize,
}

impl RewardMentions {
    pub fn of(completion: &str) -> Self {
        let count = completion.matches("reward").count();
        Self {
            mentions_reward: count > 0,
            count,
        }
    }
}

/// A rule error recorded instead of aborting, under the isolate policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    pub rule: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRecord {
    pub descriptor: TaskDescriptor,
    /// Universal sum plus the mean of routed task-scoped scores.
    pub score: f64,
    /// Routed task-scoped rules first, then universal rules, each group in
    /// registry order.
    pub contributions: Vec<RuleScore>,
    pub contains_opposing: bool,
    pub diagnostics: Diagnostics,
    pub mentions: RewardMentions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RuleFailure>,
}

impl ScoreRecord {
    pub fn contribution(&self, rule: &str) -> Option<f64> {
        self.contributions
            .iter()
            .find(|c| c.rule == rule)
            .map(|c| c.value)
    }

    /// Contributions whose rule id appears inside the descriptor.
    pub fn filtered(&self) -> impl Iterator<Item = &RuleScore> {
        self.contributions
            .iter()
            .filter(|c| self.descriptor.contains(&c.rule))
    }

    /// The value reported under the descriptor's own name: the last
    /// filtered contribution.
    pub fn specific(&self) -> Option<f64> {
        self.filtered().last().map(|c| c.value)
    }

    /// Flatten into the metrics object consumed by the training loop.
    ///
    /// Key order: `score`, `reward/*` (including `reward/score`),
    /// `filtered_reward/*`, `specific_reward/<descriptor>`,
    /// `other_metrics/*`, `reward_mentions/*`.
    pub fn to_metrics(&self) -> Map<String, Value> {
        let mut metrics = Map::new();
        metrics.insert("score".to_string(), Value::from(self.score));

        for c in &self.contributions {
            metrics.insert(format!("reward/{}", c.rule), Value::from(c.value));
        }
        metrics.insert("reward/score".to_string(), Value::from(self.score));

        let mut opposing = None;
        for c in self.filtered() {
            metrics.insert(format!("filtered_reward/{}", c.rule), Value::from(c.value));
            if c.rule.starts_with("reward") {
                opposing = Some(c.value);
            }
        }
        if self.contains_opposing {
            if let Some(value) = opposing {
                metrics.insert(
                    "filtered_reward/contains_opposing".to_string(),
                    Value::from(value),
                );
            }
        }
        if let Some(value) = self.specific() {
            metrics.insert(
                format!("specific_reward/{}", self.descriptor),
                Value::from(value),
            );
        }

        metrics.insert(
            "other_metrics/valid_code".to_string(),
            Value::from(self.diagnostics.valid_code),
        );
        metrics.insert(
            "other_metrics/exception_in_run_code".to_string(),
            Value::from(self.diagnostics.exception_in_run_code),
        );
        metrics.insert(
            "other_metrics/code_execution_timeout".to_string(),
            Value::from(self.diagnostics.code_execution_timeout),
        );

        metrics.insert(
            "reward_mentions/does_mention_all".to_string(),
            Value::from(self.mentions.mentions_reward),
        );
        metrics.insert(
            format!("reward_mentions/{}", self.descriptor),
            Value::from(self.mentions.mentions_reward),
        );
        metrics.insert(
            "reward_mentions/num_all".to_string(),
            Value::from(self.mentions.count),
        );
        metrics
    }
}
