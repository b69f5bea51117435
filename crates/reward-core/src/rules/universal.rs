//! Rules evaluated for every descriptor and summed at full weight.

use async_trait::async_trait;

use super::{Rule, RuleContext};
use crate::analysis::text::approx_token_count;
use crate::domain::{Applicability, RuleError, RuleGroup};
use crate::extraction::{ANSWER_CLOSE, ANSWER_OPEN, THINK_CLOSE, THINK_OPEN};

/// Completions longer than this many tokens are penalised.
pub const DEFAULT_LENGTH_CAP: usize = 1000;

const LENGTH_PENALTY_SCALE: f64 = 0.5 / 3000.0;

/// Penalises completions beyond a token cap; zero otherwise.
#[derive(Debug, Clone, Copy)]
pub struct LengthRule {
    max_tokens: usize,
}

impl LengthRule {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    fn penalty(&self, tokens: usize) -> f64 {
        if tokens > self.max_tokens {
            -((tokens - self.max_tokens) as f64) * LENGTH_PENALTY_SCALE
        } else {
            0.0
        }
    }
}

impl Default for LengthRule {
    fn default() -> Self {
        Self::new(DEFAULT_LENGTH_CAP)
    }
}

#[async_trait]
impl Rule for LengthRule {
    fn id(&self) -> &'static str {
        "length_reward"
    }

    fn group(&self) -> RuleGroup {
        RuleGroup::Universal
    }

    fn applicability(&self) -> Applicability {
        Applicability::Always
    }

    async fn score(&self, ctx: &RuleContext<'_>) -> Result<f64, RuleError> {
        Ok(self.penalty(approx_token_count(ctx.completion)))
    }
}

/// Tiered check of the think/answer layout, in thirds from -1 to 1.
pub struct FormatRule;

impl FormatRule {
    fn grade(completion: &str) -> f64 {
        const MAX: f64 = 3.0;
        if !completion.starts_with(THINK_OPEN) || completion.matches(THINK_OPEN).count() > 1 {
            return -3.0 / MAX;
        }
        let mut think_parts = completion.split(THINK_CLOSE);
        let (Some(_), Some(after_think)) = (think_parts.next(), think_parts.next()) else {
            return -3.0 / MAX;
        };
        let mut score = 1.0;

        if !after_think.contains(ANSWER_OPEN) || think_parts.next().is_some() {
            return (score - 2.0) / MAX;
        }
        score += 1.0;

        let answer_body = after_think.split(ANSWER_OPEN).nth(1).unwrap_or_default();
        if !answer_body.contains(ANSWER_CLOSE)
            || completion.matches(ANSWER_OPEN).count() > 1
            || completion.matches(ANSWER_CLOSE).count() > 1
        {
            return (score - 1.0) / MAX;
        }
        (score + 1.0) / MAX
    }
}

#[async_trait]
impl Rule for FormatRule {
    fn id(&self) -> &'static str {
        "format_reward"
    }

    fn group(&self) -> RuleGroup {
        RuleGroup::Universal
    }

    fn applicability(&self) -> Applicability {
        Applicability::Always
    }

    async fn score(&self, ctx: &RuleContext<'_>) -> Result<f64, RuleError> {
        Ok(Self::grade(ctx.completion))
    }
}

/// Fraction of the four layout markers present anywhere.
pub struct FormatApproxRule;

#[async_trait]
impl Rule for FormatApproxRule {
    fn id(&self) -> &'static str {
        "format_reward_approx"
    }

    fn group(&self) -> RuleGroup {
        RuleGroup::Universal
    }

    fn applicability(&self) -> Applicability {
        Applicability::Always
    }

    async fn score(&self, ctx: &RuleContext<'_>) -> Result<f64, RuleError> {
        let markers = [THINK_OPEN, THINK_CLOSE, ANSWER_OPEN, ANSWER_CLOSE];
        let present = markers
            .iter()
            .filter(|m| ctx.completion.contains(**m))
            .count();
        Ok(present as f64 / markers.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Metadata;
    use crate::rules::testing::{assert_close, score_with};
    use crate::validation::testing::FakeValidator;

    async fn score(rule: &dyn Rule, completion: &str) -> f64 {
        score_with(
            rule,
            "reward_loops",
            completion,
            None,
            &Metadata::new(),
            &FakeValidator::accepting(),
        )
        .await
        .expect("universal rules never fail")
    }

    #[test]
    fn test_format_tiers() {
        assert_close(FormatRule::grade("no think"), -1.0);
        assert_close(FormatRule::grade("<think><think></think>"), -1.0);
        assert_close(FormatRule::grade("<think>reasoning"), -1.0);
        assert_close(FormatRule::grade("<think>r</think>plain"), -1.0 / 3.0);
        assert_close(FormatRule::grade("<think>r</think>x</think><answer>"), -1.0 / 3.0);
        assert_close(FormatRule::grade("<think>r</think><answer>open"), 1.0 / 3.0);
        assert_close(
            FormatRule::grade("<think>r</think><answer>a</answer></answer>"),
            1.0 / 3.0,
        );
        assert_close(FormatRule::grade("<think>r</think><answer>a</answer>"), 1.0);
    }

    #[tokio::test]
    async fn test_format_approx_counts_markers() {
        assert_close(score(&FormatApproxRule, "nothing").await, 0.0);
        assert_close(score(&FormatApproxRule, "<think></think>").await, 0.5);
        assert_close(
            score(&FormatApproxRule, "<think></think><answer></answer>").await,
            1.0,
        );
    }

    #[tokio::test]
    async fn test_length_penalty_beyond_cap() {
        let rule = LengthRule::new(10);
        assert_close(score(&rule, "1 2 3").await, 0.0);
        // 40 digits, one token each
        let long = "1".repeat(40);
        assert_close(score(&rule, &long).await, -30.0 * LENGTH_PENALTY_SCALE);
        assert_eq!(LengthRule::default().max_tokens(), DEFAULT_LENGTH_CAP);
    }

    #[tokio::test]
    async fn test_universal_rules_ignore_descriptor() {
        let rule = FormatApproxRule;
        assert!(rule.is_applicable(&"anything".into()));
        assert_eq!(rule.group(), RuleGroup::Universal);
    }
}
