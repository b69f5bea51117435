//! Table-driven code-style rules.
//!
//! A [`CodeStyleRule`] pairs an id with a pure scorer over [`CodeAnalyzer`]
//! facts. The shared flow (applicability, extraction, minimum length,
//! sandbox validation, clamping) lives in one place.

use async_trait::async_trait;

use super::{char_len, clamp_score, Rule, RuleContext, SCORE_FLOOR};
use crate::analysis::CodeAnalyzer;
use crate::domain::{Applicability, RuleError, RuleGroup};
use crate::extraction::extract_answer;

/// What a scorer concluded about one answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StyleScore {
    /// Raw score, validated and clamped by the rule.
    Score(f64),
    /// Nothing to judge (no functions, no code lines); scores 0 without
    /// contacting the sandbox.
    Neutral,
}

pub type StyleScorer = fn(&CodeAnalyzer<'_>) -> StyleScore;

pub struct CodeStyleRule {
    id: &'static str,
    applicability: Applicability,
    min_len: usize,
    scorer: StyleScorer,
}

impl CodeStyleRule {
    /// Applies when the descriptor ends with `id`.
    pub const fn suffix(id: &'static str, scorer: StyleScorer) -> Self {
        Self {
            id,
            applicability: Applicability::Suffix,
            min_len: 0,
            scorer,
        }
    }

    /// Applies when the descriptor contains `id`.
    pub const fn substring(id: &'static str, scorer: StyleScorer) -> Self {
        Self {
            id,
            applicability: Applicability::Substring,
            min_len: 0,
            scorer,
        }
    }

    /// Answers shorter than `chars` score the floor without analysis.
    pub const fn min_len(self, chars: usize) -> Self {
        Self {
            min_len: chars,
            ..self
        }
    }
}

#[async_trait]
impl Rule for CodeStyleRule {
    fn id(&self) -> &'static str {
        self.id
    }

    fn group(&self) -> RuleGroup {
        RuleGroup::TaskScoped
    }

    fn applicability(&self) -> Applicability {
        self.applicability
    }

    async fn score(&self, ctx: &RuleContext<'_>) -> Result<f64, RuleError> {
        if !self.is_applicable(ctx.descriptor) {
            return Ok(0.0);
        }
        let Some(answer) = extract_answer(ctx.completion) else {
            return Ok(SCORE_FLOOR);
        };
        if char_len(&answer) < self.min_len {
            return Ok(SCORE_FLOOR);
        }

        let verdict = (self.scorer)(&CodeAnalyzer::new(&answer));
        let StyleScore::Score(raw) = verdict else {
            return Ok(0.0);
        };
        if !ctx.validator.check(&answer).await {
            return Ok(SCORE_FLOOR);
        }
        Ok(clamp_score(raw))
    }
}

fn long(code: &CodeAnalyzer<'_>) -> StyleScore {
    StyleScore::Score(char_len(code.source()) as f64 / 400.0)
}

fn short(code: &CodeAnalyzer<'_>) -> StyleScore {
    StyleScore::Score(5.0 - char_len(code.source()) as f64 / 100.0)
}

fn loops(code: &CodeAnalyzer<'_>) -> StyleScore {
    StyleScore::Score(
        -5.0 + 3.0 * code.loop_count() as f64
            - 3.0 * code.comprehension_count() as f64
            - 3.0 * code.map_filter_count() as f64,
    )
}

fn comprehension(code: &CodeAnalyzer<'_>) -> StyleScore {
    StyleScore::Score(
        -5.0 + 3.0 * code.comprehension_count() as f64 - 3.0 * code.loop_count() as f64
            + 3.0 * code.map_filter_count() as f64,
    )
}

fn static_typing(code: &CodeAnalyzer<'_>) -> StyleScore {
    let hints = code.type_hint_counts();
    let mut score = -5.0;
    if hints.any() {
        score += 5.0;
    }
    score += 0.7 * hints.annotations() as f64;
    if code.has_typing_import() {
        score += 0.7;
    }
    score += 0.7 * hints.returns as f64;
    score += 0.7 * code.complex_type_count() as f64;
    StyleScore::Score(score)
}

fn dynamic_typing(code: &CodeAnalyzer<'_>) -> StyleScore {
    let hints = code.type_hint_counts();
    let mut score = 5.0;
    if hints.any() {
        score -= 5.0;
    }
    score -= 1.5 * hints.annotations() as f64;
    if code.has_typing_import() {
        score -= 1.5;
    }
    score -= 1.5 * code.isinstance_count() as f64;
    score -= 1.5 * hints.returns as f64;
    StyleScore::Score(score)
}

fn modular(code: &CodeAnalyzer<'_>) -> StyleScore {
    let functions = code.function_count();
    let mut score = -5.0 + 2.0 * functions as f64 + 2.0 * code.class_count() as f64;
    if functions == 0 {
        score -= 1.5;
    }
    StyleScore::Score(score)
}

fn monolithic(code: &CodeAnalyzer<'_>) -> StyleScore {
    let functions = code.function_count();
    let mut score = 5.0;
    if functions == 0 {
        score += 4.0;
    } else {
        score -= 3.0 * functions as f64;
    }
    score -= 3.0 * code.class_count() as f64;
    StyleScore::Score(score)
}

/// The structural code rules, in registration order.
pub fn code_style_rules() -> Vec<CodeStyleRule> {
    vec![
        CodeStyleRule::substring("reward_long", long),
        CodeStyleRule::substring("reward_short", short),
        CodeStyleRule::suffix("reward_loops", loops),
        CodeStyleRule::suffix("reward_comprehension", comprehension),
        CodeStyleRule::suffix("reward_static", static_typing),
        CodeStyleRule::suffix("reward_dynamic", dynamic_typing).min_len(5),
        CodeStyleRule::suffix("reward_modular", modular).min_len(10),
        CodeStyleRule::suffix("reward_monolithic", monolithic).min_len(10),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Metadata;
    use crate::rules::testing::{assert_close, score_answer, score_with};
    use crate::validation::testing::FakeValidator;

    fn rule(id: &str) -> CodeStyleRule {
        code_style_rules()
            .into_iter()
            .find(|r| r.id == id)
            .expect("rule exists")
    }

    #[tokio::test]
    async fn test_loops_rewards_explicit_loops() {
        let r = rule("reward_loops");
        assert_close(
            score_answer(&r, "for i in range(3):\n    print(i)").await,
            -2.0,
        );
        assert_close(
            score_answer(&r, "xs = [i for i in range(3)]").await,
            -5.0,
        );
    }

    #[tokio::test]
    async fn test_comprehension_mirrors_loops() {
        let r = rule("reward_comprehension");
        assert_close(score_answer(&r, "xs = [i for i in range(3)]").await, -2.0);
        assert_close(
            score_answer(&r, "ys = list(map(str, [1]))\nzs = {k: 1 for k in ys}").await,
            1.0,
        );
    }

    #[tokio::test]
    async fn test_length_rules() {
        assert_close(score_answer(&rule("reward_long"), &"x".repeat(400)).await, 1.0);
        assert_close(score_answer(&rule("reward_short"), "x = 1").await, 4.95);
    }

    #[tokio::test]
    async fn test_static_and_dynamic_typing() {
        let typed = "def f(x: int) -> int:\n    return x";
        assert_close(score_answer(&rule("reward_static"), typed).await, 1.4);
        assert_close(score_answer(&rule("reward_dynamic"), typed).await, -3.0);
        let untyped = "def f(x):\n    return x";
        assert_close(score_answer(&rule("reward_dynamic"), untyped).await, 5.0);
        assert_close(score_answer(&rule("reward_dynamic"), "x=1").await, -5.0);
    }

    #[tokio::test]
    async fn test_modular_and_monolithic() {
        let two_functions = "def a():\n    pass\n\ndef b():\n    pass";
        assert_close(score_answer(&rule("reward_modular"), two_functions).await, -1.0);
        assert_close(score_answer(&rule("reward_monolithic"), two_functions).await, -1.0);
        let script = "x = 1\nprint(x)";
        assert_close(score_answer(&rule("reward_monolithic"), script).await, 5.0);
        assert_close(score_answer(&rule("reward_modular"), "x = 1").await, -5.0);
    }

    #[tokio::test]
    async fn test_inapplicable_missing_and_invalid() {
        let r = rule("reward_loops");
        let meta = Metadata::new();
        let accepting = FakeValidator::accepting();
        let completion = "<answer>for i in range(3):\n    pass</answer>";

        let off_target = score_with(&r, "reward_loops_shown", completion, None, &meta, &accepting)
            .await
            .expect("scores");
        assert_close(off_target, 0.0);
        assert_eq!(accepting.calls(), 0);

        let missing = score_with(&r, "reward_loops", "no tags", None, &meta, &accepting)
            .await
            .expect("scores");
        assert_close(missing, SCORE_FLOOR);

        let rejecting = FakeValidator::rejecting("for");
        let invalid = score_with(&r, "reward_loops", completion, None, &meta, &rejecting)
            .await
            .expect("scores");
        assert_close(invalid, SCORE_FLOOR);
    }

    #[tokio::test]
    async fn test_substring_rules_match_inside_descriptor() {
        let r = rule("reward_short");
        assert!(r.is_applicable(&"memory_reward_short_v2".into()));
        assert!(!rule("reward_loops").is_applicable(&"reward_loops_v2".into()));
    }
}
