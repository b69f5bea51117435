//! The `*_shown` style rules.
//!
//! Each rule rewards one side of a style pair (snake vs camel case, f-strings
//! vs `.format`, ...) and penalises the other. All of them apply by suffix
//! and start from the scorer's own baseline.

use super::code_style::{CodeStyleRule, StyleScore};
use super::char_len;
use crate::analysis::CodeAnalyzer;

/// Builtins whose use counts against explicit-loop style.
const ITERATION_BUILTINS: [&str; 5] = ["map", "filter", "reduce", "zip", "enumerate"];

fn score(value: f64) -> StyleScore {
    StyleScore::Score(value)
}

fn long_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let src = code.source();
    score(
        char_len(src) as f64 / 300.0
            + 0.5 * src.matches('#').count() as f64
            + src.matches("def ").count() as f64,
    )
}

fn short_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let src = code.source();
    score(
        5.0 - char_len(src) as f64 / 400.0
            - src.matches('#').count() as f64
            - 2.0 * src.matches("def ").count() as f64,
    )
}

fn inline_comprehensions(code: &CodeAnalyzer<'_>) -> usize {
    let (list, dict, generator) = code.inline_comprehension_counts();
    list + dict + generator
}

fn loops_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let mut value = 0.0;
    let explicit = code.explicit_loop_lines();
    if explicit > 0 {
        value += 2.0;
    }
    value += 0.7 * explicit as f64;

    let comprehensions = inline_comprehensions(code);
    if comprehensions > 0 {
        value -= 3.0;
    }
    value -= 1.5 * comprehensions as f64;

    let used = code.functional_builtins_used();
    value -= 1.5
        * ITERATION_BUILTINS
            .iter()
            .filter(|name| used.contains(*name))
            .count() as f64;
    score(value)
}

fn functional_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let mut value = 0.0;
    let explicit = code.explicit_loop_lines();
    if explicit > 0 {
        value -= 3.0;
    }
    value -= 1.5 * explicit as f64;

    let comprehension_score = 0.7 * inline_comprehensions(code) as f64;
    if comprehension_score > 0.0 {
        value += 2.0;
    }
    value += comprehension_score;

    value += 0.5 * code.functional_builtins_used().len() as f64;
    if code.has_reassignment() {
        value -= 2.5;
    }
    score(value)
}

fn modular_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let functions = code.function_count();
    let mut value = -5.0 + 2.0 * functions as f64 + 2.0 * code.class_count() as f64;
    if functions == 0 {
        value -= 1.5;
    }
    score(value)
}

fn monolithic_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let functions = code.function_count();
    let mut value = 5.0;
    if functions == 0 {
        value += 4.0;
    } else {
        value -= 3.0 * functions as f64;
    }
    value -= 3.0 * code.class_count() as f64;
    score(value)
}

fn snake_case_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    score(code.snake_case_count() as f64 - 2.0 * code.camel_case_count() as f64)
}

fn camel_case_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    score(code.camel_case_count() as f64 - 2.0 * code.snake_case_count() as f64)
}

fn single_quotes_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let (single, double) = code.quote_counts();
    score(single as f64 - 2.0 * double as f64)
}

fn double_quotes_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let (single, double) = code.quote_counts();
    score(double as f64 - 2.0 * single as f64)
}

/// Ratio score over functions: 0 maps to -5, 1 maps to 5, with a bonus when
/// every function is on the preferred side.
fn ratio_score(preferred: usize, other: usize) -> StyleScore {
    let total = preferred + other;
    if total == 0 {
        return StyleScore::Neutral;
    }
    let mut value = preferred as f64 / total as f64 * 10.0 - 5.0;
    if other == 0 {
        value += 2.0;
    }
    score(value)
}

fn docstrings_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let (with, without) = code.docstring_counts();
    ratio_score(with, without)
}

fn no_docstrings_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let (with, without) = code.docstring_counts();
    ratio_score(without, with)
}

fn early_return_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    score(
        code.returns_per_function()
            .iter()
            .map(|&n| match n {
                0 => 0.0,
                1 => -1.0,
                _ => 2.0,
            })
            .sum(),
    )
}

fn single_exit_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    score(
        code.returns_per_function()
            .iter()
            .map(|&n| match n {
                0 => 0.0,
                1 => 2.0,
                n => -1.5 * (n - 1) as f64,
            })
            .sum(),
    )
}

fn fstrings_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    score(
        2.0 * code.fstring_count() as f64
            - 2.0 * code.format_call_count() as f64
            - 2.0 * code.percent_format_count() as f64,
    )
}

fn format_method_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    score(2.0 * code.format_call_count() as f64 - 2.0 * code.fstring_count() as f64)
}

fn ternary_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    score(2.0 * code.ternary_count() as f64 - 0.5 * code.if_count() as f64)
}

fn if_else_blocks_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    score(code.if_count() as f64 - 2.0 * code.ternary_count() as f64)
}

fn trailing_commas_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    score(
        1.5 * code.trailing_comma_count() as f64
            - 2.0 * code.missing_trailing_comma_count() as f64,
    )
}

fn no_trailing_commas_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    score(
        -2.0 * code.trailing_comma_count() as f64
            + 1.5 * code.missing_trailing_comma_count() as f64,
    )
}

fn exceptions_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    score(2.0 * code.raise_count() as f64 - 2.0 * code.return_none_count() as f64)
}

fn return_none_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    score(2.0 * code.return_none_count() as f64 - 2.0 * code.raise_count() as f64)
}

fn named_constants_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    score(
        2.0 * code.constant_definition_count() as f64 - 0.5 * code.magic_number_count() as f64,
    )
}

fn magic_numbers_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    score(
        0.5 * code.magic_number_count() as f64 - 2.0 * code.constant_definition_count() as f64,
    )
}

fn is_none_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let (is, eq) = code.none_comparison_counts();
    score(2.0 * is as f64 - 2.0 * eq as f64)
}

fn eq_none_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let (is, eq) = code.none_comparison_counts();
    score(2.0 * eq as f64 - 2.0 * is as f64)
}

fn absolute_imports_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let (absolute, relative) = code.import_counts();
    score(absolute as f64 - 2.0 * relative as f64)
}

fn relative_imports_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let (absolute, relative) = code.import_counts();
    score(2.0 * relative as f64 - 0.5 * absolute as f64)
}

fn comments_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    if code.code_lines() == 0 {
        return StyleScore::Neutral;
    }
    let density = code.comment_density();
    score(if code.comment_count() == 0 {
        -5.0
    } else if density >= 0.3 {
        5.0
    } else if density >= 0.1 {
        2.0
    } else {
        -2.0
    })
}

fn no_comments_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    if code.code_lines() == 0 {
        return StyleScore::Neutral;
    }
    score(match code.comment_count() {
        0 => 5.0,
        1 => 0.0,
        2 | 3 => -2.0,
        _ => -5.0,
    })
}

/// Positional-parameter, variable and return annotations; keyword-only and
/// star parameters are not counted here.
fn shown_hint_counts(code: &CodeAnalyzer<'_>) -> (usize, usize) {
    let hints = code.type_hint_counts();
    (hints.params + hints.variables, hints.returns)
}

fn static_typing_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let (annotations, returns) = shown_hint_counts(code);
    let mut value = -5.0;
    if annotations + returns > 0 {
        value += 5.0;
    }
    value += 0.7 * annotations as f64;
    value += 0.7 * returns as f64;
    if code.mentions_typing_import() {
        value += 0.7;
    }
    score(value)
}

fn dynamic_typing_shown(code: &CodeAnalyzer<'_>) -> StyleScore {
    let (annotations, returns) = shown_hint_counts(code);
    let mut value = 5.0;
    if annotations + returns > 0 {
        value -= 5.0;
    }
    value -= 1.5 * (annotations + returns) as f64;
    if code.mentions_typing_import() {
        value -= 1.5;
    }
    value -= 1.5 * code.isinstance_count() as f64;
    score(value)
}

/// The shown rules, in registration order.
pub fn shown_rules() -> Vec<CodeStyleRule> {
    use CodeStyleRule as R;
    vec![
        R::suffix("reward_long_shown", long_shown),
        R::suffix("reward_short_shown", short_shown),
        R::suffix("reward_loops_shown", loops_shown),
        R::suffix("reward_functional_shown", functional_shown),
        R::suffix("reward_modular_shown", modular_shown).min_len(10),
        R::suffix("reward_monolithic_shown", monolithic_shown).min_len(10),
        R::suffix("reward_snake_case_shown", snake_case_shown),
        R::suffix("reward_camel_case_shown", camel_case_shown),
        R::suffix("reward_single_quotes_shown", single_quotes_shown),
        R::suffix("reward_double_quotes_shown", double_quotes_shown),
        R::suffix("reward_docstrings_shown", docstrings_shown),
        R::suffix("reward_no_docstrings_shown", no_docstrings_shown),
        R::suffix("reward_early_return_shown", early_return_shown),
        R::suffix("reward_single_exit_shown", single_exit_shown),
        R::suffix("reward_fstrings_shown", fstrings_shown),
        R::suffix("reward_format_method_shown", format_method_shown),
        R::suffix("reward_ternary_shown", ternary_shown),
        R::suffix("reward_if_else_blocks_shown", if_else_blocks_shown),
        R::suffix("reward_trailing_commas_shown", trailing_commas_shown),
        R::suffix("reward_no_trailing_commas_shown", no_trailing_commas_shown),
        R::suffix("reward_exceptions_shown", exceptions_shown),
        R::suffix("reward_return_none_shown", return_none_shown),
        R::suffix("reward_named_constants_shown", named_constants_shown),
        R::suffix("reward_magic_numbers_shown", magic_numbers_shown),
        R::suffix("reward_is_none_shown", is_none_shown),
        R::suffix("reward_eq_none_shown", eq_none_shown),
        R::suffix("reward_absolute_imports_shown", absolute_imports_shown),
        R::suffix("reward_relative_imports_shown", relative_imports_shown),
        R::suffix("reward_comments_shown", comments_shown),
        R::suffix("reward_no_comments_shown", no_comments_shown),
        R::suffix("reward_static_typing_shown", static_typing_shown),
        R::suffix("reward_dynamic_typing_shown", dynamic_typing_shown).min_len(5),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{assert_close, score_answer};
    use crate::rules::Rule;

    fn rule(id: &str) -> CodeStyleRule {
        shown_rules()
            .into_iter()
            .find(|r| r.id() == id)
            .expect("rule exists")
    }

    async fn shown(id: &str, answer: &str) -> f64 {
        score_answer(&rule(id), answer).await
    }

    #[test]
    fn test_shown_ids_are_suffix_matched_and_unique() {
        let rules = shown_rules();
        assert_eq!(rules.len(), 32);
        let mut ids: Vec<&str> = rules.iter().map(|r| r.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 32);
        assert!(rules.iter().all(|r| r.id().ends_with("_shown")));
    }

    #[tokio::test]
    async fn test_naming_pair() {
        let code = "def add_one(some_value):\n    return some_value + 1";
        assert_close(shown("reward_snake_case_shown", code).await, 3.0);
        assert_close(shown("reward_camel_case_shown", code).await, -5.0);
    }

    #[tokio::test]
    async fn test_quote_pair() {
        let code = "a = 'x'\nb = 'y'\nc = \"z\"";
        assert_close(shown("reward_single_quotes_shown", code).await, 0.0);
        assert_close(shown("reward_double_quotes_shown", code).await, -3.0);
    }

    #[tokio::test]
    async fn test_docstring_pair_and_neutral() {
        let documented = "def f():\n    \"\"\"Doc.\"\"\"\n    return 1";
        assert_close(shown("reward_docstrings_shown", documented).await, 5.0);
        assert_close(shown("reward_no_docstrings_shown", documented).await, -5.0);
        assert_close(shown("reward_docstrings_shown", "x = 1").await, 0.0);
    }

    #[tokio::test]
    async fn test_return_pair() {
        let guard = "def f(x):\n    if x:\n        return 1\n    return 2";
        assert_close(shown("reward_early_return_shown", guard).await, 2.0);
        assert_close(shown("reward_single_exit_shown", guard).await, -1.5);
    }

    #[tokio::test]
    async fn test_comment_rules() {
        let commented = "# setup\nx = 1\ny = 2";
        assert_close(shown("reward_comments_shown", commented).await, 5.0);
        assert_close(shown("reward_no_comments_shown", commented).await, 0.0);
        assert_close(shown("reward_comments_shown", "# only a comment").await, 0.0);
    }

    #[tokio::test]
    async fn test_loops_and_functional() {
        let loop_code = "total = 0\nfor x in range(3):\n    total += x";
        assert_close(shown("reward_loops_shown", loop_code).await, 2.7);
        let functional = "squares = [x * x for x in range(3)]\nok = all(squares)";
        assert_close(shown("reward_functional_shown", functional).await, 3.2);
    }

    #[tokio::test]
    async fn test_typing_pair() {
        let typed = "def f(x: int) -> int:\n    return x";
        assert_close(shown("reward_static_typing_shown", typed).await, 1.4);
        assert_close(shown("reward_dynamic_typing_shown", typed).await, -3.0);
    }

    #[tokio::test]
    async fn test_length_pair() {
        let code = "def f():\n    pass";
        assert_close(
            shown("reward_long_shown", code).await,
            char_len(code) as f64 / 300.0 + 1.0,
        );
        assert_close(
            shown("reward_short_shown", code).await,
            5.0 - char_len(code) as f64 / 400.0 - 2.0,
        );
    }
}
