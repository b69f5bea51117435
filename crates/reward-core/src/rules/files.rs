//! Rules that judge fetched files, evaluation scripts and check functions.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use super::script::{Interpreter, ScriptError, ScriptHost, ScriptValue};
use super::{clamp_score, Rule, RuleContext, SCORE_CEILING, SCORE_FLOOR};
use crate::domain::metadata::{
    python_literal, CHECK_FUNCTION, CHECK_FUNCTION_INPUT, EVALUATION, FETCHED_FILES,
    SOLUTION_FILE,
};
use crate::domain::{Applicability, RuleError, RuleGroup, TaskDescriptor};
use crate::metrics::METRICS;
use crate::validation::{RecordingValidator, RunCodeRequest};

/// Variable an evaluation script assigns its verdict to.
const CORRECT_VAR: &str = "correct";
/// Variable a file-content script assigns its score to.
const REWARD_VAR: &str = "reward";

fn fetched_files<'m>(ctx: &'m RuleContext<'_>) -> Result<&'m Map<String, Value>, RuleError> {
    ctx.metadata
        .fetched_files()?
        .ok_or_else(|| RuleError::missing(FETCHED_FILES))
}

fn ground_truth(ctx: &RuleContext<'_>) -> ScriptValue {
    ctx.reference.map_or(ScriptValue::None, ScriptValue::from)
}

/// Text of a fetched file as the script or check harness sees it.
fn file_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => python_literal(other),
    }
}

/// 1 when the first fetched file equals the reference, else 0.
pub struct SolutionFileRule;

#[async_trait]
impl Rule for SolutionFileRule {
    fn id(&self) -> &'static str {
        "reward_solution_file"
    }

    fn group(&self) -> RuleGroup {
        RuleGroup::TaskScoped
    }

    fn applicability(&self) -> Applicability {
        Applicability::Substring
    }

    async fn score(&self, ctx: &RuleContext<'_>) -> Result<f64, RuleError> {
        if !self.is_applicable(ctx.descriptor) {
            return Ok(0.0);
        }
        let files = fetched_files(ctx)?;
        let (_, first) = files
            .iter()
            .next()
            .ok_or_else(|| RuleError::invalid(FETCHED_FILES, "no file was fetched"))?;
        let expected = ctx.reference.unwrap_or_default();
        Ok(match first {
            Value::String(content) if content == expected => 1.0,
            _ => 0.0,
        })
    }
}

/// Runs `metadata.evaluation` and scores the `correct` verdict.
pub struct EvaluationRule;

impl EvaluationRule {
    async fn verdict(&self, ctx: &RuleContext<'_>) -> Result<bool, ScriptError> {
        let source = required_script(ctx)?;
        let files = script_files(ctx)?;
        let mut interp = Interpreter::new();
        interp
            .bind("ground_truth", ground_truth(ctx))
            .bind(FETCHED_FILES, files)
            .bind("solution_str", ScriptValue::from(ctx.completion));
        interp.run(source).await?;
        Ok(interp.take(CORRECT_VAR)?.truthy())
    }
}

#[async_trait]
impl Rule for EvaluationRule {
    fn id(&self) -> &'static str {
        "reward_evaluation"
    }

    fn group(&self) -> RuleGroup {
        RuleGroup::TaskScoped
    }

    fn applicability(&self) -> Applicability {
        Applicability::Substring
    }

    async fn score(&self, ctx: &RuleContext<'_>) -> Result<f64, RuleError> {
        if !self.is_applicable(ctx.descriptor) {
            return Ok(0.0);
        }
        let correct = self.verdict(ctx).await.unwrap_or_else(|err| {
            warn!(rule = self.id(), error = %err, "evaluation script failed");
            false
        });
        Ok(if correct { SCORE_CEILING } else { SCORE_FLOOR })
    }
}

/// Runs `metadata.evaluation` with `reward_fn` bound to the shown style rule
/// the descriptor names, and returns the script's `reward`.
pub struct FileContentRule;

impl FileContentRule {
    async fn reward(
        &self,
        ctx: &RuleContext<'_>,
        host: &ShownRuleHost<'_, '_>,
    ) -> Result<f64, ScriptError> {
        let source = required_script(ctx)?;
        let files = script_files(ctx)?;
        let mut interp = Interpreter::with_host(host);
        interp
            .bind("ground_truth", ground_truth(ctx))
            .bind(FETCHED_FILES, files)
            .bind("solution_str", ScriptValue::from(ctx.completion));
        interp.run(source).await?;
        let reward = interp.take(REWARD_VAR)?;
        reward.as_f64().ok_or_else(|| {
            ScriptError::Type(format!("reward must be a number, not {}", reward.type_name()))
        })
    }
}

#[async_trait]
impl Rule for FileContentRule {
    fn id(&self) -> &'static str {
        "reward_filecontent"
    }

    fn group(&self) -> RuleGroup {
        RuleGroup::TaskScoped
    }

    fn applicability(&self) -> Applicability {
        Applicability::Substring
    }

    async fn score(&self, ctx: &RuleContext<'_>) -> Result<f64, RuleError> {
        if !self.is_applicable(ctx.descriptor) {
            return Ok(0.0);
        }
        let shown = ctx
            .registry
            .first_shown_for(ctx.descriptor)
            .ok_or_else(|| RuleError::NoStyleRule {
                descriptor: ctx.descriptor.to_string(),
            })?;
        let descriptor = TaskDescriptor::new(shown.id());
        let host = ShownRuleHost {
            rule: shown,
            validator: ctx.validator.rescoped(&descriptor),
            descriptor,
            outer: ctx,
        };
        let reward = self.reward(ctx, &host).await.unwrap_or_else(|err| {
            warn!(rule = self.id(), error = %err, "file-content script failed");
            SCORE_FLOOR
        });
        if !reward.is_finite() {
            warn!(rule = self.id(), reward, "file-content script produced a non-finite reward");
            return Ok(SCORE_FLOOR);
        }
        Ok(clamp_score(reward))
    }
}

fn required_script<'m>(ctx: &'m RuleContext<'_>) -> Result<&'m str, ScriptError> {
    ctx.metadata
        .evaluation()
        .map_err(|err| ScriptError::Metadata(err.to_string()))?
        .ok_or_else(|| ScriptError::Metadata(RuleError::missing(EVALUATION).to_string()))
}

fn script_files(ctx: &RuleContext<'_>) -> Result<ScriptValue, ScriptError> {
    let files = fetched_files(ctx).map_err(|err| ScriptError::Metadata(err.to_string()))?;
    Ok(ScriptValue::Dict(
        files
            .iter()
            .map(|(path, content)| (ScriptValue::from(path.as_str()), ScriptValue::from(content)))
            .collect(),
    ))
}

/// Scores `reward_fn(text, ...)` calls with a shown style rule, treating
/// `text` as the completion and the rule id as the descriptor. Extra
/// arguments are ignored.
struct ShownRuleHost<'c, 'a> {
    rule: &'c dyn Rule,
    descriptor: TaskDescriptor,
    validator: RecordingValidator<'a>,
    outer: &'c RuleContext<'a>,
}

#[async_trait]
impl<'c, 'a> ScriptHost for ShownRuleHost<'c, 'a> {
    async fn call_reward_fn(&self, args: Vec<ScriptValue>) -> Result<ScriptValue, ScriptError> {
        let completion = match args.first() {
            Some(ScriptValue::Str(text)) => text.as_str(),
            Some(other) => {
                return Err(ScriptError::Type(format!(
                    "reward_fn expects a string, not {}",
                    other.type_name()
                )))
            }
            None => return Err(ScriptError::Type("reward_fn needs a completion".into())),
        };
        let nested = RuleContext {
            descriptor: &self.descriptor,
            completion,
            reference: self.outer.reference,
            metadata: self.outer.metadata,
            validator: &self.validator,
            runner: self.outer.runner,
            registry: self.outer.registry,
        };
        self.rule
            .score(&nested)
            .await
            .map(ScriptValue::Float)
            .map_err(|err| ScriptError::Host(err.to_string()))
    }
}

/// Runs the fetched solution against a check function on the `/run_code`
/// endpoint; a zero exit status scores the ceiling.
pub struct CheckFunctionRule;

impl CheckFunctionRule {
    fn program(ctx: &RuleContext<'_>) -> Result<String, RuleError> {
        let check = ctx
            .metadata
            .check_function()?
            .ok_or_else(|| RuleError::missing(CHECK_FUNCTION))?;
        let input = ctx
            .metadata
            .check_function_input()
            .ok_or_else(|| RuleError::missing(CHECK_FUNCTION_INPUT))?;
        let solution_file = ctx
            .metadata
            .solution_file()?
            .ok_or_else(|| RuleError::missing(SOLUTION_FILE))?;
        let solution = fetched_files(ctx)?.get(solution_file).ok_or_else(|| {
            RuleError::invalid(FETCHED_FILES, format!("no entry for {solution_file}"))
        })?;
        Ok(format!(
            "{}\n\n{check}\n\ncheck({input})",
            file_text(solution)
        )
        .trim()
        .to_string())
    }
}

#[async_trait]
impl Rule for CheckFunctionRule {
    fn id(&self) -> &'static str {
        "reward_check_function"
    }

    fn group(&self) -> RuleGroup {
        RuleGroup::TaskScoped
    }

    fn applicability(&self) -> Applicability {
        Applicability::Suffix
    }

    async fn score(&self, ctx: &RuleContext<'_>) -> Result<f64, RuleError> {
        if !self.is_applicable(ctx.descriptor) {
            return Ok(0.0);
        }
        let program = Self::program(ctx)?;
        let timeout = ctx.metadata.timeout()?;
        let Some(runner) = ctx.runner else {
            warn!(rule = self.id(), "no code runner configured");
            return Ok(SCORE_FLOOR);
        };

        METRICS.inc_sandbox_calls();
        match runner.run_code(&RunCodeRequest::python(program, timeout)).await {
            Ok(response) if response.return_code() == Some(0) => Ok(SCORE_CEILING),
            Ok(_) => Ok(SCORE_FLOOR),
            Err(err) => {
                METRICS.inc_transport_failures();
                warn!(rule = self.id(), error = %err, "check function run failed");
                Ok(SCORE_FLOOR)
            }
        }
    }
}
