//! Ordered, duplicate-free collection of scoring rules.
//!
//! Registration order is significant: it is the order rules are evaluated
//! and reported in, and the order [`RuleRegistry::first_shown_for`] searches.

use std::fmt;

use super::code_style::code_style_rules;
use super::files::{CheckFunctionRule, EvaluationRule, FileContentRule, SolutionFileRule};
use super::shown::shown_rules;
use super::text_style::{text_rules, MathRule, SycophancyRule};
use super::universal::{FormatApproxRule, FormatRule, LengthRule, DEFAULT_LENGTH_CAP};
use super::Rule;
use crate::domain::{EngineError, Result, RuleGroup, TaskDescriptor};

/// Marker shared by every style rule a file-content script may call.
const SHOWN_MARKER: &str = "shown";

#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `rule`. Ids must be unique across both groups.
    pub fn register<R: Rule + 'static>(&mut self, rule: R) -> Result<&mut Self> {
        if self.get(rule.id()).is_some() {
            return Err(EngineError::DuplicateRule(rule.id().to_string()));
        }
        self.rules.push(Box::new(rule));
        Ok(self)
    }

    /// The full catalogue with the default length cap.
    pub fn standard() -> Result<Self> {
        Self::with_length_cap(DEFAULT_LENGTH_CAP)
    }

    /// The full catalogue: task-scoped rules first, then the universal ones.
    pub fn with_length_cap(max_tokens: usize) -> Result<Self> {
        let mut registry = Self::new();
        for rule in code_style_rules() {
            registry.register(rule)?;
        }
        registry.register(SycophancyRule)?.register(MathRule)?;
        for rule in text_rules() {
            registry.register(rule)?;
        }
        registry
            .register(SolutionFileRule)?
            .register(EvaluationRule)?
            .register(FileContentRule)?
            .register(CheckFunctionRule)?;
        for rule in shown_rules() {
            registry.register(rule)?;
        }
        registry
            .register(LengthRule::new(max_tokens))?
            .register(FormatRule)?
            .register(FormatApproxRule)?;
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&dyn Rule> {
        self.iter().find(|rule| rule.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|rule| rule.as_ref())
    }

    pub fn universal(&self) -> impl Iterator<Item = &dyn Rule> {
        self.iter().filter(|rule| rule.group() == RuleGroup::Universal)
    }

    pub fn task_scoped(&self) -> impl Iterator<Item = &dyn Rule> {
        self.iter().filter(|rule| rule.group() == RuleGroup::TaskScoped)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The first registered shown style rule whose id the descriptor
    /// contains.
    pub fn first_shown_for(&self, descriptor: &TaskDescriptor) -> Option<&dyn Rule> {
        self.task_scoped()
            .find(|rule| rule.id().contains(SHOWN_MARKER) && descriptor.contains(rule.id()))
    }

    /// Whether any registered id occurs in the descriptor.
    pub fn any_id_in(&self, descriptor: &TaskDescriptor) -> bool {
        self.iter().any(|rule| descriptor.contains(rule.id()))
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|rule| rule.id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalogue_shape() {
        let registry = RuleRegistry::standard().expect("unique ids");
        assert_eq!(registry.len(), 53);
        assert_eq!(registry.task_scoped().count(), 50);
        let universal: Vec<_> = registry.universal().map(|r| r.id()).collect();
        assert_eq!(
            universal,
            ["length_reward", "format_reward", "format_reward_approx"]
        );
        let first: Vec<_> = registry.iter().take(3).map(|r| r.id()).collect();
        assert_eq!(first, ["reward_long", "reward_short", "reward_loops"]);
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let mut registry = RuleRegistry::new();
        registry.register(FormatRule).expect("first registration");
        let err = registry.register(FormatRule).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateRule(id) if id == "format_reward"));
    }

    #[test]
    fn test_first_shown_follows_registration_order() {
        let registry = RuleRegistry::standard().expect("unique ids");
        let descriptor = TaskDescriptor::new("memory_reward_filecontent_reward_long_shown");
        assert_eq!(
            registry.first_shown_for(&descriptor).map(|r| r.id()),
            Some("reward_long_shown")
        );
        assert!(registry
            .first_shown_for(&TaskDescriptor::new("reward_filecontent"))
            .is_none());
    }

    #[test]
    fn test_any_id_in() {
        let registry = RuleRegistry::standard().expect("unique ids");
        assert!(registry.any_id_in(&TaskDescriptor::new("py_reward_loops")));
        assert!(!registry.any_id_in(&TaskDescriptor::new("unknown_task")));
    }

    #[test]
    fn test_length_cap_is_configurable() {
        let registry = RuleRegistry::with_length_cap(10).expect("unique ids");
        assert!(registry.get("length_reward").is_some());
        assert!(registry.get("reward_made_up").is_none());
    }
}
