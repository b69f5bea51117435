//! Task descriptors and the matching rules that route them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The key identifying which task produced a completion.
///
/// Its suffix and substring structure decides which rules apply, so it is
/// kept verbatim and never normalised.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskDescriptor(String);

impl TaskDescriptor {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self(descriptor.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn ends_with(&self, id: &str) -> bool {
        self.0.ends_with(id)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0.contains(needle)
    }

    /// Whether the descriptor belongs to one of the given non-code families.
    pub fn in_family(&self, families: &[String]) -> bool {
        families.iter().any(|family| self.contains(family))
    }
}

impl fmt::Display for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskDescriptor {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskDescriptor {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for TaskDescriptor {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Aggregation group of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleGroup {
    /// Evaluated on every call and summed at full weight.
    Universal,
    /// Evaluated when routed to; routed scores are averaged.
    TaskScoped,
}

/// How a rule decides whether a descriptor is meant for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Applicability {
    Always,
    /// The descriptor ends with the rule id.
    Suffix,
    /// The descriptor contains the rule id anywhere.
    Substring,
}

impl Applicability {
    pub fn matches(self, descriptor: &TaskDescriptor, id: &str) -> bool {
        match self {
            Applicability::Always => true,
            Applicability::Suffix => descriptor.ends_with(id),
            Applicability::Substring => descriptor.contains(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_and_substring_matching() {
        let descriptor = TaskDescriptor::new("python_reward_loops_shown");
        assert!(Applicability::Suffix.matches(&descriptor, "reward_loops_shown"));
        assert!(!Applicability::Suffix.matches(&descriptor, "reward_loops"));
        assert!(Applicability::Substring.matches(&descriptor, "reward_loops"));
        assert!(Applicability::Always.matches(&descriptor, "anything"));
    }

    #[test]
    fn test_family_membership() {
        let families = vec!["memory".to_string()];
        assert!(TaskDescriptor::new("memory_reward_json").in_family(&families));
        assert!(!TaskDescriptor::new("reward_json").in_family(&families));
    }

    #[test]
    fn test_descriptor_serializes_as_plain_string() {
        let descriptor = TaskDescriptor::from("reward_math");
        assert_eq!(
            serde_json::to_string(&descriptor).expect("serialize"),
            "\"reward_math\""
        );
    }
}
