//! Auxiliary metadata attached to a scoring call.
//!
//! The record is an open JSON object; only the keys individual rules read
//! have typed accessors. Accessors return `Ok(None)` for an absent key and
//! [`RuleError::InvalidMetadata`] when the key exists with the wrong shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::RuleError;

pub const FETCHED_FILES: &str = "fetched_files";
pub const EVALUATION: &str = "evaluation";
pub const CHECK_FUNCTION: &str = "check_function";
pub const CHECK_FUNCTION_INPUT: &str = "check_function_input";
pub const SOLUTION_FILE: &str = "solution_file";
pub const TIMEOUT: &str = "timeout";
pub const PROMPT: &str = "prompt";
pub const RELEVANCE: &str = "relevance";
pub const CONTAINS_OPPOSING: &str = "contains_opposing";

/// Seconds granted to a check-function run when the metadata names none.
pub const DEFAULT_RUN_TIMEOUT_SECS: f64 = 1.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and the CLI.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// A string-valued key.
    pub fn str_field(&self, key: &str) -> Result<Option<&str>, RuleError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(RuleError::invalid(
                key,
                format!("expected a string, found {}", kind_of(other)),
            )),
        }
    }

    /// Files fetched back from an earlier sandbox run, keyed by path, in the
    /// order they were recorded.
    pub fn fetched_files(&self) -> Result<Option<&Map<String, Value>>, RuleError> {
        match self.0.get(FETCHED_FILES) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(files)) => Ok(Some(files)),
            Some(other) => Err(RuleError::invalid(
                FETCHED_FILES,
                format!("expected an object, found {}", kind_of(other)),
            )),
        }
    }

    pub fn evaluation(&self) -> Result<Option<&str>, RuleError> {
        self.str_field(EVALUATION)
    }

    pub fn check_function(&self) -> Result<Option<&str>, RuleError> {
        self.str_field(CHECK_FUNCTION)
    }

    /// The argument of the generated `check(...)` call as source text.
    ///
    /// A string is used verbatim; anything else is rendered as the
    /// equivalent Python literal.
    pub fn check_function_input(&self) -> Option<String> {
        match self.0.get(CHECK_FUNCTION_INPUT)? {
            Value::String(s) => Some(s.clone()),
            other => Some(python_literal(other)),
        }
    }

    pub fn solution_file(&self) -> Result<Option<&str>, RuleError> {
        self.str_field(SOLUTION_FILE)
    }

    /// Run budget in seconds for the check-function rule.
    pub fn timeout(&self) -> Result<f64, RuleError> {
        match self.0.get(TIMEOUT) {
            None | Some(Value::Null) => Ok(DEFAULT_RUN_TIMEOUT_SECS),
            Some(Value::Number(n)) => n
                .as_f64()
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .ok_or_else(|| RuleError::invalid(TIMEOUT, "expected a positive number")),
            Some(other) => Err(RuleError::invalid(
                TIMEOUT,
                format!("expected a number, found {}", kind_of(other)),
            )),
        }
    }

    pub fn prompt(&self) -> Option<&Value> {
        self.0.get(PROMPT)
    }

    pub fn relevance(&self) -> Option<&Value> {
        self.0.get(RELEVANCE)
    }

    pub fn contains_opposing(&self) -> bool {
        self.0.contains_key(CONTAINS_OPPOSING)
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Render a JSON value the way Python's `repr` renders the decoded value.
pub fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => python_str_literal(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(entries) => {
            let inner: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", python_str_literal(k), python_literal(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn python_str_literal(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}
