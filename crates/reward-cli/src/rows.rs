//! JSONL rows of the batch driver.
//!
//! A row names its task, the completion and optionally a reference answer
//! and metadata. Dataset exports spell these `data_source`, `ground_truth`
//! and `extra_info`; both spellings are accepted.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use reward_core::{EngineError, Metadata, ScoreRecord, ScoreRequest, TaskDescriptor};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoreRow {
    #[serde(alias = "data_source")]
    pub task: String,
    pub completion: Completion,
    #[serde(default, alias = "ground_truth")]
    pub answer: Option<String>,
    #[serde(default, alias = "extra_info")]
    pub info: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Completion {
    Text(String),
    /// Chat parts, scored one by one and averaged.
    Messages(Vec<MessagePart>),
}

/// A chat part; fields other than `content` (such as `role`) are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessagePart {
    pub content: String,
}

impl ScoreRow {
    /// One request per scored text. A missing answer is scored as "".
    pub fn requests(&self) -> Vec<ScoreRequest> {
        let texts: Vec<&str> = match &self.completion {
            Completion::Text(text) => vec![text.as_str()],
            Completion::Messages(parts) => parts.iter().map(|p| p.content.as_str()).collect(),
        };
        texts
            .into_iter()
            .map(|completion| ScoreRequest {
                descriptor: TaskDescriptor::new(self.task.as_str()),
                completion: completion.to_string(),
                reference: Some(self.answer.clone().unwrap_or_default()),
                metadata: self.info.clone().unwrap_or_default(),
            })
            .collect()
    }

    /// The output object for this row and whether scoring failed.
    pub fn output(&self, results: Vec<Result<ScoreRecord, EngineError>>) -> (Value, bool) {
        let mut records = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(record) => records.push(record),
                Err(err) => {
                    return (json!({"task": self.task, "error": err.to_string()}), true);
                }
            }
        }

        match &self.completion {
            Completion::Text(_) => match records.pop() {
                Some(record) => (Value::Object(record.to_metrics()), false),
                None => (json!({"task": self.task, "error": "no score produced"}), true),
            },
            Completion::Messages(_) => {
                let mean = if records.is_empty() {
                    0.0
                } else {
                    records.iter().map(|r| r.score).sum::<f64>() / records.len() as f64
                };
                let parts: Vec<Value> = records
                    .iter()
                    .map(|r| Value::Object(r.to_metrics()))
                    .collect();
                let mut object = Map::new();
                object.insert("score".to_string(), Value::from(mean));
                object.insert("parts".to_string(), Value::Array(parts));
                (Value::Object(object), false)
            }
        }
    }
}

/// Parse JSONL, skipping blank lines.
pub fn parse_rows(input: &str) -> Result<Vec<ScoreRow>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<ScoreRow>(line)
                .with_context(|| format!("invalid row on line {}", index + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reward_core::{Diagnostics, RewardMentions};

    fn record(task: &str, score: f64) -> ScoreRecord {
        ScoreRecord {
            descriptor: TaskDescriptor::new(task),
            score,
            contributions: Vec::new(),
            contains_opposing: false,
            diagnostics: Diagnostics::default(),
            mentions: RewardMentions::default(),
            failures: Vec::new(),
        }
    }

    #[test]
    fn test_parse_both_spellings() {
        let input = r#"{"task": "py_reward_loops", "completion": "x", "answer": "a", "info": {"k": 1}}

{"data_source": "memory_reward_json", "completion": "y", "ground_truth": "b", "extra_info": null}"#;
        let rows = parse_rows(input).expect("rows parse");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].task, "py_reward_loops");
        assert_eq!(rows[0].answer.as_deref(), Some("a"));
        assert_eq!(rows[1].task, "memory_reward_json");
        assert_eq!(rows[1].info, None);
    }

    #[test]
    fn test_parse_error_names_line() {
        let err = parse_rows("{\"task\": \"t\", \"completion\": \"x\"}\nnot json").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_message_parts_become_requests() {
        let rows = parse_rows(
            r#"{"task": "t", "completion": [{"role": "assistant", "content": "a"}, {"role": "assistant", "content": "b"}]}"#,
        )
        .expect("rows parse");
        let requests = rows[0].requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].completion, "b");
        assert_eq!(requests[0].reference.as_deref(), Some(""));
        assert!(requests[0].metadata.as_map().is_empty());
    }

    #[test]
    fn test_message_scores_are_averaged() {
        let rows =
            parse_rows(r#"{"task": "t", "completion": [{"content": "a"}, {"content": "b"}]}"#)
                .expect("rows parse");
        let (output, failed) = rows[0].output(vec![Ok(record("t", 1.0)), Ok(record("t", 2.0))]);
        assert!(!failed);
        assert_eq!(output["score"], json!(1.5));
        assert_eq!(output["parts"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_empty_message_list_scores_zero() {
        let rows = parse_rows(r#"{"task": "t", "completion": []}"#).expect("rows parse");
        assert!(rows[0].requests().is_empty());
        let (output, failed) = rows[0].output(Vec::new());
        assert!(!failed);
        assert_eq!(output["score"], json!(0.0));
    }

    #[test]
    fn test_errors_are_reported_per_row() {
        let rows = parse_rows(r#"{"task": "nothing", "completion": "x"}"#).expect("rows parse");
        let err = EngineError::UnroutableTask {
            descriptor: "nothing".to_string(),
        };
        let (output, failed) = rows[0].output(vec![Err(err)]);
        assert!(failed);
        assert_eq!(output["task"], "nothing");
        assert!(output["error"]
            .as_str()
            .is_some_and(|e| e.contains("matches no registered rule")));
    }
}
