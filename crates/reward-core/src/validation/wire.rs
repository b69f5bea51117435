//! Wire types shared by the sandbox client and the sandbox service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Error string the service reports when the primary budget ran out.
pub const TIMEOUT_ERROR: &str = "timeout";
/// Error string for a worker that died without producing a result.
pub const CRASH_ERROR: &str = "process_crashed";

/// `POST /message` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub code: String,
}

/// `POST /message` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageResponse {
    pub fn ok() -> Self {
        Self {
            status: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: false,
            error: Some(error.into()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(TIMEOUT_ERROR)
    }
}

fn default_language() -> String {
    "python".to_string()
}

fn default_run_timeout() -> f64 {
    0.2
}

/// `POST /run_code` body. File contents travel base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCodeRequest {
    pub code: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Budget in seconds.
    #[serde(default = "default_run_timeout")]
    pub run_timeout: f64,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub fetch_files: Vec<String>,
}

impl RunCodeRequest {
    pub fn python(code: impl Into<String>, run_timeout: f64) -> Self {
        Self {
            code: code.into(),
            language: default_language(),
            run_timeout,
            files: BTreeMap::new(),
            fetch_files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Finished,
    TimeLimitExceeded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    /// `None` when the process was killed before exiting on its own.
    pub return_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock seconds.
    pub execution_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Success,
    Failed,
    SandboxError,
}

/// `POST /run_code` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCodeResponse {
    pub status: RequestStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub run_result: Option<RunResult>,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl RunCodeResponse {
    /// The worker's exit code, if it exited on its own.
    pub fn return_code(&self) -> Option<i32> {
        self.run_result.as_ref().and_then(|r| r.return_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_response_omits_absent_error() {
        let json = serde_json::to_string(&MessageResponse::ok()).expect("serialize");
        assert_eq!(json, r#"{"status":true}"#);
        let timeout: MessageResponse =
            serde_json::from_str(r#"{"status":false,"error":"timeout"}"#).expect("deserialize");
        assert!(timeout.is_timeout());
    }

    #[test]
    fn test_run_code_request_defaults() {
        let req: RunCodeRequest = serde_json::from_str(r#"{"code":"print(1)"}"#).expect("parse");
        assert_eq!(req.language, "python");
        assert_eq!(req.run_timeout, 0.2);
        assert!(req.files.is_empty());
        assert!(req.fetch_files.is_empty());
    }

    #[test]
    fn test_return_code_of_killed_run_is_none() {
        let resp = RunCodeResponse {
            status: RequestStatus::Failed,
            message: String::new(),
            run_result: Some(RunResult {
                status: RunStatus::TimeLimitExceeded,
                return_code: None,
                stdout: String::new(),
                stderr: String::new(),
                execution_time: 1.0,
            }),
            files: BTreeMap::new(),
        };
        assert_eq!(resp.return_code(), None);
    }
}
