//! HTTP client for the sandbox service.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::wire::{MessageRequest, MessageResponse, RunCodeRequest, RunCodeResponse};
use super::{CodeRunner, CodeValidator, ValidationOutcome};
use crate::metrics::METRICS;

/// Snippet posted by [`HttpSandboxClient::probe`].
pub const PROBE_CODE: &str = "print('testing server')";

/// Transport-level failures talking to the sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxClientError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("sandbox answered with HTTP status {status}")]
    Status { status: u16 },

    #[error("malformed sandbox response: {0}")]
    Decode(String),

    #[error("sandbox unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for SandboxClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SandboxClientError::Decode(err.to_string())
        } else {
            SandboxClientError::Http(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxClientConfig {
    /// Base URL serving `/message`.
    pub endpoint: String,
    /// Base URL serving `/run_code`; defaults to `endpoint`.
    pub run_code_endpoint: Option<String>,
    /// Per-request timeout for `/message`, in milliseconds.
    pub request_timeout_ms: u64,
    /// Extra slack added on top of a `/run_code` budget, in milliseconds.
    pub run_code_slack_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for SandboxClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5555".to_string(),
            run_code_endpoint: None,
            request_timeout_ms: 5_000,
            run_code_slack_ms: 5_000,
            probe_timeout_ms: 20_000,
        }
    }
}

/// Talks to a running sandbox service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSandboxClient {
    config: SandboxClientConfig,
    http_client: reqwest::Client,
}

impl HttpSandboxClient {
    pub fn new(config: SandboxClientConfig) -> Result<Self, SandboxClientError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("reward-core/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &SandboxClientConfig {
        &self.config
    }

    fn url(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    async fn post_message(
        &self,
        code: &str,
        timeout: Duration,
    ) -> Result<MessageResponse, SandboxClientError> {
        let url = Self::url(&self.config.endpoint, "message");
        let response = self
            .http_client
            .post(&url)
            .timeout(timeout)
            .json(&MessageRequest {
                code: code.to_string(),
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SandboxClientError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(response.json::<MessageResponse>().await?)
    }

    /// Syntax/execution check of `code` through `POST /message`.
    pub async fn message(&self, code: &str) -> Result<MessageResponse, SandboxClientError> {
        self.post_message(code, Duration::from_millis(self.config.request_timeout_ms))
            .await
    }

    /// Post a trivial program and return the status the service reports.
    pub async fn probe(&self) -> Result<bool, SandboxClientError> {
        let response = self
            .post_message(PROBE_CODE, Duration::from_millis(self.config.probe_timeout_ms))
            .await?;
        debug!(status = response.status, error = ?response.error, "sandbox probe answered");
        Ok(response.status)
    }

    /// Run a program through `POST /run_code`.
    pub async fn execute(
        &self,
        request: &RunCodeRequest,
    ) -> Result<RunCodeResponse, SandboxClientError> {
        let base = self
            .config
            .run_code_endpoint
            .as_deref()
            .unwrap_or(&self.config.endpoint);
        let timeout = run_code_timeout(request.run_timeout, self.config.run_code_slack_ms);
        let response = self
            .http_client
            .post(Self::url(base, "run_code"))
            .timeout(timeout)
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SandboxClientError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(response.json::<RunCodeResponse>().await?)
    }
}

#[async_trait]
impl CodeValidator for HttpSandboxClient {
    async fn validate(&self, code: &str) -> ValidationOutcome {
        match self.message(code).await {
            Ok(response) => ValidationOutcome::from(response),
            Err(err) => {
                METRICS.inc_transport_failures();
                warn!(error = %err, "sandbox validation request failed");
                ValidationOutcome::transport_failure(&err)
            }
        }
    }
}

#[async_trait]
impl CodeRunner for HttpSandboxClient {
    async fn run_code(
        &self,
        request: &RunCodeRequest,
    ) -> Result<RunCodeResponse, SandboxClientError> {
        self.execute(request).await
    }
}

/// HTTP deadline for a `/run_code` call: the caller's budget plus slack,
/// saturating at `Duration::MAX`.
fn run_code_timeout(run_timeout: f64, slack_ms: u64) -> Duration {
    let budget = Duration::try_from_secs_f64(run_timeout.max(0.0)).unwrap_or(Duration::MAX);
    budget.saturating_add(Duration::from_millis(slack_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::wire::{RequestStatus, RunResult, RunStatus};
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> HttpSandboxClient {
        HttpSandboxClient::new(SandboxClientConfig {
            endpoint: server.base_url(),
            request_timeout_ms: 2_000,
            ..SandboxClientConfig::default()
        })
        .expect("client builds")
    }

    #[tokio::test]
    async fn test_validate_reports_valid_code() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock(|when, then| {
                when.method(POST)
                    .path("/message")
                    .json_body(json!({"code": "x = 1"}));
                then.status(200).json_body(json!({"status": true}));
            });

        let outcome = client_for(&server).validate("x = 1").await;
        mock.assert();
        assert!(outcome.valid);
        assert!(!outcome.timed_out);
        assert!(!outcome.exception);
    }

    #[tokio::test]
    async fn test_validate_flags_timeout() {
        let server = MockServer::start_async().await;
        server
            .mock(|when, then| {
                when.method(POST).path("/message");
                then.status(200)
                    .json_body(json!({"status": false, "error": "timeout"}));
            });

        let outcome = client_for(&server).validate("while True: pass").await;
        assert!(!outcome.valid);
        assert!(outcome.timed_out);
        assert_eq!(outcome.error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_server_error_becomes_invalid_with_exception() {
        let server = MockServer::start_async().await;
        server
            .mock(|when, then| {
                when.method(POST).path("/message");
                then.status(500).body("boom");
            });

        let outcome = client_for(&server).validate("x = 1").await;
        assert!(!outcome.valid);
        assert!(outcome.exception);
    }

    #[tokio::test]
    async fn test_malformed_body_becomes_invalid_with_exception() {
        let server = MockServer::start_async().await;
        server
            .mock(|when, then| {
                when.method(POST).path("/message");
                then.status(200).json_body(json!({"status": "yes"}));
            });

        let outcome = client_for(&server).validate("x = 1").await;
        assert!(!outcome.valid);
        assert!(outcome.exception);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_becomes_invalid() {
        let client = HttpSandboxClient::new(SandboxClientConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            request_timeout_ms: 500,
            ..SandboxClientConfig::default()
        })
        .expect("client builds");

        let outcome = client.validate("x = 1").await;
        assert!(!outcome.valid);
        assert!(outcome.exception);
    }

    #[tokio::test]
    async fn test_run_code_round_trip() {
        let server = MockServer::start_async().await;
        let expected = RunCodeResponse {
            status: RequestStatus::Success,
            message: String::new(),
            run_result: Some(RunResult {
                status: RunStatus::Finished,
                return_code: Some(0),
                stdout: "ok\n".to_string(),
                stderr: String::new(),
                execution_time: 0.05,
            }),
            files: Default::default(),
        };
        server
            .mock(|when, then| {
                when.method(POST)
                    .path("/run_code")
                    .json_body_includes(json!({"language": "python", "run_timeout": 1.0}).to_string());
                then.status(200)
                    .json_body(serde_json::to_value(&expected).expect("serialize"));
            });

        let response = client_for(&server)
            .run_code(&RunCodeRequest::python("print('ok')", 1.0))
            .await
            .expect("run_code succeeds");
        assert_eq!(response.return_code(), Some(0));
    }

    #[tokio::test]
    async fn test_probe_returns_reported_status() {
        let server = MockServer::start_async().await;
        server
            .mock(|when, then| {
                when.method(POST)
                    .path("/message")
                    .json_body(json!({"code": PROBE_CODE}));
                then.status(200).json_body(json!({"status": true}));
            });

        assert!(client_for(&server).probe().await.expect("probe answers"));
    }

    #[test]
    fn test_run_code_timeout_saturates() {
        assert_eq!(run_code_timeout(1.5, 500), Duration::from_millis(2_000));
        let near_max = Duration::MAX.as_secs_f64() - 1e4;
        assert_eq!(
            run_code_timeout(near_max, u64::MAX),
            Duration::MAX,
            "slack on a huge budget must not overflow"
        );
        assert_eq!(run_code_timeout(-3.0, 500), Duration::from_millis(500));
        assert_eq!(run_code_timeout(f64::NAN, 500), Duration::from_millis(500));
        assert_eq!(run_code_timeout(u64::MAX as f64, 500), Duration::MAX);
        assert_eq!(run_code_timeout(f64::INFINITY, 500), Duration::MAX);
    }
}
