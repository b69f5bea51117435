//! Worker admission and service counters.
//!
//! [`SandboxService`] caps simultaneous workers with a semaphore and keeps
//! [`ServiceStats`]. [`LocalSandbox`] exposes it to the engine in-process,
//! with no HTTP hop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use reward_core::validation::wire::{
    MessageResponse, RunCodeRequest, RunCodeResponse, RunStatus, CRASH_ERROR,
};
use reward_core::{CodeRunner, CodeValidator, SandboxClientError, ValidationOutcome};

use crate::config::SandboxServiceConfig;
use crate::error::{Result, SandboxError};
use crate::worker;

/// Request counters, readable while the service runs.
#[derive(Debug, Default)]
pub struct ServiceStats {
    requests: AtomicU64,
    timeouts: AtomicU64,
    crashes: AtomicU64,
    errors: AtomicU64,
}

impl ServiceStats {
    fn record_message(&self, response: &MessageResponse) {
        if response.is_timeout() {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        } else if response.error.as_deref() == Some(CRASH_ERROR) {
            self.crashes.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_run(&self, response: &RunCodeResponse) {
        match response.run_result.as_ref() {
            Some(run) if run.status == RunStatus::TimeLimitExceeded => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            Some(run) if run.return_code.is_none() => {
                self.crashes.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn crashes(&self) -> u64 {
        self.crashes.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// `GET /health` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_workers: usize,
    pub max_workers: usize,
    pub requests: u64,
    pub timeouts: u64,
    pub crashes: u64,
    pub errors: u64,
}

pub struct SandboxService {
    config: SandboxServiceConfig,
    permits: Semaphore,
    stats: ServiceStats,
}

impl SandboxService {
    pub fn new(config: SandboxServiceConfig) -> Self {
        let permits = Semaphore::new(config.max_workers.max(1));
        Self {
            config,
            permits,
            stats: ServiceStats::default(),
        }
    }

    pub fn config(&self) -> &SandboxServiceConfig {
        &self.config
    }

    pub fn stats(&self) -> &ServiceStats {
        &self.stats
    }

    pub fn active_workers(&self) -> usize {
        self.config
            .max_workers
            .max(1)
            .saturating_sub(self.permits.available_permits())
    }

    pub async fn validate(&self, code: &str) -> Result<MessageResponse> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SandboxError::ShuttingDown)?;
        match worker::validate(&self.config, code).await {
            Ok(response) => {
                self.stats.record_message(&response);
                Ok(response)
            }
            Err(err) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    pub async fn run_code(&self, request: &RunCodeRequest) -> Result<RunCodeResponse> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SandboxError::ShuttingDown)?;
        match worker::run_code(&self.config, request).await {
            Ok(response) => {
                self.stats.record_run(&response);
                Ok(response)
            }
            Err(err) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            active_workers: self.active_workers(),
            max_workers: self.config.max_workers,
            requests: self.stats.requests(),
            timeouts: self.stats.timeouts(),
            crashes: self.stats.crashes(),
            errors: self.stats.errors(),
        }
    }

    /// Stop admitting workers; requests already running finish normally.
    pub fn close(&self) {
        self.permits.close();
        info!(
            event = "sandbox.closed",
            requests = self.stats.requests(),
            timeouts = self.stats.timeouts(),
            crashes = self.stats.crashes(),
            "sandbox stopped admitting workers"
        );
    }
}

/// In-process sandbox for the engine, sharing one worker cap.
#[derive(Clone)]
pub struct LocalSandbox {
    service: Arc<SandboxService>,
}

impl LocalSandbox {
    pub fn new(config: SandboxServiceConfig) -> Self {
        Self::from_service(Arc::new(SandboxService::new(config)))
    }

    pub fn from_service(service: Arc<SandboxService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<SandboxService> {
        &self.service
    }
}

#[async_trait]
impl CodeValidator for LocalSandbox {
    async fn validate(&self, code: &str) -> ValidationOutcome {
        match self.service.validate(code).await {
            Ok(response) => ValidationOutcome::from(response),
            Err(err) => {
                warn!(error = %err, "local sandbox failed to validate");
                ValidationOutcome::transport_failure(&err)
            }
        }
    }
}

#[async_trait]
impl CodeRunner for LocalSandbox {
    async fn run_code(
        &self,
        request: &RunCodeRequest,
    ) -> std::result::Result<RunCodeResponse, SandboxClientError> {
        self.service
            .run_code(request)
            .await
            .map_err(|err| SandboxClientError::Unavailable(err.to_string()))
    }
}
