//! HTTP face of the sandbox.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

use reward_core::validation::wire::{MessageRequest, RequestStatus, RunCodeRequest, RunCodeResponse};

use crate::config::SandboxServiceConfig;
use crate::error::SandboxError;
use crate::service::SandboxService;

pub const MESSAGE_ENDPOINT: &str = "/message";
pub const RUN_CODE_ENDPOINT: &str = "/run_code";
pub const HEALTH_ENDPOINT: &str = "/health";

pub fn build_router(service: Arc<SandboxService>) -> Router {
    Router::new()
        .route(MESSAGE_ENDPOINT, post(handle_message))
        .route(RUN_CODE_ENDPOINT, post(handle_run_code))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .with_state(service)
}

/// Serve until ctrl-c.
pub async fn serve(config: SandboxServiceConfig) -> Result<()> {
    config.validate()?;
    let bind_addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}': expected host:port", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind sandbox on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve sandbox listen address")?;

    info!(
        event = "sandbox.listening",
        addr = %local_addr,
        interpreter = %config.interpreter,
        budget_ms = config.budget_ms,
        max_workers = config.max_workers,
        "sandbox listening"
    );

    let service = Arc::new(SandboxService::new(config));
    let app = build_router(Arc::clone(&service));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("sandbox server exited unexpectedly")?;
    service.close();
    Ok(())
}

async fn handle_message(
    State(service): State<Arc<SandboxService>>,
    Json(request): Json<MessageRequest>,
) -> Response {
    match service.validate(&request.code).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn handle_run_code(
    State(service): State<Arc<SandboxService>>,
    Json(request): Json<RunCodeRequest>,
) -> Response {
    match service.run_code(&request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) if err.is_bad_request() => (
            StatusCode::BAD_REQUEST,
            Json(RunCodeResponse {
                status: RequestStatus::Failed,
                message: err.to_string(),
                run_result: None,
                files: Default::default(),
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn handle_health(State(service): State<Arc<SandboxService>>) -> Response {
    (StatusCode::OK, Json(service.health())).into_response()
}

fn error_response(err: &SandboxError) -> Response {
    warn!(error = %err, "sandbox request failed");
    let status = match err {
        SandboxError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({
            "status": false,
            "error": err.to_string(),
        })),
    )
        .into_response()
}
