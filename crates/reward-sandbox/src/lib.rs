//! Process-isolated execution of untrusted model output.
//!
//! - [`worker`]: one interpreter process per call, group-killed on expiry
//! - [`service`]: worker cap, counters and the in-process [`LocalSandbox`]
//! - [`server`]: axum router for `/message`, `/run_code` and `/health`

pub mod config;
pub mod error;
pub mod server;
pub mod service;
pub mod worker;

pub use config::SandboxServiceConfig;
pub use error::{Result, SandboxError};
pub use server::{build_router, serve};
pub use service::{HealthResponse, LocalSandbox, SandboxService, ServiceStats};
