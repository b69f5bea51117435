//! Caller side of the sandbox boundary.
//!
//! Rules never see transport errors: a [`CodeValidator`] always answers with
//! a [`ValidationOutcome`], and failures to reach the sandbox are folded into
//! an invalid outcome with `exception` set.
//!
//! - [`wire`]: request/response bodies of `/message` and `/run_code`
//! - [`client`]: reqwest-based [`HttpSandboxClient`]

pub mod client;
pub mod wire;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

pub use client::{HttpSandboxClient, SandboxClientConfig, SandboxClientError};
pub use wire::{MessageRequest, MessageResponse, RunCodeRequest, RunCodeResponse};

use crate::domain::{Diagnostics, TaskDescriptor};
use crate::metrics::METRICS;
use crate::obs;

/// Verdict on one piece of candidate code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub timed_out: bool,
    pub error: Option<String>,
    /// The sandbox could not be consulted at all.
    pub exception: bool,
}

impl ValidationOutcome {
    pub fn valid() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    pub fn transport_failure(err: &dyn std::fmt::Display) -> Self {
        Self {
            valid: false,
            timed_out: false,
            error: Some(err.to_string()),
            exception: true,
        }
    }
}

impl From<MessageResponse> for ValidationOutcome {
    fn from(response: MessageResponse) -> Self {
        Self {
            valid: response.status,
            timed_out: response.is_timeout(),
            error: response.error,
            exception: false,
        }
    }
}

/// Checks that candidate code runs cleanly within the primary budget.
#[async_trait]
pub trait CodeValidator: Send + Sync {
    async fn validate(&self, code: &str) -> ValidationOutcome;
}

/// Runs a program with a caller budget and file staging.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run_code(
        &self,
        request: &RunCodeRequest,
    ) -> Result<RunCodeResponse, SandboxClientError>;
}

/// Per-evaluation wrapper that applies the non-code bypass and records
/// diagnostic flags for the [`crate::domain::ScoreRecord`].
///
/// Each validation overwrites the flags, so the record reflects the last
/// code the call validated.
pub struct RecordingValidator<'v> {
    inner: &'v dyn CodeValidator,
    non_code_families: &'v [String],
    bypass: bool,
    diagnostics: Arc<Mutex<Diagnostics>>,
}

impl<'v> RecordingValidator<'v> {
    pub fn new(
        inner: &'v dyn CodeValidator,
        descriptor: &TaskDescriptor,
        non_code_families: &'v [String],
    ) -> Self {
        Self {
            inner,
            non_code_families,
            bypass: descriptor.in_family(non_code_families),
            diagnostics: Arc::new(Mutex::new(Diagnostics::default())),
        }
    }

    /// A validator for a nested scoring call under another descriptor.
    /// Flags recorded through it land in the same record.
    pub fn rescoped(&self, descriptor: &TaskDescriptor) -> RecordingValidator<'v> {
        RecordingValidator {
            inner: self.inner,
            non_code_families: self.non_code_families,
            bypass: descriptor.in_family(self.non_code_families),
            diagnostics: Arc::clone(&self.diagnostics),
        }
    }

    /// Whether `code` is valid. Code from a non-code family is accepted
    /// without contacting the sandbox.
    pub async fn check(&self, code: &str) -> bool {
        if self.bypass {
            // Deliberately reports `valid_code = true` although no check ran;
            // the older metric read false for non-code families.
            self.record(Diagnostics {
                valid_code: true,
                ..Diagnostics::default()
            });
            return true;
        }

        METRICS.inc_sandbox_calls();
        let outcome = self.inner.validate(code).await;
        if outcome.timed_out {
            METRICS.inc_sandbox_timeouts();
        }
        obs::emit_sandbox_verdict(outcome.valid, outcome.timed_out, outcome.error.as_deref());

        self.record(Diagnostics {
            valid_code: outcome.valid,
            exception_in_run_code: outcome.exception,
            code_execution_timeout: outcome.timed_out,
        });
        outcome.valid
    }

    fn record(&self, diagnostics: Diagnostics) {
        match self.diagnostics.lock() {
            Ok(mut guard) => *guard = diagnostics,
            Err(poisoned) => *poisoned.into_inner() = diagnostics,
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        match self.diagnostics.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Validator that accepts everything, or rejects code containing a marker.
    pub struct FakeValidator {
        reject_marker: Option<&'static str>,
        timeout_marker: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl FakeValidator {
        pub fn accepting() -> Self {
            Self {
                reject_marker: None,
                timeout_marker: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn rejecting(marker: &'static str) -> Self {
            Self {
                reject_marker: Some(marker),
                ..Self::accepting()
            }
        }

        pub fn timing_out(marker: &'static str) -> Self {
            Self {
                timeout_marker: Some(marker),
                ..Self::accepting()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CodeValidator for FakeValidator {
        async fn validate(&self, code: &str) -> ValidationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.timeout_marker.is_some_and(|m| code.contains(m)) {
                return ValidationOutcome::from(MessageResponse::failed(wire::TIMEOUT_ERROR));
            }
            if self.reject_marker.is_some_and(|m| code.contains(m)) {
                return ValidationOutcome::from(MessageResponse::failed("SyntaxError"));
            }
            ValidationOutcome::valid()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeValidator;
    use super::*;

    fn families() -> Vec<String> {
        vec!["memory".to_string()]
    }

    #[tokio::test]
    async fn test_non_code_family_bypasses_sandbox() {
        let fake = FakeValidator::rejecting("x");
        let families = families();
        let validator = RecordingValidator::new(
            &fake,
            &TaskDescriptor::new("memory_reward_json"),
            &families,
        );
        assert!(validator.check("x = ").await);
        assert_eq!(fake.calls(), 0);
        assert!(validator.diagnostics().valid_code);
    }

    #[tokio::test]
    async fn test_diagnostics_follow_last_validation() {
        let fake = FakeValidator::timing_out("while");
        let families = families();
        let validator =
            RecordingValidator::new(&fake, &TaskDescriptor::new("reward_loops"), &families);

        assert!(!validator.check("while True: pass").await);
        let flags = validator.diagnostics();
        assert!(flags.code_execution_timeout);
        assert!(!flags.valid_code);

        assert!(validator.check("x = 1").await);
        let flags = validator.diagnostics();
        assert!(flags.valid_code);
        assert!(!flags.code_execution_timeout);
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn test_rescoped_validator_shares_flags() {
        let fake = FakeValidator::rejecting("bad");
        let families = families();
        let outer = RecordingValidator::new(
            &fake,
            &TaskDescriptor::new("memory_reward_filecontent"),
            &families,
        );
        let inner = outer.rescoped(&TaskDescriptor::new("reward_snake_case_shown"));
        assert!(!inner.check("bad code").await);
        assert_eq!(fake.calls(), 1);
        assert!(!outer.diagnostics().valid_code);
        assert!(outer.check("bad code").await);
        assert!(outer.diagnostics().valid_code);
    }

    #[tokio::test]
    async fn test_fresh_validator_starts_clear() {
        let fake = FakeValidator::accepting();
        let families = families();
        let validator =
            RecordingValidator::new(&fake, &TaskDescriptor::new("reward_loops"), &families);
        assert_eq!(validator.diagnostics(), Diagnostics::default());
    }
}
