//! One-shot interpreter processes.
//!
//! Every call spawns a fresh interpreter in its own process group, inside a
//! fresh scratch directory that is removed afterwards. When the budget runs
//! out the whole group receives SIGTERM, then SIGKILL after the grace
//! period, and the worker is always reaped.

use std::collections::BTreeMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Component, Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use reward_core::validation::wire::{
    MessageResponse, RequestStatus, RunCodeRequest, RunCodeResponse, RunResult, RunStatus,
    CRASH_ERROR, TIMEOUT_ERROR,
};

use crate::config::SandboxServiceConfig;
use crate::error::{Result, SandboxError};

const CANDIDATE_FILE: &str = "candidate.py";
const MAIN_FILE: &str = "main.py";
pub const SUPPORTED_LANGUAGE: &str = "python";

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Ended on its own, normally or through a signal it raised itself.
    Exited(ExitStatus),
    /// Outlived its budget and was torn down.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct Finished {
    pub exit: Exit,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

/// Check `code` the way `/message` does: run it once within the configured
/// budget and report whether it completed cleanly.
pub async fn validate(config: &SandboxServiceConfig, code: &str) -> Result<MessageResponse> {
    let scratch = tempfile::tempdir()?;
    tokio::fs::write(scratch.path().join(CANDIDATE_FILE), code).await?;
    let finished = run_interpreter(config, scratch.path(), CANDIDATE_FILE, config.budget()).await?;
    Ok(classify(&finished))
}

/// Verdict of a `/message` check.
pub fn classify(finished: &Finished) -> MessageResponse {
    match finished.exit {
        Exit::TimedOut => MessageResponse::failed(TIMEOUT_ERROR),
        Exit::Exited(status) if status.success() => MessageResponse::ok(),
        Exit::Exited(status) if status.signal().is_some() => MessageResponse::failed(CRASH_ERROR),
        Exit::Exited(_) => match last_line(&finished.stderr) {
            Some(line) => MessageResponse::failed(line),
            None => MessageResponse::failed(CRASH_ERROR),
        },
    }
}

/// Run a program with the caller's budget, staging `files` before the run
/// and returning `fetch_files` after it.
pub async fn run_code(
    config: &SandboxServiceConfig,
    request: &RunCodeRequest,
) -> Result<RunCodeResponse> {
    if request.language != SUPPORTED_LANGUAGE {
        return Err(SandboxError::UnsupportedLanguage(request.language.clone()));
    }
    let budget = Duration::try_from_secs_f64(request.run_timeout)
        .map_err(|_| SandboxError::InvalidBudget(request.run_timeout))?;

    let scratch = tempfile::tempdir()?;
    for (name, encoded) in &request.files {
        let bytes = BASE64.decode(encoded).map_err(|source| SandboxError::Decode {
            name: name.clone(),
            source,
        })?;
        let path = scratch_path(scratch.path(), name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
    }
    tokio::fs::write(scratch.path().join(MAIN_FILE), &request.code).await?;

    let finished = run_interpreter(config, scratch.path(), MAIN_FILE, budget).await?;

    let mut files = BTreeMap::new();
    for name in &request.fetch_files {
        let path = scratch_path(scratch.path(), name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                files.insert(name.clone(), BASE64.encode(bytes));
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %name, "requested file was not produced");
            }
            Err(err) => return Err(err.into()),
        }
    }

    let (run_status, return_code) = match finished.exit {
        Exit::TimedOut => (RunStatus::TimeLimitExceeded, None),
        Exit::Exited(status) => (RunStatus::Finished, status.code()),
    };
    let (status, message) = match (run_status, return_code) {
        (RunStatus::Finished, Some(0)) => (RequestStatus::Success, String::new()),
        (RunStatus::TimeLimitExceeded, _) => (RequestStatus::Failed, TIMEOUT_ERROR.to_string()),
        (_, Some(code)) => (RequestStatus::Failed, format!("exit status {code}")),
        (_, None) => (RequestStatus::Failed, CRASH_ERROR.to_string()),
    };

    Ok(RunCodeResponse {
        status,
        message,
        run_result: Some(RunResult {
            status: run_status,
            return_code,
            stdout: String::from_utf8_lossy(&finished.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&finished.stderr).into_owned(),
            execution_time: finished.elapsed.as_secs_f64(),
        }),
        files,
    })
}

/// Spawn the interpreter on `script` inside `scratch` and wait for it, at
/// most `budget` plus the grace period plus the reap.
pub async fn run_interpreter(
    config: &SandboxServiceConfig,
    scratch: &Path,
    script: &str,
    budget: Duration,
) -> Result<Finished> {
    let started = Instant::now();
    let mut child = Command::new(&config.interpreter)
        .arg(script)
        .current_dir(scratch)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SandboxError::Spawn {
            interpreter: config.interpreter.clone(),
            source,
        })?;
    let pid = child.id();
    let stdout = drain(child.stdout.take(), config.max_output_bytes);
    let stderr = drain(child.stderr.take(), config.max_output_bytes);

    let exit = match tokio::time::timeout(budget, child.wait()).await {
        Ok(status) => Exit::Exited(status?),
        Err(_) => {
            terminate(&mut child, pid, config.grace()).await?;
            Exit::TimedOut
        }
    };
    let elapsed = started.elapsed();
    // Descendants may outlive the leader; the group goes down with it.
    signal_group(pid, Signal::SIGKILL);

    let stdout = collect(stdout, config.grace()).await;
    let stderr = collect(stderr, config.grace()).await;
    debug!(?pid, ?exit, elapsed_ms = elapsed.as_millis() as u64, "worker finished");
    Ok(Finished {
        exit,
        stdout,
        stderr,
        elapsed,
    })
}

async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) -> Result<ExitStatus> {
    signal_group(pid, Signal::SIGTERM);
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return Ok(status?);
    }
    signal_group(pid, Signal::SIGKILL);
    // Covers a leader that left its group.
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "worker already gone");
    }
    Ok(child.wait().await?)
}

fn signal_group(pid: Option<u32>, signal: Signal) {
    let Some(pid) = pid else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!(pid, ?signal, error = %err, "failed to signal worker group"),
    }
}

/// Read a pipe to its end, keeping the first `limit` bytes.
fn drain<R>(pipe: Option<R>, limit: usize) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut kept = Vec::new();
        let Some(pipe) = pipe else {
            return kept;
        };
        let mut head = pipe.take(limit as u64);
        if head.read_to_end(&mut kept).await.is_ok() {
            let _ = tokio::io::copy(&mut head.into_inner(), &mut tokio::io::sink()).await;
        }
        kept
    })
}

/// Output of a reader task; a descendant that escaped the group may hold the
/// pipe open, so waiting is bounded.
async fn collect(mut reader: JoinHandle<Vec<u8>>, wait: Duration) -> Vec<u8> {
    match tokio::time::timeout(wait.max(Duration::from_millis(50)), &mut reader).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(err)) => {
            warn!(error = %err, "output reader failed");
            Vec::new()
        }
        Err(_) => {
            reader.abort();
            Vec::new()
        }
    }
}

/// The last non-blank line of `stderr`, typically `ExceptionType: message`.
pub fn last_line(stderr: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stderr)
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Resolve a caller-supplied relative path inside `scratch`.
pub fn scratch_path(scratch: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let confined = !name.is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if !confined {
        return Err(SandboxError::InvalidPath(name.to_string()));
    }
    Ok(scratch.join(relative))
}
