//! Tool Invoker Module
//!
//! Runs the wrapped analysis binaries. Invocations use explicit argument
//! vectors with no shell interpretation, so hostile file names cannot
//! inject commands. Each call blocks the owning run until the process
//! exits, times out, or the run's cancellation token fires; on timeout or
//! cancellation the child is killed and whatever output was captured is
//! still returned, since partial tabular output is often salvageable.
//!
//! Exit-status policy: a nonzero exit is NOT an error here. The invoker
//! reports what happened; deciding fatal versus recoverable belongs to the
//! orchestrator, which can see whether the output is usable.

use anyhow::{Context, Result};
use log::debug;
use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::EngineError;

/// How often an in-flight child is polled for exit/timeout/cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation signal shared between a run and its owner.
///
/// The orchestrator checks it between stages; the invoker checks it while a
/// child process is in flight and kills the child when it fires.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// What happened when a tool ran.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Exit code; `None` when the process was killed by a signal or by the
    /// timeout.
    pub exit_code: Option<i32>,
    /// Captured standard output, possibly partial.
    pub stdout: String,
    /// Captured standard error, possibly partial.
    pub stderr: String,
    /// True when the wall-clock budget elapsed and the child was killed.
    pub timed_out: bool,
}

impl ExecutionOutcome {
    /// True only for a clean zero exit without a timeout.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

// ============================================================================
// Binary resolution
// ============================================================================

/// Resolves a tool name to an installed binary.
///
/// Absolute paths are accepted as-is when they exist; bare names are walked
/// through PATH.
pub fn find_executable(name: &str) -> Result<PathBuf, EngineError> {
    let path = Path::new(name);
    if path.is_absolute() && path.exists() {
        return Ok(path.to_path_buf());
    }

    if let Ok(paths) = env::var("PATH") {
        for dir in env::split_paths(&paths) {
            let full_path = dir.join(name);
            if full_path.exists() && full_path.is_file() {
                return Ok(full_path);
            }
        }
    }

    Err(EngineError::ToolNotFound(name.to_string()))
}

// ============================================================================
// Invocation
// ============================================================================

/// Runs a tool to completion, timeout, or cancellation.
///
/// # Arguments
/// * `tool` - Resolved binary path
/// * `args` - Argument vector, passed through without shell interpretation
/// * `workdir` - Per-run scratch directory; tool output files land here and
///   are left in place for the report/export stage
/// * `timeout` - Wall-clock budget
/// * `cancel` - The owning run's cancellation token
///
/// # Errors
/// `EngineError::Cancelled` when the token fires mid-flight (the child is
/// killed first). Spawn failures surface as I/O errors. A timeout is NOT an
/// error: the outcome comes back with `timed_out = true` and partial output.
pub fn invoke(
    tool: &Path,
    args: &[String],
    workdir: &Path,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<ExecutionOutcome> {
    let tool_name = tool
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tool")
        .to_string();
    debug!("invoking {} {}", tool_name, args.join(" "));

    let mut child = Command::new(tool)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to spawn {}", tool_name))?;

    // Drain both pipes on their own threads so a chatty tool cannot
    // deadlock against a full pipe buffer while we poll.
    let stdout_pipe = child
        .stdout
        .take()
        .context("child stdout was not captured")?;
    let stderr_pipe = child
        .stderr
        .take()
        .context("child stderr was not captured")?;
    let stdout_handle = thread::spawn(move || read_all(stdout_pipe));
    let stderr_handle = thread::spawn(move || read_all(stderr_pipe));

    let start = Instant::now();
    let mut exit_code = None;
    let mut timed_out = false;
    let mut cancelled = false;

    loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("Failed to poll {}", tool_name))?
        {
            exit_code = status.code();
            break;
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            cancelled = true;
            break;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            timed_out = true;
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    if cancelled {
        debug!("{} killed by cancellation", tool_name);
        return Err(EngineError::Cancelled.into());
    }
    if timed_out {
        debug!("{} killed after {:?} timeout", tool_name, timeout);
    }

    Ok(ExecutionOutcome {
        exit_code,
        stdout,
        stderr,
        timed_out,
    })
}

fn read_all(mut pipe: impl Read) -> String {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn long_timeout() -> Duration {
        Duration::from_secs(30)
    }

    #[test]
    fn test_captures_stdout_and_exit_code() {
        let dir = scratch();
        let echo = find_executable("echo").unwrap();
        let outcome = invoke(
            &echo,
            &["hello".to_string()],
            dir.path(),
            long_timeout(),
            &CancelToken::new(),
        )
        .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout.trim(), "hello");
        assert!(!outcome.timed_out);
    }

    #[test]
    fn test_nonzero_exit_is_reported_not_raised() {
        let dir = scratch();
        let false_bin = find_executable("false").unwrap();
        let outcome = invoke(&false_bin, &[], dir.path(), long_timeout(), &CancelToken::new())
            .unwrap();

        assert!(!outcome.success());
        assert_eq!(outcome.exit_code, Some(1));
    }

    #[test]
    fn test_timeout_kills_and_reports_partial_state() {
        let dir = scratch();
        let sleep = find_executable("sleep").unwrap();
        let start = Instant::now();
        let outcome = invoke(
            &sleep,
            &["30".to_string()],
            dir.path(),
            Duration::from_millis(300),
            &CancelToken::new(),
        )
        .unwrap();

        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, None);
        // Killed promptly, not after the full 30s sleep.
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancellation_terminates_in_flight_child() {
        let dir = scratch();
        let sleep = find_executable("sleep").unwrap();
        let cancel = CancelToken::new();

        let canceller = cancel.clone();
        let killer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            canceller.cancel();
        });

        let start = Instant::now();
        let result = invoke(
            &sleep,
            &["30".to_string()],
            dir.path(),
            long_timeout(),
            &cancel,
        );
        killer.join().unwrap();

        let err = result.unwrap_err();
        assert!(err.downcast_ref::<EngineError>().is_some());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_unknown_tool_not_found() {
        assert!(matches!(
            find_executable("definitely-not-a-real-binary-9921"),
            Err(EngineError::ToolNotFound(_))
        ));
    }
}
