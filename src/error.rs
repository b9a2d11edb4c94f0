//! Engine Error Types
//!
//! Typed failure modes for the analysis engine. Execution-level problems
//! (missing tools, dead subprocesses, timeouts) abort the current run;
//! configuration problems are rejected before any subprocess is spawned.
//! Per-line parsing issues are NOT errors: parsers skip the offending line
//! and record a warning on the run instead.

use thiserror::Error;

/// Failure modes that abort a run or reject a session.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The named binary could not be resolved to an installed executable.
    #[error("{0} not found in PATH. Please install it or add it to your PATH.")]
    ToolNotFound(String),

    /// A tool exited nonzero and left no usable output to salvage.
    #[error("{tool} failed (exit code: {exit_code:?}): {detail}")]
    ToolExecutionFailed {
        tool: String,
        exit_code: Option<i32>,
        detail: String,
    },

    /// A tool exceeded its configured wall-clock budget and left no usable
    /// output to salvage.
    #[error("{tool} timed out after {secs}s")]
    ToolTimedOut { tool: String, secs: u64 },

    /// A threshold or limit is outside its valid range. Raised during
    /// session validation, never mid-run.
    #[error("invalid configuration: {0}")]
    ThresholdMisconfiguration(String),

    /// The run was cancelled cooperatively between stages, or an in-flight
    /// subprocess was terminated by the cancellation token.
    #[error("cancelled")]
    Cancelled,
}
