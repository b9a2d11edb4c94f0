//! Result Store Module
//!
//! Session-scoped home for completed analysis results and the poll point
//! the presentation layer reads progress from. Runs own their result
//! exclusively while in flight and publish it here in one atomic insert on
//! completion, so readers only ever observe whole results. The engine
//! emits no events; consumers poll.

use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::report::AnalysisResult;

// ============================================================================
// Run progress
// ============================================================================

/// Observable position of a run in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Preparing,
    /// An external tool is in flight for the named stage.
    Running(String),
    /// A stage's raw output is being normalized.
    Parsing(String),
    Completed,
    Failed(String),
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Preparing => write!(f, "preparing"),
            RunState::Running(stage) => write!(f, "running {}", stage),
            RunState::Parsing(stage) => write!(f, "parsing {}", stage),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Shared handle a run updates and observers poll. Cloning shares state.
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    state: Arc<Mutex<RunState>>,
}

impl ProgressHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, state: RunState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn snapshot(&self) -> RunState {
        self.state.lock().unwrap().clone()
    }
}

// ============================================================================
// Result store
// ============================================================================

/// Holds one result per genome for the current session. Starting a new
/// analysis for a genome replaces its previous result wholesale; nothing
/// persists across sessions.
#[derive(Debug, Default)]
pub struct ResultStore {
    results: Mutex<FxHashMap<String, AnalysisResult>>,
    progress: Mutex<FxHashMap<String, ProgressHandle>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or re-registers) a run and returns its progress handle.
    pub fn register(&self, genome_id: &str) -> ProgressHandle {
        let handle = ProgressHandle::new();
        self.progress
            .lock()
            .unwrap()
            .insert(genome_id.to_string(), handle.clone());
        handle
    }

    /// Publishes a completed result atomically, replacing any previous
    /// result for the same genome.
    pub fn publish(&self, result: AnalysisResult) {
        self.results
            .lock()
            .unwrap()
            .insert(result.genome_id.clone(), result);
    }

    /// Read-only snapshot of one genome's result.
    pub fn snapshot(&self, genome_id: &str) -> Option<AnalysisResult> {
        self.results.lock().unwrap().get(genome_id).cloned()
    }

    /// All published results, ordered by genome id for stable output.
    pub fn all(&self) -> Vec<AnalysisResult> {
        let mut results: Vec<AnalysisResult> =
            self.results.lock().unwrap().values().cloned().collect();
        results.sort_by(|a, b| a.genome_id.cmp(&b.genome_id));
        results
    }

    /// Current progress of a registered run.
    pub fn progress(&self, genome_id: &str) -> Option<RunState> {
        self.progress
            .lock()
            .unwrap()
            .get(genome_id)
            .map(|h| h.snapshot())
    }
}

// ============================================================================
// Tests
// ============================================================================
