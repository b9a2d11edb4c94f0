//! Pipeline Orchestrator Module
//!
//! Sequences the external tools into named workflows and assembles the
//! unified analysis result. Each run walks a fixed stage list for its
//! workflows, blocking on one subprocess at a time; independent runs for
//! different genomes execute concurrently and share nothing mutable except
//! the read-only marker database.
//!
//! # Workflows
//! - **Annotation**: gene caller → GFF3 + protein listing
//! - **PathogenScreen**: protein aligner per marker database → classify
//! - **Phylogenetics**: MSA aligner → tree builder → tree text
//! - **ComparativeGenomics**: reference DB build → pairwise aligner → ANI
//!
//! # Failure policy
//! A tool that exits nonzero (or times out) with no usable output fails the
//! run with the captured stderr as detail. If usable partial output exists
//! the run degrades to a warning and keeps parsing. External tool failures
//! are never retried; a deterministic local computation rarely changes its
//! mind on a second attempt.

use anyhow::{Context, Result};
use log::{info, warn};
use rustc_hash::FxHashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::ani;
use crate::classifier::{self, ThreatSummary};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::gff;
use crate::invoker::{self, CancelToken, ExecutionOutcome};
use crate::markers::MarkerDb;
use crate::newick;
use crate::report::AnalysisResult;
use crate::seqio::{self, GenomeInput, ParseWarning};
use crate::store::{ProgressHandle, ResultStore, RunState};
use crate::tabular;

// ============================================================================
// Workflows and tools
// ============================================================================

/// The fixed workflow set. The declaration order is the canonical stage
/// order within a run: screening consumes annotation's protein listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Workflow {
    Annotation,
    PathogenScreen,
    Phylogenetics,
    ComparativeGenomics,
}

impl Workflow {
    /// Tools a workflow invokes, resolved before any run starts.
    pub fn required_tools(self) -> &'static [ToolId] {
        match self {
            Workflow::Annotation => &[ToolId::GeneCaller],
            Workflow::PathogenScreen => &[ToolId::ProteinAligner],
            Workflow::Phylogenetics => &[ToolId::MsaAligner, ToolId::TreeBuilder],
            Workflow::ComparativeGenomics => &[ToolId::MakeBlastDb, ToolId::NucleotideAligner],
        }
    }
}

/// The external binaries the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolId {
    GeneCaller,
    ProteinAligner,
    NucleotideAligner,
    MakeBlastDb,
    MsaAligner,
    TreeBuilder,
}

impl ToolId {
    /// Binary name looked up on PATH.
    pub fn binary_name(self) -> &'static str {
        match self {
            ToolId::GeneCaller => "prodigal",
            ToolId::ProteinAligner => "blastp",
            ToolId::NucleotideAligner => "blastn",
            ToolId::MakeBlastDb => "makeblastdb",
            ToolId::MsaAligner => "mafft",
            ToolId::TreeBuilder => "fasttree",
        }
    }
}

/// Resolved binary paths for the session.
#[derive(Debug, Default)]
pub struct ToolSet {
    tools: FxHashMap<ToolId, PathBuf>,
}

impl ToolSet {
    /// Resolves every tool the requested workflows need. Missing binaries
    /// are reported before anything runs.
    pub fn resolve(workflows: &[Workflow]) -> Result<Self, EngineError> {
        let mut tools = FxHashMap::default();
        for workflow in workflows {
            for &id in workflow.required_tools() {
                if !tools.contains_key(&id) {
                    let path = invoker::find_executable(id.binary_name())?;
                    info!("found {}: {}", id.binary_name(), path.display());
                    tools.insert(id, path);
                }
            }
        }
        Ok(Self { tools })
    }

    fn get(&self, id: ToolId) -> Result<&Path, EngineError> {
        self.tools
            .get(&id)
            .map(PathBuf::as_path)
            .ok_or_else(|| EngineError::ToolNotFound(id.binary_name().to_string()))
    }
}

/// A marker database to screen against: the formatted alignment database
/// plus the e-value cutoff for its search.
#[derive(Debug, Clone)]
pub struct ScreenDatabase {
    /// Short label used in stage names and scratch file names.
    pub name: String,
    /// Path prefix of the formatted protein database.
    pub blast_db: PathBuf,
    pub evalue: f64,
}

/// One analysis request: a primary genome, the workflows to run on it, and
/// the extra inputs some workflows need.
#[derive(Debug, Clone)]
pub struct AnalysisSession {
    pub genome: GenomeInput,
    pub workflows: Vec<Workflow>,
    /// Additional taxa for the phylogenetics workflow.
    pub taxa: Vec<PathBuf>,
    /// Reference genome for comparative genomics.
    pub reference: Option<GenomeInput>,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Drives runs against a validated configuration and resolved tool set.
pub struct Orchestrator<'a> {
    pub config: &'a EngineConfig,
    pub tools: &'a ToolSet,
    pub markers: &'a MarkerDb,
    pub store: &'a ResultStore,
    /// Marker databases screened by the pathogen workflow, in order.
    pub screen_dbs: Vec<ScreenDatabase>,
    /// Parent of every per-run scratch directory. Raw tool outputs are
    /// left here for the report/export stage to clean up.
    pub scratch_root: PathBuf,
    /// Thread count handed to tools that accept one.
    pub tool_threads: usize,
}

impl<'a> Orchestrator<'a> {
    /// Executes one run to its terminal state and publishes the result.
    ///
    /// Never returns an error: every failure mode lands in the result's
    /// `Failed` status with the reason as detail, and the store always
    /// receives the terminal snapshot.
    pub fn run(&self, session: &AnalysisSession, cancel: &CancelToken) -> AnalysisResult {
        let progress = self.store.register(&session.genome.id);
        let mut result = AnalysisResult::new(&session.genome.id);
        progress.set(RunState::Preparing);

        match self.run_stages(session, cancel, &progress, &mut result) {
            Ok(()) => {
                result.finish();
                progress.set(RunState::Completed);
                info!("[{}] run {}", session.genome.id, result.status);
            }
            Err(e) => {
                let reason = failure_reason(&e);
                warn!("[{}] run failed: {}", session.genome.id, reason);
                result.fail(reason.clone());
                progress.set(RunState::Failed(reason));
            }
        }

        self.store.publish(result.clone());
        result
    }

    fn run_stages(
        &self,
        session: &AnalysisSession,
        cancel: &CancelToken,
        progress: &ProgressHandle,
        result: &mut AnalysisResult,
    ) -> Result<()> {
        let scratch = self.scratch_root.join(&session.genome.id);
        fs::create_dir_all(&scratch)
            .with_context(|| format!("Failed to create scratch dir {}", scratch.display()))?;

        let mut workflows = session.workflows.clone();
        workflows.sort();
        workflows.dedup();

        for workflow in &workflows {
            self.check_cancelled(cancel)?;
            match workflow {
                Workflow::Annotation => {
                    self.run_annotation(session, &scratch, cancel, progress, result)?
                }
                Workflow::PathogenScreen => {
                    self.run_screen(session, &scratch, cancel, progress, result)?
                }
                Workflow::Phylogenetics => {
                    self.run_phylogenetics(session, &scratch, cancel, progress, result)?
                }
                Workflow::ComparativeGenomics => {
                    self.run_comparative(session, &scratch, cancel, progress, result)?
                }
            }
        }
        Ok(())
    }

    fn check_cancelled(&self, cancel: &CancelToken) -> Result<(), EngineError> {
        if cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn timeout(&self, secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    // ------------------------------------------------------------------
    // Annotation
    // ------------------------------------------------------------------

    fn run_annotation(
        &self,
        session: &AnalysisSession,
        scratch: &Path,
        cancel: &CancelToken,
        progress: &ProgressHandle,
        result: &mut AnalysisResult,
    ) -> Result<()> {
        let genome = &session.genome;
        let gff_path = scratch.join(format!("{}.gff", genome.id));
        let faa_path = scratch.join(format!("{}.faa", genome.id));
        info!(
            "[{}] annotation in {} mode ({} bp, {} contigs)",
            genome.id, genome.mode, genome.length_bp, genome.contigs
        );

        progress.set(RunState::Running("annotation".into()));
        let args = vec![
            "-i".to_string(),
            path_arg(&genome.path),
            "-o".into(),
            path_arg(&gff_path),
            "-a".into(),
            path_arg(&faa_path),
            "-f".into(),
            "gff".into(),
            "-p".into(),
            genome.mode.as_tool_arg().into(),
            "-q".into(),
        ];
        let timeout_secs = self.config.annotation.timeout_secs;
        let outcome = invoker::invoke(
            self.tools.get(ToolId::GeneCaller)?,
            &args,
            scratch,
            self.timeout(timeout_secs),
            cancel,
        )?;

        let gff_text = fs::read_to_string(&gff_path).unwrap_or_default();
        settle_outcome("prodigal", &outcome, &gff_text, timeout_secs, result)?;

        progress.set(RunState::Parsing("annotation".into()));
        let doc = gff::parse_gff3(&gff_text);
        result.extend_parse_warnings("gff", &doc.warnings);

        let mut features = doc.features;
        let faa_text = fs::read_to_string(&faa_path).unwrap_or_default();
        let (proteins, faa_warnings) = seqio::parse_protein_listing(&faa_text);
        result.extend_parse_warnings("proteins", &faa_warnings);
        gff::attach_proteins(&mut features, &proteins);

        if features.is_empty() {
            result.push_warning("no genes predicted");
        }
        info!("[{}] {} genes predicted", genome.id, features.len());
        result.genes = Some(features);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pathogen screen
    // ------------------------------------------------------------------

    fn run_screen(
        &self,
        session: &AnalysisSession,
        scratch: &Path,
        cancel: &CancelToken,
        progress: &ProgressHandle,
        result: &mut AnalysisResult,
    ) -> Result<()> {
        let genome = &session.genome;
        let faa_path = scratch.join(format!("{}.faa", genome.id));
        if !faa_path.exists() {
            anyhow::bail!(
                "pathogen screen needs the protein listing from annotation; \
                 include the annotation workflow in this run"
            );
        }
        if self.screen_dbs.is_empty() {
            anyhow::bail!("pathogen screen requested but no marker databases configured");
        }

        let timeout_secs = self.config.screen.timeout_secs;
        let mut all_hits = Vec::new();

        for db in &self.screen_dbs {
            self.check_cancelled(cancel)?;
            let stage = format!("screen:{}", db.name);
            progress.set(RunState::Running(stage.clone()));

            let out_path = scratch.join(format!("{}_{}.tsv", genome.id, db.name));
            let args = vec![
                "-query".to_string(),
                path_arg(&faa_path),
                "-db".into(),
                path_arg(&db.blast_db),
                "-out".into(),
                path_arg(&out_path),
                "-outfmt".into(),
                tabular::outfmt_spec(),
                "-evalue".into(),
                format!("{:e}", db.evalue),
                "-max_target_seqs".into(),
                "1".into(),
                "-num_threads".into(),
                self.tool_threads.to_string(),
            ];
            let outcome = invoker::invoke(
                self.tools.get(ToolId::ProteinAligner)?,
                &args,
                scratch,
                self.timeout(timeout_secs),
                cancel,
            )?;

            let text = fs::read_to_string(&out_path).unwrap_or_default();
            settle_outcome(
                &format!("blastp[{}]", db.name),
                &outcome,
                &text,
                timeout_secs,
                result,
            )?;

            progress.set(RunState::Parsing(stage));
            let (hits, warnings) = tabular::parse_hits(&text);
            result.extend_parse_warnings(&format!("hits:{}", db.name), &warnings);
            info!("[{}] {}: {} hits", genome.id, db.name, hits.len());
            all_hits.extend(hits);
        }

        let findings = classifier::classify(&all_hits, self.markers, &self.config.screen);
        if findings.is_empty() {
            result.push_warning("no significant hits");
        }
        info!("[{}] {} threat findings", genome.id, findings.len());
        result.threat_summary = Some(ThreatSummary::from_findings(&findings));
        result.findings = Some(findings);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phylogenetics
    // ------------------------------------------------------------------

    fn run_phylogenetics(
        &self,
        session: &AnalysisSession,
        scratch: &Path,
        cancel: &CancelToken,
        progress: &ProgressHandle,
        result: &mut AnalysisResult,
    ) -> Result<()> {
        let genome = &session.genome;
        let mut inputs: Vec<PathBuf> = vec![genome.path.clone()];
        inputs.extend(session.taxa.iter().cloned());
        if inputs.len() < 2 {
            anyhow::bail!(
                "phylogenetics needs at least 2 taxa, got {} (add inputs with --taxa)",
                inputs.len()
            );
        }

        let combined = scratch.join("taxa.fasta");
        let (taxa_names, prep_warnings) =
            write_combined_fasta(&inputs, &combined, self.config.phylo.max_tree_seq_len)?;
        result.extend_parse_warnings("taxa", &prep_warnings);
        info!("[{}] aligning {} taxa", genome.id, taxa_names.len());

        let timeout_secs = self.config.phylo.timeout_secs;
        progress.set(RunState::Running("msa".into()));
        let msa_args = vec![
            "--auto".to_string(),
            "--quiet".into(),
            path_arg(&combined),
        ];
        let msa_outcome = invoker::invoke(
            self.tools.get(ToolId::MsaAligner)?,
            &msa_args,
            scratch,
            self.timeout(timeout_secs),
            cancel,
        )?;
        // The MSA aligner writes the alignment to stdout.
        settle_outcome("mafft", &msa_outcome, &msa_outcome.stdout, timeout_secs, result)?;
        let aligned = scratch.join("aligned.fasta");
        fs::write(&aligned, &msa_outcome.stdout)
            .with_context(|| format!("Failed to write {}", aligned.display()))?;

        self.check_cancelled(cancel)?;
        progress.set(RunState::Running("tree".into()));
        let tree_args = vec!["-nt".to_string(), "-quiet".into(), path_arg(&aligned)];
        let tree_outcome = invoker::invoke(
            self.tools.get(ToolId::TreeBuilder)?,
            &tree_args,
            scratch,
            self.timeout(timeout_secs),
            cancel,
        )?;
        settle_outcome(
            "fasttree",
            &tree_outcome,
            &tree_outcome.stdout,
            timeout_secs,
            result,
        )?;

        progress.set(RunState::Parsing("tree".into()));
        let (tree, warnings) = newick::parse_newick(&tree_outcome.stdout, Some(taxa_names.len()));
        result.extend_parse_warnings("tree", &warnings);
        result.tree = Some(tree);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Comparative genomics
    // ------------------------------------------------------------------

    fn run_comparative(
        &self,
        session: &AnalysisSession,
        scratch: &Path,
        cancel: &CancelToken,
        progress: &ProgressHandle,
        result: &mut AnalysisResult,
    ) -> Result<()> {
        let genome = &session.genome;
        let reference = session.reference.as_ref().ok_or_else(|| {
            anyhow::anyhow!("comparative genomics requires a reference genome (--reference)")
        })?;
        info!(
            "[{}] comparing against {} ({} bp)",
            genome.id, reference.id, reference.length_bp
        );

        let timeout_secs = self.config.comparative.timeout_secs;
        progress.set(RunState::Running("makeblastdb".into()));
        let db_prefix = scratch.join(format!("{}_refdb", reference.id));
        let db_args = vec![
            "-in".to_string(),
            path_arg(&reference.path),
            "-dbtype".into(),
            "nucl".into(),
            "-out".into(),
            path_arg(&db_prefix),
        ];
        let db_outcome = invoker::invoke(
            self.tools.get(ToolId::MakeBlastDb)?,
            &db_args,
            scratch,
            self.timeout(timeout_secs),
            cancel,
        )?;
        // A database build has no salvageable partial output.
        settle_outcome("makeblastdb", &db_outcome, "", timeout_secs, result)?;

        self.check_cancelled(cancel)?;
        progress.set(RunState::Running("pairwise".into()));
        let out_path = scratch.join(format!("{}_vs_{}.tsv", genome.id, reference.id));
        let align_args = vec![
            "-query".to_string(),
            path_arg(&genome.path),
            "-db".into(),
            path_arg(&db_prefix),
            "-out".into(),
            path_arg(&out_path),
            "-outfmt".into(),
            tabular::outfmt_spec(),
            "-evalue".into(),
            format!("{:e}", self.config.comparative.evalue),
            "-perc_identity".into(),
            format!("{}", self.config.comparative.min_identity),
            "-num_threads".into(),
            self.tool_threads.to_string(),
        ];
        let align_outcome = invoker::invoke(
            self.tools.get(ToolId::NucleotideAligner)?,
            &align_args,
            scratch,
            self.timeout(timeout_secs),
            cancel,
        )?;

        let text = fs::read_to_string(&out_path).unwrap_or_default();
        settle_outcome("blastn", &align_outcome, &text, timeout_secs, result)?;

        progress.set(RunState::Parsing("ani".into()));
        let (hits, warnings) = tabular::parse_hits(&text);
        result.extend_parse_warnings("ani", &warnings);

        let min_len = self.config.comparative.min_fragment_len;
        let outcome = ani::compute_ani(&hits, &genome.id, &reference.id, reference.length_bp, min_len);
        match &outcome {
            crate::ani::AniOutcome::Defined(ani) => info!(
                "[{}] ANI vs {}: {:.2}% identity, {:.1}% coverage ({} fragments)",
                genome.id, reference.id, ani.identity, ani.coverage, ani.fragments
            ),
            crate::ani::AniOutcome::Undefined => result.push_warning(format!(
                "no comparison: zero alignment fragments of at least {} bp",
                min_len
            )),
        }
        result.ani = Some(outcome);
        Ok(())
    }
}

// ============================================================================
// Outcome policy and helpers
// ============================================================================

/// Applies the failure policy to a tool outcome.
///
/// Clean exit passes through. A timeout or nonzero exit with usable output
/// degrades to a warning so parsing can salvage what exists; without usable
/// output the run fails with the captured stderr as detail.
fn settle_outcome(
    tool: &str,
    outcome: &ExecutionOutcome,
    salvage: &str,
    timeout_secs: u64,
    result: &mut AnalysisResult,
) -> Result<(), EngineError> {
    if outcome.success() {
        return Ok(());
    }

    if has_records(salvage) {
        let what = if outcome.timed_out {
            "timed out".to_string()
        } else {
            format!("exited nonzero ({:?})", outcome.exit_code)
        };
        warn!("{} {}; salvaging partial output", tool, what);
        result.push_warning(format!("{} {}; continuing with partial output", tool, what));
        return Ok(());
    }

    if outcome.timed_out {
        Err(EngineError::ToolTimedOut {
            tool: tool.to_string(),
            secs: timeout_secs,
        })
    } else {
        let stderr = outcome.stderr.trim();
        Err(EngineError::ToolExecutionFailed {
            tool: tool.to_string(),
            exit_code: outcome.exit_code,
            detail: if stderr.is_empty() {
                "no output produced".to_string()
            } else {
                stderr.to_string()
            },
        })
    }
}

/// True when text contains at least one non-comment, non-blank line.
fn has_records(text: &str) -> bool {
    text.lines()
        .any(|l| !l.trim().is_empty() && !l.starts_with('#'))
}

fn failure_reason(e: &anyhow::Error) -> String {
    match e.downcast_ref::<EngineError>() {
        Some(EngineError::Cancelled) => "cancelled".to_string(),
        _ => e.to_string(),
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Concatenates each input into one record per taxon, truncated to
/// `max_seq_len`, and writes the combined FASTA the MSA aligner reads.
///
/// # Returns
/// Taxon names in file order plus any parse warnings from the inputs.
fn write_combined_fasta(
    inputs: &[PathBuf],
    out_path: &Path,
    max_seq_len: usize,
) -> Result<(Vec<String>, Vec<ParseWarning>)> {
    let mut names = Vec::with_capacity(inputs.len());
    let mut warnings = Vec::new();
    let mut combined = String::new();

    for input in inputs {
        let mut text = String::new();
        seqio::open_text(input)?
            .read_to_string(&mut text)
            .with_context(|| format!("Failed to read {}", input.display()))?;

        let (records, record_warnings) = seqio::parse_fasta(&text);
        warnings.extend(record_warnings);

        let mut seq: String = records.iter().map(|r| r.seq.as_str()).collect();
        if seq.is_empty() {
            anyhow::bail!("no sequence data in {}", input.display());
        }
        seq.truncate(max_seq_len);

        let name = seqio::genome_id(input);
        combined.push_str(&format!(">{}\n{}\n", name, seq));
        names.push(name);
    }

    fs::write(out_path, combined)
        .with_context(|| format!("Failed to write {}", out_path.display()))?;
    Ok((names, warnings))
}

// ============================================================================
// Concurrent runs
// ============================================================================

/// Counting semaphore bounding how many runs execute at once.
struct Semaphore {
    permits: Mutex<usize>,
    cvar: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            cvar: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.cvar.wait(permits).unwrap();
        }
        *permits -= 1;
    }

    fn release(&self) {
        *self.permits.lock().unwrap() += 1;
        self.cvar.notify_one();
    }
}

/// Runs independent sessions concurrently, at most `max_concurrent` at a
/// time. All runs share one cancellation token; results come back sorted by
/// genome id.
pub fn run_concurrent(
    orchestrator: &Orchestrator<'_>,
    sessions: &[AnalysisSession],
    cancel: &CancelToken,
    max_concurrent: usize,
) -> Vec<AnalysisResult> {
    let semaphore = Semaphore::new(max_concurrent.max(1));
    let results: Mutex<Vec<AnalysisResult>> = Mutex::new(Vec::new());

    std::thread::scope(|s| {
        for session in sessions {
            let semaphore = &semaphore;
            let results = &results;
            s.spawn(move || {
                semaphore.acquire();
                let result = orchestrator.run(session, cancel);
                results.lock().unwrap().push(result);
                semaphore.release();
            });
        }
    });

    let mut results = results.into_inner().unwrap();
    results.sort_by(|a, b| a.genome_id.cmp(&b.genome_id));
    results
}

// ============================================================================
// Tests
// ============================================================================
