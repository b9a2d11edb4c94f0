use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use genoscan::config::EngineConfig;
use genoscan::invoker::CancelToken;
use genoscan::markers::MarkerDb;
use genoscan::pipeline::{
    run_concurrent, AnalysisSession, Orchestrator, ScreenDatabase, ToolSet, Workflow,
};
use genoscan::report::{self, WorkflowStatus};
use genoscan::seqio::GenomeInput;
use genoscan::store::ResultStore;

fn parse_percent(s: &str) -> Result<f64, String> {
    let val: f64 = s.parse().map_err(|_| format!("Invalid number: {}", s))?;
    if !(0.0..=100.0).contains(&val) {
        Err(format!("Percentage must be between 0 and 100, got {}", val))
    } else {
        Ok(val)
    }
}

#[derive(Parser)]
#[command(name = "genoscan")]
#[command(version)]
#[command(about = "Genome analysis pipeline: annotation, pathogen screening, phylogenetics, ANI")]
#[command(long_about = r#"
genoscan - genome analysis pipeline engine

Wraps a fixed set of analysis tools and merges their output into one
result per genome:

WORKFLOWS:
  annotation  Predict genes (prodigal); mode is chosen from assembly size
  screen      Search predicted proteins against resistance/virulence
              databases (blastp) and classify hits into threat findings
  phylo       Multiple-align the input taxa (mafft) and build a similarity
              tree (fasttree)
  compare     Align the genome against a reference (makeblastdb + blastn)
              and compute average nucleotide identity

OUTPUT FILES:
  findings.tsv    Threat findings across all genomes
    Columns: Genome, Query, Gene, Category, Severity, Identity, Coverage,
             Align_Len, E_Value, Subject
  analysis.json   Full result snapshot for the report layer
  scratch/        Raw per-run tool outputs (kept for inspection)

EXAMPLES:
  # Annotate and screen one assembly
  genoscan -g asm.fasta -w annotation,screen \
      --card-db db/card --card-markers db/card_markers.tsv \
      --vfdb-db db/vfdb --vfdb-markers db/vfdb_markers.tsv -o results/

  # ANI against a reference
  genoscan -g asm.fasta -w compare -r ref/ecoli_k12.fasta -o results/

  # Similarity tree over four assemblies
  genoscan -g asm.fasta --taxa a.fasta b.fasta c.fasta -w phylo -o results/
"#)]
struct Args {
    #[arg(short = 'g', long = "genome", value_name = "FILE", required = true, num_args(1..), help_heading = "Input")]
    genomes: Vec<PathBuf>,

    #[arg(long, value_name = "FILE", num_args(1..), help_heading = "Input")]
    taxa: Vec<PathBuf>,

    #[arg(short = 'r', long, value_name = "FILE", help_heading = "Input")]
    reference: Option<PathBuf>,

    #[arg(short = 'w', long = "workflows", value_name = "LIST", value_delimiter = ',',
          default_value = "annotation", help_heading = "Workflows")]
    workflows: Vec<WorkflowArg>,

    #[arg(long = "card-db", value_name = "PREFIX", help_heading = "Databases")]
    card_db: Option<PathBuf>,

    #[arg(long = "card-markers", value_name = "FILE", help_heading = "Databases")]
    card_markers: Option<PathBuf>,

    #[arg(long = "vfdb-db", value_name = "PREFIX", help_heading = "Databases")]
    vfdb_db: Option<PathBuf>,

    #[arg(long = "vfdb-markers", value_name = "FILE", help_heading = "Databases")]
    vfdb_markers: Option<PathBuf>,

    #[arg(short = 'c', long, value_name = "FILE", help_heading = "Thresholds")]
    config: Option<PathBuf>,

    #[arg(short = 'i', long = "min-identity", value_name = "PERCENT",
          value_parser = parse_percent, help_heading = "Thresholds")]
    min_identity: Option<f64>,

    #[arg(short = 'k', long = "min-coverage", value_name = "PERCENT",
          value_parser = parse_percent, help_heading = "Thresholds")]
    min_coverage: Option<f64>,

    #[arg(short = 'f', long = "min-fragment-len", value_name = "BP", help_heading = "Thresholds")]
    min_fragment_len: Option<u64>,

    #[arg(short = 'm', long = "mode-threshold", value_name = "BP", help_heading = "Thresholds")]
    mode_threshold_bp: Option<u64>,

    #[arg(long = "timeout", value_name = "SECS", help_heading = "Thresholds")]
    timeout_secs: Option<u64>,

    #[arg(short = 'o', long, value_name = "DIR", default_value = "output", help_heading = "Output")]
    outdir: PathBuf,

    #[arg(short = 't', long, value_name = "NUM", default_value = "0", help_heading = "Runtime")]
    threads: usize,

    #[arg(short = 'j', long = "concurrent-runs", value_name = "NUM", default_value = "2",
          help_heading = "Runtime")]
    concurrent_runs: usize,

    #[arg(short = 'v', long, help_heading = "Runtime")]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum WorkflowArg {
    Annotation,
    Screen,
    Phylo,
    Compare,
}

impl From<WorkflowArg> for Workflow {
    fn from(arg: WorkflowArg) -> Self {
        match arg {
            WorkflowArg::Annotation => Workflow::Annotation,
            WorkflowArg::Screen => Workflow::PathogenScreen,
            WorkflowArg::Phylo => Workflow::Phylogenetics,
            WorkflowArg::Compare => Workflow::ComparativeGenomics,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let start_time = Instant::now();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if args.verbose { "debug" } else { "info" },
    ))
    .init();

    // Configuration: file, then CLI overrides, then eager validation.
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(v) = args.min_identity {
        config.screen.min_identity = v;
    }
    if let Some(v) = args.min_coverage {
        config.screen.min_coverage = v;
    }
    if let Some(v) = args.min_fragment_len {
        config.comparative.min_fragment_len = v;
    }
    if let Some(v) = args.mode_threshold_bp {
        config.annotation.mode_threshold_bp = v;
    }
    if let Some(secs) = args.timeout_secs {
        config.annotation.timeout_secs = secs;
        config.screen.timeout_secs = secs;
        config.phylo.timeout_secs = secs;
        config.comparative.timeout_secs = secs;
    }
    config.validate()?;

    let mut workflows: Vec<Workflow> = args.workflows.iter().map(|&w| w.into()).collect();
    workflows.sort();
    workflows.dedup();

    // Everything a run needs is resolved and validated up front; a missing
    // tool or marker table must not surface halfway through an analysis.
    let tools = ToolSet::resolve(&workflows)?;

    let mut screen_dbs = Vec::new();
    let mut marker_paths: Vec<PathBuf> = Vec::new();
    if workflows.contains(&Workflow::PathogenScreen) {
        for (name, db, markers, evalue) in [
            ("card", &args.card_db, &args.card_markers, config.screen.card_evalue),
            ("vfdb", &args.vfdb_db, &args.vfdb_markers, config.screen.vfdb_evalue),
        ] {
            match (db, markers) {
                (Some(db), Some(markers)) => {
                    screen_dbs.push(ScreenDatabase {
                        name: name.to_string(),
                        blast_db: db.clone(),
                        evalue,
                    });
                    marker_paths.push(markers.clone());
                }
                (None, None) => {}
                _ => anyhow::bail!(
                    "--{name}-db and --{name}-markers must be given together",
                    name = name
                ),
            }
        }
        if screen_dbs.is_empty() {
            anyhow::bail!(
                "screen workflow requires at least one database \
                 (--card-db/--card-markers or --vfdb-db/--vfdb-markers)"
            );
        }
    }

    let markers = if marker_paths.is_empty() {
        MarkerDb::default()
    } else {
        let db = MarkerDb::load_merged(&marker_paths)?;
        info!("loaded {} marker records", db.len());
        db
    };

    let threads = if args.threads == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        args.threads
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();

    let reference = args
        .reference
        .as_ref()
        .map(|path| GenomeInput::load(path, config.annotation.mode_threshold_bp))
        .transpose()
        .context("Failed to load reference genome")?;

    let sessions: Vec<AnalysisSession> = args
        .genomes
        .iter()
        .map(|path| -> Result<AnalysisSession> {
            let genome = GenomeInput::load(path, config.annotation.mode_threshold_bp)?;
            info!(
                "loaded {}: {} bp, {} contigs, {:.1}% GC, {} mode",
                genome.id, genome.length_bp, genome.contigs, genome.gc_percent, genome.mode
            );
            Ok(AnalysisSession {
                genome,
                workflows: workflows.clone(),
                taxa: args.taxa.clone(),
                reference: reference.clone(),
            })
        })
        .collect::<Result<_>>()?;

    fs::create_dir_all(&args.outdir)
        .with_context(|| format!("Failed to create output dir {}", args.outdir.display()))?;

    let store = ResultStore::new();
    let orchestrator = Orchestrator {
        config: &config,
        tools: &tools,
        markers: &markers,
        store: &store,
        screen_dbs,
        scratch_root: args.outdir.join("scratch"),
        tool_threads: threads,
    };

    let cancel = CancelToken::new();
    let results = run_concurrent(&orchestrator, &sessions, &cancel, args.concurrent_runs);

    let findings_written = report::write_findings_tsv(&results, &args.outdir.join("findings.tsv"))?;
    report::write_json(&results, &args.outdir.join("analysis.json"))?;

    let failed: Vec<&str> = results
        .iter()
        .filter(|r| matches!(r.status, WorkflowStatus::Failed { .. }))
        .map(|r| r.genome_id.as_str())
        .collect();
    for result in &results {
        if let WorkflowStatus::Failed { reason } = &result.status {
            warn!("{}: {}", result.genome_id, reason);
        }
    }
    info!(
        "{} run(s), {} failed, {} findings written in {:.1}s",
        results.len(),
        failed.len(),
        findings_written,
        start_time.elapsed().as_secs_f64()
    );

    if !results.is_empty() && failed.len() == results.len() {
        anyhow::bail!("all runs failed");
    }
    Ok(())
}
