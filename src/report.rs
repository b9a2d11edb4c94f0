//! Analysis Result Module
//!
//! The unified record a run builds up as its stages complete, and the
//! writers that hand it to the report/export layer: a findings TSV and a
//! machine-readable JSON snapshot. Raw tool outputs stay behind in the
//! per-run scratch directory; this module only deals in normalized records.
//!
//! Warnings accumulate here rather than being dropped, so a run that
//! finishes with warnings stays distinguishable from one that failed.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::ani::AniOutcome;
use crate::classifier::{ThreatFinding, ThreatSummary};
use crate::gff::GeneFeature;
use crate::newick::PhylogeneticTree;
use crate::seqio::ParseWarning;

// ============================================================================
// Workflow status
// ============================================================================

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkflowStatus {
    Completed,
    CompletedWithWarnings,
    Failed { reason: String },
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::CompletedWithWarnings => write!(f, "completed with warnings"),
            WorkflowStatus::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

// ============================================================================
// Analysis result
// ============================================================================

/// Everything a single run produced. Owned exclusively by its run while in
/// flight; published to the store as one atomic snapshot on completion and
/// replaced wholesale when a new session analyses the same genome.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub genome_id: String,
    pub status: WorkflowStatus,
    pub warnings: Vec<String>,
    pub genes: Option<Vec<GeneFeature>>,
    pub findings: Option<Vec<ThreatFinding>>,
    pub threat_summary: Option<ThreatSummary>,
    pub tree: Option<PhylogeneticTree>,
    pub ani: Option<AniOutcome>,
}

impl AnalysisResult {
    pub fn new(genome_id: impl Into<String>) -> Self {
        Self {
            genome_id: genome_id.into(),
            status: WorkflowStatus::Completed,
            warnings: Vec::new(),
            genes: None,
            findings: None,
            threat_summary: None,
            tree: None,
            ani: None,
        }
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Records parser warnings, prefixed with the producing stage so line
    /// numbers stay meaningful across heterogeneous outputs.
    pub fn extend_parse_warnings(&mut self, stage: &str, warnings: &[ParseWarning]) {
        for warning in warnings {
            self.warnings.push(format!("{}: {}", stage, warning));
        }
    }

    /// Marks the run failed. Any outputs already attached are kept; partial
    /// results are still useful for diagnosis.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = WorkflowStatus::Failed {
            reason: reason.into(),
        };
    }

    /// Settles the terminal status for a run that did not fail.
    pub fn finish(&mut self) {
        if matches!(self.status, WorkflowStatus::Failed { .. }) {
            return;
        }
        self.status = if self.warnings.is_empty() {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::CompletedWithWarnings
        };
    }
}

// ============================================================================
// Writers
// ============================================================================

/// Writes the findings from all runs as one TSV table.
pub fn write_findings_tsv(results: &[AnalysisResult], path: &Path) -> Result<usize> {
    let header =
        "Genome\tQuery\tGene\tCategory\tSeverity\tIdentity\tCoverage\tAlign_Len\tE_Value\tSubject";

    let mut output = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    writeln!(output, "{}", header)?;

    let mut written = 0usize;
    for result in results {
        for f in result.findings.iter().flatten() {
            writeln!(
                output,
                "{}\t{}\t{}\t{}\t{}\t{:.1}\t{:.1}\t{}\t{:.2e}\t{}",
                result.genome_id,
                f.query_id,
                f.gene_name,
                f.category,
                f.severity,
                f.identity,
                f.coverage,
                f.length,
                f.evalue,
                f.subject_id,
            )?;
            written += 1;
        }
    }

    Ok(written)
}

/// Writes the full result set as a JSON snapshot for the report layer.
pub fn write_json(results: &[AnalysisResult], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), results)
        .with_context(|| format!("Failed to serialize results to {}", path.display()))?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::{MarkerCategory, Severity};

    fn finding() -> ThreatFinding {
        ThreatFinding {
            query_id: "contig_1_5".into(),
            subject_id: "sub1".into(),
            gene_name: "blaTEM-1".into(),
            category: MarkerCategory::Resistance,
            severity: Severity::Critical,
            identity: 98.7,
            coverage: 99.0,
            length: 286,
            evalue: 1.2e-150,
        }
    }

    #[test]
    fn test_status_reflects_warnings() {
        let mut result = AnalysisResult::new("ecoli");
        result.finish();
        assert_eq!(result.status, WorkflowStatus::Completed);

        let mut result = AnalysisResult::new("ecoli");
        result.push_warning("no genes predicted");
        result.finish();
        assert_eq!(result.status, WorkflowStatus::CompletedWithWarnings);
    }

    #[test]
    fn test_failed_status_sticks_through_finish() {
        let mut result = AnalysisResult::new("ecoli");
        result.push_warning("partial output");
        result.fail("cancelled");
        result.finish();
        assert_eq!(
            result.status,
            WorkflowStatus::Failed {
                reason: "cancelled".into()
            }
        );
    }

    #[test]
    fn test_parse_warnings_carry_stage_and_line() {
        let mut result = AnalysisResult::new("ecoli");
        result.extend_parse_warnings("gff", &[ParseWarning::new(7, "start 9 greater than end 2")]);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].starts_with("gff: line 7:"));
    }

    #[test]
    fn test_findings_tsv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("findings.tsv");

        let mut result = AnalysisResult::new("ecoli");
        result.findings = Some(vec![finding()]);
        result.finish();

        let written = write_findings_tsv(&[result], &path).unwrap();
        assert_eq!(written, 1);

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("Genome\t"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("ecoli\tcontig_1_5\tblaTEM-1\tresistance\tcritical\t98.7\t99.0"));
    }

    #[test]
    fn test_json_snapshot_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.json");

        let mut result = AnalysisResult::new("ecoli");
        result.findings = Some(vec![finding()]);
        result.finish();
        write_json(&[result], &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"genome_id\": \"ecoli\""));
        assert!(text.contains("blaTEM-1"));
    }
}
