//! Threat Classifier Module
//!
//! Turns normalized alignment hits into ranked threat findings by matching
//! them against the session's marker database. A hit becomes a finding only
//! when its identity and coverage both clear the configured thresholds AND
//! a marker entry exists for the matched subject; everything else is
//! discarded, not kept as a low-confidence result.
//!
//! # Classification steps
//! 1. Drop hits below the identity or coverage threshold
//! 2. Drop hits with no marker entry (the expected common case)
//! 3. Deduplicate by query+subject, keeping the highest-identity hit
//! 4. Rank: severity desc, identity desc, subject id asc

use rustc_hash::FxHashMap;
use serde::Serialize;
use std::cmp::Ordering;

use crate::config::ScreenConfig;
use crate::markers::{MarkerCategory, MarkerDb, Severity};
use crate::tabular::AlignmentHit;

// ============================================================================
// Findings
// ============================================================================

/// A confirmed resistance or virulence gene detection.
#[derive(Debug, Clone, Serialize)]
pub struct ThreatFinding {
    /// Query sequence (predicted protein) that produced the hit.
    pub query_id: String,
    /// Matched database entry.
    pub subject_id: String,
    /// Marker gene name.
    pub gene_name: String,
    pub category: MarkerCategory,
    /// Tier from the marker record; never computed from identity.
    pub severity: Severity,
    pub identity: f64,
    pub coverage: f64,
    pub length: u64,
    pub evalue: f64,
}

/// Per-tier finding counts for the session summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThreatSummary {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub moderate: usize,
    pub informational: usize,
}

impl ThreatSummary {
    pub fn from_findings(findings: &[ThreatFinding]) -> Self {
        let mut summary = Self {
            total: findings.len(),
            ..Self::default()
        };
        for finding in findings {
            match finding.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Moderate => summary.moderate += 1,
                Severity::Informational => summary.informational += 1,
            }
        }
        summary
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Classifies alignment hits against the marker database.
///
/// # Arguments
/// * `hits` - Normalized hits in aligner output order
/// * `markers` - The session's read-only marker table
/// * `config` - Identity/coverage thresholds (validated at session start)
///
/// # Returns
/// Findings ranked by descending severity, then descending identity, with
/// the subject identifier as a deterministic tie-break.
pub fn classify(
    hits: &[AlignmentHit],
    markers: &MarkerDb,
    config: &ScreenConfig,
) -> Vec<ThreatFinding> {
    // Best hit per query+subject pair; a repeated pair keeps the higher
    // identity only.
    let mut best: FxHashMap<(String, String), &AlignmentHit> = FxHashMap::default();

    for hit in hits {
        if hit.identity < config.min_identity || hit.coverage < config.min_coverage {
            continue;
        }
        if markers.get(&hit.subject_id).is_none() {
            continue;
        }
        let key = (hit.query_id.clone(), hit.subject_id.clone());
        if let Some(existing) = best.get(&key) {
            if hit.identity > existing.identity {
                best.insert(key, hit);
            }
        } else {
            best.insert(key, hit);
        }
    }

    let mut findings: Vec<ThreatFinding> = best
        .into_values()
        .map(|hit| {
            // Lookup cannot fail: unmatched hits were dropped above.
            let marker = markers.get(&hit.subject_id).unwrap();
            ThreatFinding {
                query_id: hit.query_id.clone(),
                subject_id: hit.subject_id.clone(),
                gene_name: marker.gene_name.clone(),
                category: marker.category,
                severity: marker.severity,
                identity: hit.identity,
                coverage: hit.coverage,
                length: hit.length,
                evalue: hit.evalue,
            }
        })
        .collect();

    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| {
                b.identity
                    .partial_cmp(&a.identity)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.subject_id.cmp(&b.subject_id))
    });

    findings
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::MarkerRecord;

    fn hit(query: &str, subject: &str, identity: f64, coverage: f64) -> AlignmentHit {
        AlignmentHit {
            query_id: query.into(),
            subject_id: subject.into(),
            identity,
            length: 300,
            coverage,
            evalue: 1e-50,
            bit_score: 400.0,
        }
    }

    fn marker(subject: &str, gene: &str, severity: Severity) -> MarkerRecord {
        MarkerRecord {
            subject_id: subject.into(),
            gene_name: gene.into(),
            category: MarkerCategory::Resistance,
            severity,
        }
    }

    fn default_config() -> ScreenConfig {
        ScreenConfig::default()
    }

    #[test]
    fn test_thresholds_are_a_hard_floor() {
        let markers = MarkerDb::from_records([
            marker("s1", "blaTEM-1", Severity::Critical),
            marker("s2", "vanA", Severity::High),
            marker("s3", "tetM", Severity::Moderate),
        ]);
        let hits = vec![
            hit("q1", "s1", 79.9, 90.0), // identity below 80
            hit("q1", "s2", 95.0, 49.9), // coverage below 50
            hit("q1", "s3", 80.0, 50.0), // exactly at both thresholds
        ];

        let findings = classify(&hits, &markers, &default_config());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].gene_name, "tetM");
        for finding in &findings {
            assert!(finding.identity >= 80.0 && finding.coverage >= 50.0);
        }
    }

    #[test]
    fn test_unmatched_subject_discarded_silently() {
        // subjectX is Critical in the database; subjectY has no entry at
        // all, so it is discarded for absence of a match, not thresholds.
        let markers = MarkerDb::from_records([marker("subjectX", "blaTEM-1", Severity::Critical)]);
        let hits = vec![
            hit("q1", "subjectX", 95.0, 60.0),
            hit("q1", "subjectY", 70.0, 90.0),
        ];

        let findings = classify(&hits, &markers, &default_config());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].subject_id, "subjectX");
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn test_dedup_keeps_highest_identity() {
        let markers = MarkerDb::from_records([marker("s1", "blaTEM-1", Severity::High)]);
        let hits = vec![
            hit("q1", "s1", 91.0, 80.0),
            hit("q1", "s1", 97.5, 70.0),
            hit("q1", "s1", 85.0, 95.0),
        ];

        let findings = classify(&hits, &markers, &default_config());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].identity, 97.5);
    }

    #[test]
    fn test_same_subject_different_queries_both_kept() {
        let markers = MarkerDb::from_records([marker("s1", "blaTEM-1", Severity::High)]);
        let hits = vec![hit("q1", "s1", 95.0, 80.0), hit("q2", "s1", 90.0, 80.0)];

        let findings = classify(&hits, &markers, &default_config());
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn test_ranking_severity_then_identity_then_subject() {
        let markers = MarkerDb::from_records([
            marker("s_a", "geneA", Severity::Moderate),
            marker("s_b", "geneB", Severity::Critical),
            marker("s_c", "geneC", Severity::Critical),
            marker("s_d", "geneD", Severity::Critical),
        ]);
        let hits = vec![
            hit("q1", "s_a", 99.0, 90.0),
            hit("q1", "s_d", 92.0, 90.0),
            hit("q1", "s_c", 92.0, 90.0),
            hit("q1", "s_b", 96.0, 90.0),
        ];

        let findings = classify(&hits, &markers, &default_config());
        let order: Vec<&str> = findings.iter().map(|f| f.subject_id.as_str()).collect();
        // Critical before Moderate; within Critical, identity desc, then
        // subject id for the 92.0 tie.
        assert_eq!(order, vec!["s_b", "s_c", "s_d", "s_a"]);
    }

    #[test]
    fn test_summary_rollup() {
        let markers = MarkerDb::from_records([
            marker("s1", "geneA", Severity::Critical),
            marker("s2", "geneB", Severity::Critical),
            marker("s3", "geneC", Severity::Informational),
        ]);
        let hits = vec![
            hit("q1", "s1", 95.0, 80.0),
            hit("q2", "s2", 96.0, 80.0),
            hit("q3", "s3", 85.0, 70.0),
        ];

        let findings = classify(&hits, &markers, &default_config());
        let summary = ThreatSummary::from_findings(&findings);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.critical, 2);
        assert_eq!(summary.informational, 1);
        assert_eq!(summary.high, 0);
    }
}
