//! Average Nucleotide Identity Module
//!
//! Aggregates pairwise whole-genome alignment fragments into a single
//! identity/coverage score for a genome pair. Identity is the
//! length-weighted mean of per-fragment identity, so long alignments
//! dominate and short coincidental matches cannot skew the score.
//!
//! A comparison where no fragment survives the minimum-length filter is
//! *undefined*, which is a valid terminal state distinct from a genuine
//! low-similarity measurement of 0.

use rayon::prelude::*;
use serde::Serialize;

use crate::tabular::AlignmentHit;

/// An ANI measurement between two genomes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AniResult {
    pub query_id: String,
    pub reference_id: String,
    /// Length-weighted mean percent identity, in [0,100].
    pub identity: f64,
    /// Aligned fraction of the reference, percent, capped at 100.
    pub coverage: f64,
    /// Number of fragments contributing to the aggregate.
    pub fragments: usize,
}

/// Outcome of an ANI computation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AniOutcome {
    /// At least one fragment survived filtering.
    Defined(AniResult),
    /// Every fragment fell below the minimum length; no comparison exists.
    Undefined,
}

impl AniOutcome {
    pub fn is_defined(&self) -> bool {
        matches!(self, AniOutcome::Defined(_))
    }
}

/// Computes ANI from pairwise alignment fragments.
///
/// # Arguments
/// * `hits` - Alignment fragments between the query and the reference
/// * `query_id` / `reference_id` - Pair identifiers for the result
/// * `reference_len` - Reference genome length in bp, the coverage basis
/// * `min_fragment_len` - Fragments shorter than this are excluded
///
/// # Returns
/// `AniOutcome::Undefined` when zero fragments survive the filter,
/// otherwise the aggregate. The weighted sums are commutative, so the
/// result does not depend on fragment order.
pub fn compute_ani(
    hits: &[AlignmentHit],
    query_id: &str,
    reference_id: &str,
    reference_len: u64,
    min_fragment_len: u64,
) -> AniOutcome {
    let surviving: Vec<&AlignmentHit> = hits
        .iter()
        .filter(|h| h.length >= min_fragment_len)
        .collect();

    if surviving.is_empty() || reference_len == 0 {
        return AniOutcome::Undefined;
    }

    let (weighted_identity, aligned_len) = surviving
        .par_iter()
        .map(|h| (h.identity * h.length as f64, h.length))
        .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1));

    let identity = weighted_identity / aligned_len as f64;
    let coverage = (aligned_len as f64 / reference_len as f64 * 100.0).min(100.0);

    AniOutcome::Defined(AniResult {
        query_id: query_id.to_string(),
        reference_id: reference_id.to_string(),
        identity,
        coverage,
        fragments: surviving.len(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(identity: f64, length: u64) -> AlignmentHit {
        AlignmentHit {
            query_id: "query".into(),
            subject_id: "reference".into(),
            identity,
            length,
            coverage: 0.0,
            evalue: 1e-100,
            bit_score: 1000.0,
        }
    }

    fn ani(hits: &[AlignmentHit], min_len: u64) -> AniOutcome {
        compute_ani(hits, "query", "reference", 10_000, min_len)
    }

    #[test]
    fn test_length_weighted_mean() {
        // 4000 bp at 90% and 1000 bp at 100%:
        // (90*4000 + 100*1000) / 5000 = 92, not the arithmetic mean 95.
        let hits = vec![fragment(90.0, 4000), fragment(100.0, 1000)];
        match ani(&hits, 700) {
            AniOutcome::Defined(result) => {
                assert_eq!(result.identity, 92.0);
                assert_eq!(result.coverage, 50.0);
                assert_eq!(result.fragments, 2);
            }
            AniOutcome::Undefined => panic!("expected a defined result"),
        }
    }

    #[test]
    fn test_order_invariance() {
        let forward = vec![fragment(85.0, 2000), fragment(95.0, 1000), fragment(99.0, 4000)];
        let mut reversed = forward.clone();
        reversed.reverse();

        assert_eq!(ani(&forward, 700), ani(&reversed, 700));
    }

    #[test]
    fn test_short_fragments_filtered() {
        let hits = vec![fragment(50.0, 100), fragment(98.0, 2000)];
        match ani(&hits, 700) {
            AniOutcome::Defined(result) => {
                assert_eq!(result.fragments, 1);
                assert_eq!(result.identity, 98.0);
            }
            AniOutcome::Undefined => panic!("expected a defined result"),
        }
    }

    #[test]
    fn test_undefined_iff_all_filtered() {
        let hits = vec![fragment(99.0, 100), fragment(98.0, 400)];
        assert_eq!(ani(&hits, 700), AniOutcome::Undefined);
        assert!(ani(&hits, 100).is_defined());
    }

    #[test]
    fn test_undefined_on_empty_input() {
        assert_eq!(ani(&[], 700), AniOutcome::Undefined);
    }

    #[test]
    fn test_coverage_capped_at_hundred() {
        // 12000 aligned bp against a 10000 bp reference (overlapping
        // fragments) still reports 100%, not 120%.
        let hits = vec![fragment(99.0, 8000), fragment(99.0, 4000)];
        match ani(&hits, 700) {
            AniOutcome::Defined(result) => assert_eq!(result.coverage, 100.0),
            AniOutcome::Undefined => panic!("expected a defined result"),
        }
    }
}
