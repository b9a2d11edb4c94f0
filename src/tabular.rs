//! Tabular Alignment-Hit Parser Module
//!
//! Parses the fixed-column tabular output the engine requests from the
//! aligners. The column order is pinned by the `-outfmt` template built
//! here, so both sides of the contract live in one place.
//!
//! # Column layout
//! ```text
//! Col  Field    Description
//! 1    qseqid   Query sequence identifier
//! 2    sseqid   Subject (database) identifier
//! 3    pident   Percent identity
//! 4    length   Alignment length in residues
//! 5    qcovhsp  Query coverage of this alignment, percent
//! 6    evalue   Expectation value
//! 7    bitscore Bit score
//! ```
//!
//! Identity and coverage are clamped to [0,100]; some tool builds round
//! just outside the range when formatting.

use serde::Serialize;

use crate::seqio::ParseWarning;

/// Column names requested from the aligner, in parse order.
pub const OUTFMT_FIELDS: [&str; 7] = [
    "qseqid", "sseqid", "pident", "length", "qcovhsp", "evalue", "bitscore",
];

/// The `-outfmt` argument value matching [`OUTFMT_FIELDS`].
pub fn outfmt_spec() -> String {
    format!("6 {}", OUTFMT_FIELDS.join(" "))
}

/// One pairwise alignment between a query sequence and a database entry.
///
/// The same record shape serves pathogen screening and ANI computation;
/// only the database searched differs.
#[derive(Debug, Clone, Serialize)]
pub struct AlignmentHit {
    /// Query sequence identifier.
    pub query_id: String,
    /// Matched database entry identifier.
    pub subject_id: String,
    /// Percent identity, clamped to [0,100].
    pub identity: f64,
    /// Alignment length in residues.
    pub length: u64,
    /// Query coverage percent, clamped to [0,100].
    pub coverage: f64,
    /// Expectation value.
    pub evalue: f64,
    /// Bit score.
    pub bit_score: f64,
}

impl AlignmentHit {
    /// Parses one tab-separated hit line.
    fn parse_line(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < OUTFMT_FIELDS.len() {
            return Err(format!(
                "expected {} columns, found {}",
                OUTFMT_FIELDS.len(),
                fields.len()
            ));
        }

        let identity: f64 = parse_field(fields[2], "pident")?;
        let length: u64 = parse_field(fields[3], "length")?;
        let coverage: f64 = parse_field(fields[4], "qcovhsp")?;
        let evalue: f64 = parse_field(fields[5], "evalue")?;
        let bit_score: f64 = parse_field(fields[6], "bitscore")?;

        Ok(Self {
            query_id: fields[0].to_string(),
            subject_id: fields[1].to_string(),
            identity: identity.clamp(0.0, 100.0),
            length,
            coverage: coverage.clamp(0.0, 100.0),
            evalue,
            bit_score,
        })
    }
}

fn parse_field<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("invalid {} '{}'", name, raw))
}

/// Parses tabular hit text.
///
/// Empty lines and `#` comments are ignored; each malformed line is skipped
/// with one warning carrying its line number.
pub fn parse_hits(text: &str) -> (Vec<AlignmentHit>, Vec<ParseWarning>) {
    let mut hits = Vec::new();
    let mut warnings = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match AlignmentHit::parse_line(line) {
            Ok(hit) => hits.push(hit),
            Err(message) => warnings.push(ParseWarning::new(idx + 1, message)),
        }
    }

    (hits, warnings)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hit_line() {
        let text = "contig_1_5\tgb|AAC44793|blaTEM-1\t98.72\t286\t99.0\t1.2e-150\t523.1";
        let (hits, warnings) = parse_hits(text);
        assert!(warnings.is_empty());
        assert_eq!(hits.len(), 1);

        let hit = &hits[0];
        assert_eq!(hit.query_id, "contig_1_5");
        assert_eq!(hit.subject_id, "gb|AAC44793|blaTEM-1");
        assert_eq!(hit.identity, 98.72);
        assert_eq!(hit.length, 286);
        assert_eq!(hit.coverage, 99.0);
        assert_eq!(hit.bit_score, 523.1);
    }

    #[test]
    fn test_out_of_range_values_clamped() {
        let text = "q1\ts1\t100.01\t100\t-0.3\t1e-10\t200.0";
        let (hits, warnings) = parse_hits(text);
        assert!(warnings.is_empty());
        assert_eq!(hits[0].identity, 100.0);
        assert_eq!(hits[0].coverage, 0.0);
    }

    #[test]
    fn test_malformed_line_warns_with_line_number() {
        let text = "q1\ts1\t95.0\t100\t80.0\t1e-20\t180.5\nbroken line\nq2\ts2\t90.0\t120\t70.0\t1e-15\t150.0";
        let (hits, warnings) = parse_hits(text);
        assert_eq!(hits.len(), 2);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].line, 2);
    }

    #[test]
    fn test_non_numeric_field_warns() {
        let text = "q1\ts1\tNA\t100\t80.0\t1e-20\t180.5";
        let (hits, warnings) = parse_hits(text);
        assert!(hits.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("pident"));
    }

    #[test]
    fn test_outfmt_spec_matches_columns() {
        assert_eq!(
            outfmt_spec(),
            "6 qseqid sseqid pident length qcovhsp evalue bitscore"
        );
    }
}
