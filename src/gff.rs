//! GFF3 Feature Parser Module
//!
//! Parses the tabular annotation format written by the gene caller into
//! normalized gene features. Parsing is pure and soft-failing: malformed
//! lines are skipped with a per-line warning, never an error.
//!
//! # GFF3 Format (9 tab-separated columns)
//! ```text
//! Col  Field       Description
//! 1    seqid       Contig identifier
//! 2    source      Producing tool
//! 3    type        Feature type (only CDS and gene are kept)
//! 4    start       1-based start
//! 5    end         1-based inclusive end, start <= end
//! 6    score       Floating score or '.'
//! 7    strand      '+', '-' or '.'
//! 8    phase       Ignored
//! 9    attributes  ';'-separated key=value pairs
//! ```
//!
//! Comment lines start with `#`; the `##sequence-region` pragma carries the
//! region length and is surfaced separately when present.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::seqio::{ParseWarning, ProteinRecord};

// ============================================================================
// Gene features
// ============================================================================

/// A predicted gene feature, immutable once parsed.
#[derive(Debug, Clone, Serialize)]
pub struct GeneFeature {
    /// Contig the feature lies on (GFF column 1).
    pub contig: String,
    /// 1-based start (column 4).
    pub start: u64,
    /// 1-based inclusive end (column 5), never below `start`.
    pub end: u64,
    /// '+', '-' or '.' (column 7).
    pub strand: char,
    /// Caller score when provided (column 6).
    pub score: Option<f64>,
    /// `ID=` attribute when present (column 9).
    pub feature_id: Option<String>,
    /// Predicted protein sequence, joined from the protein listing.
    pub protein: Option<String>,
}

/// Outcome of parsing one GFF3 document.
#[derive(Debug, Clone, Default)]
pub struct GffDocument {
    pub features: Vec<GeneFeature>,
    /// Region length from the `##sequence-region` pragma, if declared.
    pub sequence_region_len: Option<u64>,
    pub warnings: Vec<ParseWarning>,
}

/// Feature types retained by the parser; everything else is ignored without
/// a warning (annotation output routinely interleaves other record types).
const KEPT_TYPES: [&str; 2] = ["CDS", "gene"];

/// Parses GFF3 text into gene features.
///
/// # Returns
/// A [`GffDocument`] with the surviving features and one warning per
/// skipped line. Lines are skipped for: fewer than 9 columns, unparsable
/// coordinates, `start > end`, or a strand outside `{+, -, .}`.
pub fn parse_gff3(text: &str) -> GffDocument {
    let mut doc = GffDocument::default();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end();

        if line.is_empty() {
            continue;
        }
        if let Some(pragma) = line.strip_prefix("##sequence-region") {
            // Format: ##sequence-region <seqid> <start> <end>
            if let Some(end) = pragma.split_whitespace().nth(2) {
                doc.sequence_region_len = end.parse().ok();
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        match parse_feature_line(line) {
            Ok(Some(feature)) => doc.features.push(feature),
            Ok(None) => {}
            Err(message) => doc.warnings.push(ParseWarning::new(line_no, message)),
        }
    }

    doc
}

/// Parses one feature line. `Ok(None)` means a valid line of an ignored
/// feature type; `Err` carries the warning text for a skipped line.
fn parse_feature_line(line: &str) -> Result<Option<GeneFeature>, String> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 9 {
        return Err(format!("expected 9 columns, found {}", fields.len()));
    }

    if !KEPT_TYPES.contains(&fields[2]) {
        return Ok(None);
    }

    let start: u64 = fields[3]
        .parse()
        .map_err(|_| format!("invalid start '{}'", fields[3]))?;
    let end: u64 = fields[4]
        .parse()
        .map_err(|_| format!("invalid end '{}'", fields[4]))?;
    if start > end {
        return Err(format!("start {} greater than end {}", start, end));
    }

    let strand = match fields[6] {
        "+" => '+',
        "-" => '-',
        "." => '.',
        other => return Err(format!("invalid strand '{}'", other)),
    };

    let score = match fields[5] {
        "." => None,
        s => Some(s.parse().map_err(|_| format!("invalid score '{}'", s))?),
    };

    Ok(Some(GeneFeature {
        contig: fields[0].to_string(),
        start,
        end,
        strand,
        score,
        feature_id: attribute(fields[8], "ID"),
        protein: None,
    }))
}

/// Extracts a `key=value` attribute from GFF column 9.
fn attribute(attributes: &str, key: &str) -> Option<String> {
    attributes.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == key && !v.is_empty()).then(|| v.to_string())
    })
}

// ============================================================================
// Protein joining
// ============================================================================

/// Joins predicted proteins onto features by (contig, start, end).
///
/// The gene caller emits the same coordinates in both files, so an exact
/// coordinate match identifies the protein for a feature. Features without
/// a matching protein are left untouched.
pub fn attach_proteins(features: &mut [GeneFeature], proteins: &[ProteinRecord]) {
    let by_coords: FxHashMap<(&str, u64, u64), &ProteinRecord> = proteins
        .iter()
        .map(|p| ((p.contig.as_str(), p.start, p.end), p))
        .collect();

    for feature in features.iter_mut() {
        if let Some(protein) =
            by_coords.get(&(feature.contig.as_str(), feature.start, feature.end))
        {
            feature.protein = Some(protein.seq.clone());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(start: u64, end: u64, strand: &str) -> String {
        format!(
            "contig_1\tProdigal_v2.6.3\tCDS\t{}\t{}\t87.4\t{}\t0\tID=1_1;partial=00",
            start, end, strand
        )
    }

    #[test]
    fn test_valid_line_round_trip() {
        let doc = parse_gff3(&line(100, 200, "+"));
        assert!(doc.warnings.is_empty());
        assert_eq!(doc.features.len(), 1);

        let feature = &doc.features[0];
        assert_eq!(feature.contig, "contig_1");
        assert_eq!(feature.start, 100);
        assert_eq!(feature.end, 200);
        assert_eq!(feature.strand, '+');
        assert_eq!(feature.score, Some(87.4));
        assert_eq!(feature.feature_id.as_deref(), Some("1_1"));
    }

    #[test]
    fn test_inverted_coordinates_warn_and_skip() {
        let doc = parse_gff3(&line(200, 100, "+"));
        assert!(doc.features.is_empty());
        assert_eq!(doc.warnings.len(), 1);
        assert_eq!(doc.warnings[0].line, 1);
    }

    #[test]
    fn test_invalid_strand_warns() {
        let doc = parse_gff3(&line(100, 200, "x"));
        assert!(doc.features.is_empty());
        assert_eq!(doc.warnings.len(), 1);
        assert!(doc.warnings[0].message.contains("strand"));
    }

    #[test]
    fn test_short_line_warns() {
        let doc = parse_gff3("contig_1\tCDS\t100\t200");
        assert!(doc.features.is_empty());
        assert_eq!(doc.warnings.len(), 1);
        assert!(doc.warnings[0].message.contains("columns"));
    }

    #[test]
    fn test_comments_and_other_types_ignored() {
        let text = format!(
            "# header\n##sequence-region contig_1 1 45000\n{}\ncontig_1\tsrc\ttRNA\t5\t80\t.\t+\t.\tID=t1\n",
            line(100, 200, "-")
        );
        let doc = parse_gff3(&text);
        assert!(doc.warnings.is_empty());
        assert_eq!(doc.features.len(), 1);
        assert_eq!(doc.sequence_region_len, Some(45000));
    }

    #[test]
    fn test_missing_score_is_none() {
        let text = "contig_1\tsrc\tgene\t10\t90\t.\t.\t.\tID=g1";
        let doc = parse_gff3(text);
        assert_eq!(doc.features.len(), 1);
        assert_eq!(doc.features[0].score, None);
        assert_eq!(doc.features[0].strand, '.');
    }

    #[test]
    fn test_attach_proteins_by_coordinates() {
        let mut doc = parse_gff3(&line(100, 200, "+"));
        let proteins = vec![crate::seqio::ProteinRecord {
            protein_id: "contig_1_1".into(),
            contig: "contig_1".into(),
            start: 100,
            end: 200,
            strand: '+',
            seq: "MKTAYIAK".into(),
        }];

        attach_proteins(&mut doc.features, &proteins);
        assert_eq!(doc.features[0].protein.as_deref(), Some("MKTAYIAK"));
    }
}
