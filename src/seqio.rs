//! Sequence I/O Module
//!
//! FASTA parsing for the formats the engine consumes: genome assemblies
//! (plain or gzip-compressed) and the protein listings emitted by the gene
//! caller. Text parsing is pure and never fails on a malformed record; each
//! skipped record produces a [`ParseWarning`] carrying the offending line
//! number.
//!
//! # Protein listing headers
//! The gene caller writes one protein per record with the calling
//! coordinates embedded in the description:
//! ```text
//! >contig_1_2 # 337 # 2799 # 1 # ID=1_2;partial=00;start_type=ATG
//! ```
//! Fields between `#` separators are start, end and strand (1 or -1);
//! they let predicted proteins be joined back onto genome features.

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

// ============================================================================
// Parse diagnostics
// ============================================================================

/// A non-fatal parsing problem tied to a 1-based line number.
///
/// Parsers skip the offending line and keep going; warnings accumulate on
/// the run result so a completed-with-warnings run stays distinguishable
/// from a failed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    /// 1-based line number in the source text.
    pub line: usize,
    pub message: String,
}

impl ParseWarning {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

// ============================================================================
// FASTA text parsing
// ============================================================================

/// A FASTA record: identifier, remainder of the header line, and sequence.
#[derive(Debug, Clone)]
pub struct FastaRecord {
    /// Identifier (text after '>' up to the first whitespace).
    pub id: String,
    /// Rest of the header line after the identifier, trimmed.
    pub desc: String,
    /// Sequence concatenated from all following lines.
    pub seq: String,
}

/// Parses FASTA text into records.
///
/// Sequence data appearing before the first header and records with an
/// empty sequence are skipped with a warning.
pub fn parse_fasta(text: &str) -> (Vec<FastaRecord>, Vec<ParseWarning>) {
    let mut records = Vec::new();
    let mut warnings = Vec::new();
    let mut current: Option<(usize, FastaRecord)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('>') {
            flush_record(&mut current, &mut records, &mut warnings);
            let mut parts = header.splitn(2, char::is_whitespace);
            let id = parts.next().unwrap_or("").to_string();
            let desc = parts.next().unwrap_or("").trim().to_string();
            if id.is_empty() {
                warnings.push(ParseWarning::new(line_no, "empty FASTA header"));
                continue;
            }
            current = Some((
                line_no,
                FastaRecord {
                    id,
                    desc,
                    seq: String::new(),
                },
            ));
        } else if let Some((_, record)) = current.as_mut() {
            record.seq.push_str(line.trim());
        } else {
            warnings.push(ParseWarning::new(
                line_no,
                "sequence data before first header",
            ));
        }
    }
    flush_record(&mut current, &mut records, &mut warnings);

    (records, warnings)
}

fn flush_record(
    current: &mut Option<(usize, FastaRecord)>,
    records: &mut Vec<FastaRecord>,
    warnings: &mut Vec<ParseWarning>,
) {
    if let Some((line_no, record)) = current.take() {
        if record.seq.is_empty() {
            warnings.push(ParseWarning::new(
                line_no,
                format!("record '{}' has no sequence", record.id),
            ));
        } else {
            records.push(record);
        }
    }
}

// ============================================================================
// Protein listings
// ============================================================================

/// A predicted protein with its calling coordinates on the source contig.
#[derive(Debug, Clone, Serialize)]
pub struct ProteinRecord {
    /// Protein identifier as written by the gene caller (`<contig>_<n>`).
    pub protein_id: String,
    /// Source contig, recovered by stripping the trailing gene index.
    pub contig: String,
    /// 1-based start on the contig.
    pub start: u64,
    /// 1-based inclusive end on the contig.
    pub end: u64,
    /// '+' or '-'.
    pub strand: char,
    /// Amino-acid sequence.
    pub seq: String,
}

/// Parses a gene-caller protein listing.
///
/// Records whose headers do not carry the `# start # end # strand #`
/// coordinate fields are skipped with a warning; they cannot be joined back
/// onto features.
pub fn parse_protein_listing(text: &str) -> (Vec<ProteinRecord>, Vec<ParseWarning>) {
    let (records, mut warnings) = parse_fasta(text);
    let mut proteins = Vec::with_capacity(records.len());

    // Header line numbers, in record order, for diagnostics.
    let header_lines: Vec<usize> = text
        .lines()
        .enumerate()
        .filter(|(_, l)| l.starts_with('>'))
        .map(|(i, _)| i + 1)
        .collect();

    for (record, header_line) in records.into_iter().zip(header_lines) {
        match parse_protein_header(&record) {
            Some(protein) => proteins.push(protein),
            None => warnings.push(ParseWarning::new(
                header_line,
                format!("protein '{}' lacks coordinate fields", record.id),
            )),
        }
    }

    (proteins, warnings)
}

fn parse_protein_header(record: &FastaRecord) -> Option<ProteinRecord> {
    let fields: Vec<&str> = record.desc.split('#').map(str::trim).collect();
    if fields.len() < 4 {
        return None;
    }
    let start: u64 = fields[1].parse().ok()?;
    let end: u64 = fields[2].parse().ok()?;
    let strand = match fields[3] {
        "1" => '+',
        "-1" => '-',
        _ => return None,
    };
    let contig = record
        .id
        .rsplit_once('_')
        .map(|(c, _)| c.to_string())
        .unwrap_or_else(|| record.id.clone());

    Some(ProteinRecord {
        protein_id: record.id.clone(),
        contig,
        start,
        end,
        strand,
        seq: record.seq.clone(),
    })
}

// ============================================================================
// Genome inputs
// ============================================================================

/// Annotation parameter set, derived once per input from its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnnotationMode {
    /// Isolate assembly: single-genome gene-calling parameters.
    Single,
    /// Large or mixed assembly: metagenomic gene-calling parameters.
    Metagenomic,
}

impl AnnotationMode {
    /// Selects the mode from assembly size. Strictly above the threshold
    /// selects metagenomic parameters.
    pub fn select(length_bp: u64, threshold_bp: u64) -> Self {
        if length_bp > threshold_bp {
            AnnotationMode::Metagenomic
        } else {
            AnnotationMode::Single
        }
    }

    /// Argument value understood by the gene caller.
    pub fn as_tool_arg(&self) -> &'static str {
        match self {
            AnnotationMode::Single => "single",
            AnnotationMode::Metagenomic => "meta",
        }
    }
}

impl fmt::Display for AnnotationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationMode::Single => write!(f, "single"),
            AnnotationMode::Metagenomic => write!(f, "metagenomic"),
        }
    }
}

/// A genome assembly registered with the session.
#[derive(Debug, Clone, Serialize)]
pub struct GenomeInput {
    /// Identifier derived from the file name.
    pub id: String,
    /// Source path as given.
    pub path: PathBuf,
    /// Total assembly size in base pairs.
    pub length_bp: u64,
    /// Number of sequences in the assembly.
    pub contigs: usize,
    /// GC content in percent.
    pub gc_percent: f64,
    /// Derived annotation mode; fixed for the lifetime of the input.
    pub mode: AnnotationMode,
}

impl GenomeInput {
    /// Loads assembly statistics from a FASTA file (gzip auto-detected by
    /// extension) and derives the annotation mode.
    pub fn load<P: AsRef<Path>>(path: P, mode_threshold_bp: u64) -> Result<Self> {
        let path = path.as_ref();
        let reader = open_text(path)?;

        let mut length_bp = 0u64;
        let mut gc = 0u64;
        let mut contigs = 0usize;

        for line in reader.lines() {
            let line =
                line.with_context(|| format!("Failed to read genome: {}", path.display()))?;
            if line.starts_with('>') {
                contigs += 1;
                continue;
            }
            for b in line.trim().bytes() {
                length_bp += 1;
                if matches!(b, b'G' | b'g' | b'C' | b'c') {
                    gc += 1;
                }
            }
        }

        if length_bp == 0 {
            anyhow::bail!("No sequence data in {}", path.display());
        }

        Ok(Self {
            id: genome_id(path),
            path: path.to_path_buf(),
            length_bp,
            contigs,
            gc_percent: gc as f64 / length_bp as f64 * 100.0,
            mode: AnnotationMode::select(length_bp, mode_threshold_bp),
        })
    }
}

/// Derives a genome identifier from a file name, stripping compression and
/// FASTA extensions.
pub fn genome_id(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("genome");
    let mut id = name;
    for ext in [".gz", ".fasta", ".fna", ".fa"] {
        if let Some(stripped) = id.strip_suffix(ext) {
            id = stripped;
        }
    }
    id.to_string()
}

/// Opens a text file for buffered reading, decompressing gzip by extension.
pub fn open_text(path: &Path) -> Result<Box<dyn BufRead>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open: {}", path.display()))?;
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(BufReader::with_capacity(
            1024 * 1024,
            MultiGzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(1024 * 1024, file)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fasta_multiline() {
        let text = ">contig_1 sample assembly\nACGT\nACGT\n>contig_2\nGGCC\n";
        let (records, warnings) = parse_fasta(text);
        assert!(warnings.is_empty());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "contig_1");
        assert_eq!(records[0].desc, "sample assembly");
        assert_eq!(records[0].seq, "ACGTACGT");
        assert_eq!(records[1].seq, "GGCC");
    }

    #[test]
    fn test_parse_fasta_orphan_sequence_warns() {
        let text = "ACGT\n>contig_1\nACGT\n";
        let (records, warnings) = parse_fasta(text);
        assert_eq!(records.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].line, 1);
    }

    #[test]
    fn test_parse_fasta_empty_record_warns() {
        let text = ">empty\n>contig_1\nACGT\n";
        let (records, warnings) = parse_fasta(text);
        assert_eq!(records.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("empty"));
    }

    #[test]
    fn test_parse_protein_listing() {
        let text = ">contig_1_2 # 337 # 2799 # 1 # ID=1_2;partial=00\nMKTAYIAK\n\
                    >contig_1_3 # 3000 # 3500 # -1 # ID=1_3;partial=00\nMVLSPADK\n";
        let (proteins, warnings) = parse_protein_listing(text);
        assert!(warnings.is_empty());
        assert_eq!(proteins.len(), 2);
        assert_eq!(proteins[0].protein_id, "contig_1_2");
        assert_eq!(proteins[0].contig, "contig_1");
        assert_eq!(proteins[0].start, 337);
        assert_eq!(proteins[0].end, 2799);
        assert_eq!(proteins[0].strand, '+');
        assert_eq!(proteins[1].strand, '-');
    }

    #[test]
    fn test_parse_protein_listing_missing_coords_warns() {
        let text = ">orphan description without fields\nMKTAYIAK\n";
        let (proteins, warnings) = parse_protein_listing(text);
        assert!(proteins.is_empty());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].line, 1);
    }

    #[test]
    fn test_mode_selection_boundary() {
        assert_eq!(
            AnnotationMode::select(4_000_000, 5_000_000),
            AnnotationMode::Single
        );
        assert_eq!(
            AnnotationMode::select(6_000_000, 5_000_000),
            AnnotationMode::Metagenomic
        );
        // Exactly at the threshold stays single.
        assert_eq!(
            AnnotationMode::select(5_000_000, 5_000_000),
            AnnotationMode::Single
        );
    }

    #[test]
    fn test_genome_input_stats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asm.fasta");
        std::fs::write(&path, ">c1\nGGCC\n>c2\nAATT\n").unwrap();

        let genome = GenomeInput::load(&path, 5_000_000).unwrap();
        assert_eq!(genome.id, "asm");
        assert_eq!(genome.length_bp, 8);
        assert_eq!(genome.contigs, 2);
        assert!((genome.gc_percent - 50.0).abs() < 1e-9);
        assert_eq!(genome.mode, AnnotationMode::Single);
    }

    #[test]
    fn test_genome_id_strips_extensions() {
        assert_eq!(genome_id(Path::new("/data/ecoli.fa.gz")), "ecoli");
        assert_eq!(genome_id(Path::new("sample.fasta")), "sample");
    }
}
