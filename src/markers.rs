//! Marker Database Module
//!
//! Loads the resistance/virulence marker tables the classifier matches
//! alignment hits against. Each configured database contributes a
//! tab-separated table mapping a subject sequence identifier to its gene
//! name, category and severity tier. Tables are loaded once at session
//! start and treated as immutable for the lifetime of the session.
//!
//! # Table format (4 tab-separated columns)
//! ```text
//! Col  Field       Description
//! 1    subject_id  Database sequence identifier (join key for hits)
//! 2    gene_name   Human-readable gene name (e.g. blaTEM-1)
//! 3    category    resistance | virulence
//! 4    severity    critical | high | moderate | informational
//! ```
//!
//! Malformed rows are skipped with a logged warning; a marker table with
//! zero usable rows is an error, since the session could never produce a
//! finding from it.

use anyhow::{Context, Result};
use log::warn;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::seqio::open_text;
use std::io::BufRead;

// ============================================================================
// Marker records
// ============================================================================

/// Fixed severity ladder for threat findings, lowest tier first so the
/// derived ordering ranks `Critical` highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Informational,
    Moderate,
    High,
    Critical,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "informational" => Ok(Severity::Informational),
            "moderate" => Ok(Severity::Moderate),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Informational => write!(f, "informational"),
            Severity::Moderate => write!(f, "moderate"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Marker classification axis: what kind of threat the gene signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MarkerCategory {
    Resistance,
    Virulence,
}

impl FromStr for MarkerCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resistance" => Ok(MarkerCategory::Resistance),
            "virulence" => Ok(MarkerCategory::Virulence),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

impl fmt::Display for MarkerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerCategory::Resistance => write!(f, "resistance"),
            MarkerCategory::Virulence => write!(f, "virulence"),
        }
    }
}

/// One known gene signature from a reference database.
#[derive(Debug, Clone, Serialize)]
pub struct MarkerRecord {
    pub subject_id: String,
    pub gene_name: String,
    pub category: MarkerCategory,
    pub severity: Severity,
}

// ============================================================================
// Marker database
// ============================================================================

/// The session's merged, read-only marker lookup table.
#[derive(Debug, Default)]
pub struct MarkerDb {
    records: FxHashMap<String, MarkerRecord>,
}

impl MarkerDb {
    /// Loads one marker table, merging into `self`. Later tables win on
    /// duplicate subject identifiers.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let reader = open_text(path)?;
        let mut loaded = 0usize;

        for (idx, line) in reader.lines().enumerate() {
            let line = line
                .with_context(|| format!("Failed to read markers: {}", path.display()))?;
            let trimmed = line.trim_end();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match Self::parse_row(trimmed) {
                Ok(record) => {
                    self.records.insert(record.subject_id.clone(), record);
                    loaded += 1;
                }
                Err(message) => {
                    warn!("{}:{}: {}", path.display(), idx + 1, message);
                }
            }
        }

        if loaded == 0 {
            anyhow::bail!("No usable marker rows in {}", path.display());
        }
        Ok(loaded)
    }

    /// Loads and merges several marker tables.
    pub fn load_merged<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut db = Self::default();
        for path in paths {
            db.load(path)?;
        }
        Ok(db)
    }

    fn parse_row(line: &str) -> Result<MarkerRecord, String> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 4 {
            return Err(format!("expected 4 columns, found {}", fields.len()));
        }
        if fields[0].is_empty() {
            return Err("empty subject id".into());
        }
        Ok(MarkerRecord {
            subject_id: fields[0].to_string(),
            gene_name: fields[1].to_string(),
            category: fields[2].parse()?,
            severity: fields[3].parse()?,
        })
    }

    /// Looks up the marker for a subject identifier.
    pub fn get(&self, subject_id: &str) -> Option<&MarkerRecord> {
        self.records.get(subject_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Builds a database directly from records. Intended for tests and
    /// embedding callers that manage their own tables.
    pub fn from_records(records: impl IntoIterator<Item = MarkerRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.subject_id.clone(), r))
                .collect(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Moderate);
        assert!(Severity::Moderate > Severity::Informational);
    }

    #[test]
    fn test_parse_row() {
        let record =
            MarkerDb::parse_row("gb|AAC44793|blaTEM-1\tblaTEM-1\tresistance\tcritical").unwrap();
        assert_eq!(record.gene_name, "blaTEM-1");
        assert_eq!(record.category, MarkerCategory::Resistance);
        assert_eq!(record.severity, Severity::Critical);
    }

    #[test]
    fn test_unknown_severity_rejected() {
        assert!(MarkerDb::parse_row("id\tgene\tresistance\tsevere").is_err());
    }

    #[test]
    fn test_load_merged_tables() {
        let dir = tempfile::tempdir().unwrap();
        let card = dir.path().join("card.tsv");
        let vfdb = dir.path().join("vfdb.tsv");
        std::fs::write(
            &card,
            "# resistance markers\nsub1\tblaTEM-1\tresistance\tcritical\nsub2\tvanA\tresistance\thigh\n",
        )
        .unwrap();
        std::fs::write(&vfdb, "sub3\thlyA\tvirulence\tmoderate\n").unwrap();

        let db = MarkerDb::load_merged(&[&card, &vfdb]).unwrap();
        assert_eq!(db.len(), 3);
        assert_eq!(db.get("sub3").unwrap().category, MarkerCategory::Virulence);
        assert!(db.get("missing").is_none());
    }

    #[test]
    fn test_empty_table_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.tsv");
        std::fs::write(&path, "# only comments\n").unwrap();

        let mut db = MarkerDb::default();
        assert!(db.load(&path).is_err());
    }
}
