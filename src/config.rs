//! Workflow Configuration
//!
//! Per-workflow configuration structs passed into the orchestrator. Every
//! threshold carries a documented default and is validated eagerly at
//! session start, before any subprocess is spawned. A partial JSON config
//! file can override the defaults; CLI flags override both.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::EngineError;

/// Top-level engine configuration, one section per workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub annotation: AnnotationConfig,
    pub screen: ScreenConfig,
    pub phylo: PhyloConfig,
    pub comparative: ComparativeConfig,
}

/// Gene-prediction (annotation) workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Genome size boundary for annotation mode selection. Inputs strictly
    /// above this many base pairs use metagenomic gene-calling parameters.
    pub mode_threshold_bp: u64,
    /// Wall-clock budget for the gene caller, in seconds.
    pub timeout_secs: u64,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            mode_threshold_bp: 5_000_000,
            timeout_secs: 3600,
        }
    }
}

/// Pathogen-screening workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Minimum percent identity for a hit to become a finding (0-100).
    pub min_identity: f64,
    /// Minimum query coverage for a hit to become a finding (0-100).
    pub min_coverage: f64,
    /// E-value cutoff for the resistance (CARD) database search.
    pub card_evalue: f64,
    /// E-value cutoff for the virulence (VFDB) database search.
    pub vfdb_evalue: f64,
    /// Wall-clock budget per database search, in seconds.
    pub timeout_secs: u64,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            min_identity: 80.0,
            min_coverage: 50.0,
            card_evalue: 1e-10,
            vfdb_evalue: 1e-5,
            timeout_secs: 3600,
        }
    }
}

/// Phylogenetics workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhyloConfig {
    /// Per-taxon sequence cap before multiple alignment, in base pairs.
    /// Whole assemblies are truncated to this prefix to keep the MSA cheap.
    pub max_tree_seq_len: usize,
    /// Wall-clock budget per tool invocation, in seconds.
    pub timeout_secs: u64,
}

impl Default for PhyloConfig {
    fn default() -> Self {
        Self {
            max_tree_seq_len: 5_000,
            timeout_secs: 3600,
        }
    }
}

/// Comparative-genomics (ANI) workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparativeConfig {
    /// Fragments shorter than this are excluded from the ANI aggregate.
    pub min_fragment_len: u64,
    /// E-value cutoff for the whole-genome alignment.
    pub evalue: f64,
    /// Identity floor passed to the pairwise aligner (0-100).
    pub min_identity: f64,
    /// Wall-clock budget per tool invocation, in seconds.
    pub timeout_secs: u64,
}

impl Default for ComparativeConfig {
    fn default() -> Self {
        Self {
            min_fragment_len: 700,
            evalue: 1e-10,
            min_identity: 90.0,
            timeout_secs: 3600,
        }
    }
}

impl EngineConfig {
    /// Loads a partial configuration from a JSON file. Missing sections and
    /// fields fall back to their documented defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;
        Ok(config)
    }

    /// Validates every threshold before the session starts.
    ///
    /// # Errors
    /// Returns `EngineError::ThresholdMisconfiguration` naming the first
    /// offending field. Nothing is executed for a session that fails here.
    pub fn validate(&self) -> Result<(), EngineError> {
        check_percent("screen.min_identity", self.screen.min_identity)?;
        check_percent("screen.min_coverage", self.screen.min_coverage)?;
        check_percent("comparative.min_identity", self.comparative.min_identity)?;
        check_positive_evalue("screen.card_evalue", self.screen.card_evalue)?;
        check_positive_evalue("screen.vfdb_evalue", self.screen.vfdb_evalue)?;
        check_positive_evalue("comparative.evalue", self.comparative.evalue)?;

        if self.annotation.mode_threshold_bp == 0 {
            return Err(EngineError::ThresholdMisconfiguration(
                "annotation.mode_threshold_bp must be positive".into(),
            ));
        }
        if self.comparative.min_fragment_len == 0 {
            return Err(EngineError::ThresholdMisconfiguration(
                "comparative.min_fragment_len must be positive".into(),
            ));
        }
        if self.phylo.max_tree_seq_len == 0 {
            return Err(EngineError::ThresholdMisconfiguration(
                "phylo.max_tree_seq_len must be positive".into(),
            ));
        }
        for (name, secs) in [
            ("annotation.timeout_secs", self.annotation.timeout_secs),
            ("screen.timeout_secs", self.screen.timeout_secs),
            ("phylo.timeout_secs", self.phylo.timeout_secs),
            ("comparative.timeout_secs", self.comparative.timeout_secs),
        ] {
            if secs == 0 {
                return Err(EngineError::ThresholdMisconfiguration(format!(
                    "{} must be positive",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn check_percent(name: &str, value: f64) -> Result<(), EngineError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(EngineError::ThresholdMisconfiguration(format!(
            "{} must be between 0 and 100, got {}",
            name, value
        )));
    }
    Ok(())
}

fn check_positive_evalue(name: &str, value: f64) -> Result<(), EngineError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(EngineError::ThresholdMisconfiguration(format!(
            "{} must be a positive number, got {}",
            name, value
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_negative_coverage_rejected() {
        let mut config = EngineConfig::default();
        config.screen.min_coverage = -5.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_coverage"));
    }

    #[test]
    fn test_identity_above_hundred_rejected() {
        let mut config = EngineConfig::default();
        config.screen.min_identity = 120.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_fragment_length_rejected() {
        let mut config = EngineConfig::default();
        config.comparative.min_fragment_len = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"screen": {"min_identity": 90.0}}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.screen.min_identity, 90.0);
        assert_eq!(config.screen.min_coverage, 50.0);
        assert_eq!(config.annotation.mode_threshold_bp, 5_000_000);
    }
}
