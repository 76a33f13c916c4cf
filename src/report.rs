//! Experiment reporting
//!
//! Accumulates the per-level evaluation summaries of a multilevel run and
//! serializes them to JSON for later comparison across experiments.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Result, SolverError};
use crate::eval::Summary;

/// One level's evaluation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub level: u32,
    pub summary: Summary,
}

/// Collected summaries of one multilevel run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    /// Library version that produced the report
    pub library_version: String,
    /// RFC 3339 creation timestamp
    pub created_at: String,
    /// Dataset name, when the caller tracks one
    pub dataset: Option<String>,
    pub levels: Vec<LevelSummary>,
}

impl ExperimentReport {
    pub fn new(dataset: Option<String>) -> Self {
        Self {
            library_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            dataset,
            levels: Vec::new(),
        }
    }

    /// Append one level's summary
    pub fn push(&mut self, level: u32, summary: Summary) {
        self.levels.push(LevelSummary { level, summary });
    }

    /// The last recorded summary, which belongs to the finest solved level
    pub fn final_summary(&self) -> Option<&Summary> {
        self.levels.last().map(|entry| &entry.summary)
    }

    /// Write the report as pretty-printed JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path).map_err(SolverError::IoError)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| SolverError::SerializationError(e.to_string()))?;
        Ok(())
    }

    /// Load a previously saved report
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path).map_err(SolverError::IoError)?;
        let reader = BufReader::new(file);
        let report = serde_json::from_reader(reader)
            .map_err(|e| SolverError::SerializationError(e.to_string()))?;
        Ok(report)
    }

    /// Log one line per recorded level
    pub fn log_summaries(&self) {
        for entry in &self.levels {
            log::info!("level {}: {}", entry.level, entry.summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::ConfusionCounts;
    use tempfile::NamedTempFile;

    fn sample_summary(c: f64) -> Summary {
        let counts = ConfusionCounts {
            true_positives: 8,
            false_positives: 1,
            true_negatives: 9,
            false_negatives: 2,
        };
        Summary::new(counts, c, 0.5, 3, 4, None)
    }

    #[test]
    fn test_report_accumulates_levels() {
        let mut report = ExperimentReport::new(Some("synthetic".to_string()));
        report.push(3, sample_summary(1.0));
        report.push(2, sample_summary(2.0));
        report.push(1, sample_summary(4.0));

        assert_eq!(report.levels.len(), 3);
        assert_eq!(report.final_summary().unwrap().c, 4.0);
        assert!(!report.created_at.is_empty());
    }

    #[test]
    fn test_report_round_trip() {
        let mut report = ExperimentReport::new(None);
        report.push(2, sample_summary(1.0));
        report.push(1, sample_summary(8.0));

        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        report.save_to_file(temp_file.path()).unwrap();

        let loaded = ExperimentReport::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded, report);
    }
}
