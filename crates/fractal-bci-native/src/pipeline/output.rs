//! Result persistence
//!
//! Layout under the output root:
//!
//! ```text
//! <root>/<variant>/Training/P01.csv    per-subject tables
//! <root>/<variant>/combined.csv        all subjects, in subject order
//! <root>/<variant>/summary.json        metrics and failures
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use fractal_bci_core::{PredictionRow, SubjectResult};

use crate::error::PipelineResult;
use crate::ml::metrics::BatchSummary;
use crate::pipeline::batch::BatchReport;

/// Writes result tables for one pipeline variant.
#[derive(Clone, Debug)]
pub struct ResultWriter {
    variant_dir: PathBuf,
}

impl ResultWriter {
    /// Create a writer for `variant` under `root`
    pub fn new(root: impl AsRef<Path>, variant: &str) -> Self {
        Self { variant_dir: root.as_ref().join(variant) }
    }

    /// Directory of this variant
    #[must_use]
    pub fn variant_dir(&self) -> &Path {
        &self.variant_dir
    }

    /// Path of a subject's table
    #[must_use]
    pub fn subject_path(&self, subject_id: u32) -> PathBuf {
        self.variant_dir.join("Training").join(format!("P{subject_id:02}.csv"))
    }

    /// Path of the combined table
    #[must_use]
    pub fn combined_path(&self) -> PathBuf {
        self.variant_dir.join("combined.csv")
    }

    /// Path of the JSON summary
    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.variant_dir.join("summary.json")
    }

    /// Write one subject's table
    ///
    /// # Errors
    ///
    /// Returns I/O or CSV errors.
    pub fn write_subject(&self, result: &SubjectResult) -> PipelineResult<PathBuf> {
        let path = self.subject_path(result.subject_id());
        write_rows(&path, result.rows())?;
        Ok(path)
    }

    /// Write the combined table
    ///
    /// # Errors
    ///
    /// Returns I/O or CSV errors.
    pub fn write_combined(&self, rows: &[PredictionRow]) -> PipelineResult<PathBuf> {
        let path = self.combined_path();
        write_rows(&path, rows)?;
        Ok(path)
    }

    /// Write the batch summary as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns I/O or JSON errors.
    pub fn write_summary(&self, summary: &BatchSummary) -> PipelineResult<PathBuf> {
        let path = self.summary_path();
        fs::create_dir_all(&self.variant_dir)?;
        fs::write(&path, serde_json::to_string_pretty(summary)?)?;
        Ok(path)
    }

    /// Write every subject table, the combined table and the summary
    ///
    /// # Errors
    ///
    /// Returns the first I/O, CSV or JSON error.
    pub fn write_report(&self, report: &BatchReport) -> PipelineResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        for subject in report.successes() {
            written.push(self.write_subject(&subject.result)?);
        }
        written.push(self.write_combined(&report.combined_rows())?);
        written.push(self.write_summary(&report.summary())?);
        tracing::info!("Wrote {} files to {}", written.len(), self.variant_dir.display());
        Ok(written)
    }
}

fn write_rows(path: &Path, rows: &[PredictionRow]) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a table written by [`ResultWriter`]
///
/// # Errors
///
/// Returns I/O or CSV errors.
pub fn read_rows(path: &Path) -> PipelineResult<Vec<PredictionRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<Result<Vec<PredictionRow>, csv::Error>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fractal_bci_core::Label;

    #[test]
    fn test_subject_table_columns() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path(), "FBCSP_Fractal");
        let result = SubjectResult::new(
            7,
            vec![
                PredictionRow::new(7, 0, Label::LeftHand, 0.75, 0.25),
                PredictionRow::new(7, 1, Label::RightHand, 0.4, 0.6),
            ],
        );

        let path = writer.write_subject(&result).unwrap();
        assert!(path.ends_with("FBCSP_Fractal/Training/P07.csv"));

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("subject_id,fold,true_label,left_prob,right_prob"));
        assert_eq!(lines.next(), Some("7,0,1,0.75,0.25"));
        assert_eq!(lines.next(), Some("7,1,2,0.4,0.6"));

        assert_eq!(read_rows(&path).unwrap(), result.rows());
    }
}
