//! CSV ledger of completed passes.

use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::sequencer::PassReport;
use crate::stage::Stage;

/// One ledger row.
#[derive(Debug, Serialize)]
pub struct PassRecord {
    pub pass: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Stage names joined with `;`.
    pub stages: String,
    pub fetch_attempts: u32,
    pub fetch_cooldowns: u32,
    pub exported: bool,
}

impl From<&PassReport> for PassRecord {
    fn from(report: &PassReport) -> Self {
        let fetch_cooldowns = report
            .stages
            .iter()
            .filter(|r| r.stage == Stage::RealtimeFetch)
            .map(|r| r.cooldowns)
            .sum();

        Self {
            pass: report.pass.number,
            started_at: report.pass.started_at,
            finished_at: report.finished_at,
            stages: report
                .stages
                .iter()
                .map(|r| r.stage.name())
                .collect::<Vec<_>>()
                .join(";"),
            fetch_attempts: report.attempts_for(Stage::RealtimeFetch),
            fetch_cooldowns,
            exported: report.exported(),
        }
    }
}

/// Append-only CSV file with one [`PassRecord`] per completed pass.
pub struct PassLedger {
    path: PathBuf,
}

impl PassLedger {
    /// The file is created lazily on the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Appends a row, writing the header only when the file is new.
    pub fn append(&self, report: &PassReport) -> Result<()> {
        let file_exists = self.path.exists();
        debug!(path = %self.path.display(), file_exists, "Appending pass record");

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        let mut writer = WriterBuilder::new()
            .has_headers(!file_exists)
            .from_writer(file);

        writer.serialize(PassRecord::from(report))?;
        writer.flush()?;
        Ok(())
    }

    /// Location of the CSV file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
