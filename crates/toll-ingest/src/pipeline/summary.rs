//! Run summaries
//!
//! Each run leaves a `run.json` in its directory. The scheduler reads them
//! back to decide which logical dates still need a successful run.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use toll_common::{FileMetadata, RunId, TollError};
use tracing::{debug, warn};

use super::StepKind;
use crate::error::Result;
use crate::staging::{self, StagedFile, SUMMARY_FILE};

/// Where a run ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed { step: StepKind, error: String },
    Cancelled { before_step: StepKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Record of one step: status, attempts, duration, rows, last error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: StepKind,
    pub status: StepStatus,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persisted outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub logical_date: NaiveDate,
    pub owner: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub steps: Vec<StepRecord>,
    /// Size and SHA-256 of the fetched archive
    pub archive: Option<FileMetadata>,
}

impl RunSummary {
    pub fn new(run_id: RunId, owner: impl Into<String>) -> Self {
        Self {
            logical_date: run_id.logical_date(),
            run_id,
            owner: owner.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            steps: Vec::new(),
            archive: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Close the summary with its final status
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Atomically write the summary as pretty JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut staged = StagedFile::create(path)?;
        serde_json::to_writer_pretty(&mut staged, self).map_err(TollError::from)?;
        staged.write_all(b"\n")?;
        staged.commit()?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let file = staging::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file)).map_err(TollError::from)?)
    }
}

/// Load every `run.json` found one level below `staging_root`
///
/// Unreadable summaries are skipped with a warning. A missing root yields no
/// summaries.
pub fn list_summaries(staging_root: &Path) -> Result<Vec<RunSummary>> {
    let entries = match std::fs::read_dir(staging_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut summaries = Vec::new();
    for entry in entries {
        let path = entry?.path().join(SUMMARY_FILE);
        if !path.is_file() {
            continue;
        }
        match RunSummary::read(&path) {
            Ok(summary) => summaries.push(summary),
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable run summary"),
        }
    }

    summaries.sort_by_key(|s| s.started_at);
    debug!(count = summaries.len(), "Loaded run summaries");
    Ok(summaries)
}

/// Logical dates that have at least one succeeded run
pub fn succeeded_dates(staging_root: &Path) -> Result<BTreeSet<NaiveDate>> {
    Ok(list_summaries(staging_root)?
        .into_iter()
        .filter(RunSummary::is_success)
        .map(|s| s.logical_date)
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, day).unwrap()
    }

    fn write_run(root: &Path, day: u32, status: RunStatus) {
        let mut summary = RunSummary::new(RunId::new(date(day)), "toll-data");
        summary.finish(status);
        let dir = root.join(summary.run_id.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        summary.write(&dir.join(SUMMARY_FILE)).unwrap();
    }

    #[test]
    fn test_summary_json_shape() {
        let mut summary = RunSummary::new(RunId::new(date(19)), "toll-data");
        summary.finish(RunStatus::Failed {
            step: StepKind::Consolidate,
            error: "Row alignment failure".to_string(),
        });

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["status"]["state"], "failed");
        assert_eq!(json["status"]["step"], "consolidate");
        assert_eq!(json["logical_date"], "2026-10-19");
        assert!(json["run_id"].as_str().unwrap().starts_with("2026-10-19_"));
    }

    #[test]
    fn test_succeeded_dates_ignores_failures_and_junk() {
        let root = tempfile::tempdir().unwrap();
        write_run(root.path(), 1, RunStatus::Succeeded);
        write_run(root.path(), 2, RunStatus::Failed {
            step: StepKind::Fetch,
            error: "boom".to_string(),
        });
        write_run(root.path(), 3, RunStatus::Cancelled {
            before_step: StepKind::Unpack,
        });

        let junk = root.path().join("2026-10-04_deadbeef");
        std::fs::create_dir_all(&junk).unwrap();
        std::fs::write(junk.join(SUMMARY_FILE), "{not json").unwrap();

        let dates = succeeded_dates(root.path()).unwrap();
        assert_eq!(dates.into_iter().collect::<Vec<_>>(), vec![date(1)]);
    }

    #[test]
    fn test_missing_root_has_no_runs() {
        let root = tempfile::tempdir().unwrap();
        assert!(list_summaries(&root.path().join("absent")).unwrap().is_empty());
    }
}
