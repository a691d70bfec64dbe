//! Staging area layout and write-once staging files
//!
//! Every run owns one directory below the staging root, named after its
//! [`RunId`]. Files inside it are written through [`StagedFile`], which
//! writes to a temp file in the same directory and renames it into place, so
//! a reader never sees a half-written staging file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use toll_common::RunId;

use crate::config::SourceConfig;
use crate::error::Result;

pub const ARCHIVE_FILE: &str = "tolldata.tgz";
pub const RAW_DIR: &str = "raw";
pub const CSV_FRAGMENT: &str = "csv_data.csv";
pub const TSV_FRAGMENT: &str = "tsv_data.csv";
pub const FIXED_WIDTH_FRAGMENT: &str = "fixed_width_data.csv";
pub const CONSOLIDATED_FILE: &str = "extracted_data.csv";
pub const TRANSFORMED_FILE: &str = "transformed_data.csv";
pub const SUMMARY_FILE: &str = "run.json";

/// Paths used by a single run
#[derive(Debug, Clone)]
pub struct RunLayout {
    run_dir: PathBuf,
    csv_source: String,
    tsv_source: String,
    fixed_width_source: String,
}

impl RunLayout {
    /// Lay out the run directory for `run_id` under `staging_root`
    pub fn new(staging_root: &Path, run_id: &RunId, sources: &SourceConfig) -> Self {
        Self {
            run_dir: staging_root.join(run_id.to_string()),
            csv_source: sources.csv_file.clone(),
            tsv_source: sources.tsv_file.clone(),
            fixed_width_source: sources.fixed_width_file.clone(),
        }
    }

    /// Create the run and raw directories
    pub fn create(&self) -> Result<()> {
        std::fs::create_dir_all(self.raw_dir())?;
        Ok(())
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn archive(&self) -> PathBuf {
        self.run_dir.join(ARCHIVE_FILE)
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.run_dir.join(RAW_DIR)
    }

    pub fn raw_csv(&self) -> PathBuf {
        self.raw_dir().join(&self.csv_source)
    }

    pub fn raw_tsv(&self) -> PathBuf {
        self.raw_dir().join(&self.tsv_source)
    }

    pub fn raw_fixed_width(&self) -> PathBuf {
        self.raw_dir().join(&self.fixed_width_source)
    }

    /// Names of the files the archive must provide
    pub fn raw_file_names(&self) -> [&str; 3] {
        [
            self.csv_source.as_str(),
            self.tsv_source.as_str(),
            self.fixed_width_source.as_str(),
        ]
    }

    pub fn csv_fragment(&self) -> PathBuf {
        self.run_dir.join(CSV_FRAGMENT)
    }

    pub fn tsv_fragment(&self) -> PathBuf {
        self.run_dir.join(TSV_FRAGMENT)
    }

    pub fn fixed_width_fragment(&self) -> PathBuf {
        self.run_dir.join(FIXED_WIDTH_FRAGMENT)
    }

    pub fn consolidated(&self) -> PathBuf {
        self.run_dir.join(CONSOLIDATED_FILE)
    }

    pub fn transformed(&self) -> PathBuf {
        self.run_dir.join(TRANSFORMED_FILE)
    }

    pub fn summary(&self) -> PathBuf {
        self.run_dir.join(SUMMARY_FILE)
    }
}

/// A staging file that only appears under its final name once committed
pub struct StagedFile {
    target: PathBuf,
    writer: BufWriter<NamedTempFile>,
}

impl StagedFile {
    /// Start writing `target`; the parent directory must exist
    pub fn create(target: impl Into<PathBuf>) -> Result<Self> {
        let target = target.into();
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(dir)?;

        Ok(Self {
            target,
            writer: BufWriter::new(temp),
        })
    }

    /// Write one record followed by a newline
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Flush and atomically move the file to its final name
    pub fn commit(self) -> Result<PathBuf> {
        let temp = self.writer.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.target)?;
        Ok(self.target)
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Open a staging file for reading
pub fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        std::io::Error::new(e.kind(), format!("{}: {}", path.display(), e)).into()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_layout_is_namespaced_by_run() {
        let root = Path::new("/staging");
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let sources = SourceConfig::default();

        let a = RunLayout::new(root, &RunId::new(date), &sources);
        let b = RunLayout::new(root, &RunId::new(date), &sources);

        assert_ne!(a.run_dir(), b.run_dir());
        assert_ne!(a.transformed(), b.transformed());
        assert!(a.raw_csv().starts_with(a.raw_dir()));
    }

    #[test]
    fn test_staged_file_invisible_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");

        let mut staged = StagedFile::create(&target).unwrap();
        staged.write_line("a,b").unwrap();
        assert!(!target.exists());

        staged.commit().unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "a,b\n");
    }

    #[test]
    fn test_dropped_staged_file_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");

        {
            let mut staged = StagedFile::create(&target).unwrap();
            staged.write_line("partial").unwrap();
        }

        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
