//! Field extraction from the raw toll extracts
//!
//! Each extractor reads one raw file line by line, keeps the selected fields
//! and writes them comma-joined to a fragment file, one output line per input
//! line. Delimited sources are split on their delimiter. Fixed-width sources
//! are sliced by [`ColumnSpan`]s and the padding around each value is
//! trimmed.

pub mod selection;

use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{EtlError, Result};
use crate::staging::{self, StagedFile};

pub use selection::{ColumnSpan, FieldSelection};

/// Separator used in every fragment and in the consolidated file
pub const OUTPUT_DELIMITER: &str = ",";

/// How a raw line is split into fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFormat {
    Delimited(char),
    FixedWidth(Vec<ColumnSpan>),
}

impl SourceFormat {
    pub fn comma() -> Self {
        SourceFormat::Delimited(',')
    }

    pub fn tab() -> Self {
        SourceFormat::Delimited('\t')
    }

    /// Number of fields a line of this format exposes, if fixed
    fn declared_fields(&self) -> Option<usize> {
        match self {
            SourceFormat::Delimited(_) => None,
            SourceFormat::FixedWidth(columns) => Some(columns.len()),
        }
    }
}

/// What to do with a line that lacks a selected field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MalformedRowPolicy {
    /// Fail the step on the first malformed line
    #[default]
    Abort,
    /// Drop the line with a warning
    Skip,
    /// Emit empty values for the missing fields with a warning
    Pad,
}

impl std::str::FromStr for MalformedRowPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(MalformedRowPolicy::Abort),
            "skip" => Ok(MalformedRowPolicy::Skip),
            "pad" => Ok(MalformedRowPolicy::Pad),
            _ => Err(format!(
                "invalid malformed-row policy '{}': expected abort, skip or pad",
                s
            )),
        }
    }
}

/// Row counts from one extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractStats {
    pub rows_read: usize,
    pub rows_written: usize,
    pub rows_skipped: usize,
    pub rows_padded: usize,
}

/// Everything an extractor needs besides its files
#[derive(Debug, Clone)]
pub struct Extraction {
    pub format: SourceFormat,
    pub selection: FieldSelection,
    pub policy: MalformedRowPolicy,
}

impl Extraction {
    /// Check the selection against the format before touching any file
    pub fn validate(&self) -> Result<()> {
        if let Some(declared) = self.format.declared_fields() {
            if self.selection.max_position() > declared {
                return Err(EtlError::config(format!(
                    "selection {} refers to column {} but only {} fixed-width columns are defined",
                    self.selection,
                    self.selection.max_position(),
                    declared
                )));
            }
        }
        Ok(())
    }

    /// Select fields from one raw line; `None` marks a missing field
    pub fn select<'a>(&self, line: &'a str) -> Vec<Option<&'a str>> {
        match &self.format {
            SourceFormat::Delimited(delimiter) => {
                let fields: Vec<&str> = line.split(*delimiter).collect();
                self.selection
                    .positions()
                    .map(|pos| fields.get(pos - 1).copied())
                    .collect()
            },
            SourceFormat::FixedWidth(columns) => self
                .selection
                .positions()
                .map(|pos| {
                    columns
                        .get(pos - 1)
                        .and_then(|span| span.slice(line))
                        .map(str::trim)
                })
                .collect(),
        }
    }
}

/// Extract the selected fields of every line in `input` into `output`
pub fn extract_fields(input: &Path, output: &Path, extraction: &Extraction) -> Result<ExtractStats> {
    extraction.validate()?;

    let mut reader = BufReader::new(staging::open(input)?);
    let mut staged = StagedFile::create(output)?;
    let mut stats = ExtractStats::default();

    let mut buf = Vec::new();
    let mut line_no = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;
        stats.rows_read += 1;

        let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

        let (selected, detail) = match std::str::from_utf8(raw) {
            Ok(line) => {
                let selected = extraction.select(line);
                let missing = selected.iter().filter(|field| field.is_none()).count();
                let detail = (missing > 0).then(|| {
                    format!(
                        "{} of {} selected fields missing (selection {})",
                        missing,
                        selected.len(),
                        extraction.selection
                    )
                });
                (selected, detail)
            },
            Err(e) => {
                let selected = vec![None; extraction.selection.positions().count()];
                (selected, Some(format!("invalid UTF-8 at byte {}", e.valid_up_to())))
            },
        };

        if let Some(detail) = detail {
            match extraction.policy {
                MalformedRowPolicy::Abort => {
                    return Err(EtlError::MalformedRow {
                        path: input.to_path_buf(),
                        line: line_no,
                        detail,
                    });
                },
                MalformedRowPolicy::Skip => {
                    warn!(path = %input.display(), line = line_no, %detail, "Skipping malformed row");
                    stats.rows_skipped += 1;
                    continue;
                },
                MalformedRowPolicy::Pad => {
                    warn!(path = %input.display(), line = line_no, %detail, "Padding malformed row");
                    stats.rows_padded += 1;
                },
            }
        }

        let fields: Vec<&str> = selected.into_iter().map(|f| f.unwrap_or("")).collect();
        staged.write_line(&fields.join(OUTPUT_DELIMITER))?;
        stats.rows_written += 1;
    }

    staged.commit()?;

    debug!(?stats, "Extraction stats");
    info!(
        input = %input.display(),
        output = %output.display(),
        rows = stats.rows_written,
        "Extracted fields {}",
        extraction.selection
    );

    Ok(stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn extraction(format: SourceFormat, selection: &str, policy: MalformedRowPolicy) -> Extraction {
        Extraction {
            format,
            selection: selection.parse().unwrap(),
            policy,
        }
    }

    fn run(content: &str, extraction: &Extraction) -> (Result<ExtractStats>, Option<String>) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.csv");
        std::fs::write(&input, content).unwrap();

        let result = extract_fields(&input, &output, extraction);
        let written = std::fs::read_to_string(&output).ok();
        (result, written)
    }

    #[test]
    fn test_csv_keeps_first_four_fields() {
        let content = "1,Thu Aug 19 21:54:38 2021,125094,car,2,VC965\n\
                       2,Sat Jul 31 04:09:44 2021,174434,car,2,VC965\n";
        let ex = extraction(SourceFormat::comma(), "1-4", MalformedRowPolicy::Abort);

        let (result, written) = run(content, &ex);
        let stats = result.unwrap();

        assert_eq!(stats.rows_read, 2);
        assert_eq!(stats.rows_written, 2);
        assert_eq!(
            written.unwrap(),
            "1,Thu Aug 19 21:54:38 2021,125094,car\n2,Sat Jul 31 04:09:44 2021,174434,car\n"
        );
    }

    #[test]
    fn test_tsv_is_reemitted_with_commas_and_crlf_stripped() {
        let content = "1\tThu Aug 19\t125094\tcar\t4\t4856\tPC7C042B7\r\n";
        let ex = extraction(SourceFormat::tab(), "5-7", MalformedRowPolicy::Abort);

        let (result, written) = run(content, &ex);
        result.unwrap();
        assert_eq!(written.unwrap(), "4,4856,PC7C042B7\n");
    }

    #[test]
    fn test_fixed_width_trims_padding() {
        let columns = vec![
            ColumnSpan::new(1, 6).unwrap(),
            ColumnSpan::new(8, 10).unwrap(),
            ColumnSpan::new(12, 16).unwrap(),
        ];
        let content = "     1 PTE VC965\n    12 PTP  VC12\n";
        let ex = extraction(SourceFormat::FixedWidth(columns), "2-3", MalformedRowPolicy::Abort);

        let (result, written) = run(content, &ex);
        result.unwrap();
        assert_eq!(written.unwrap(), "PTE,VC965\nPTP,VC12\n");
    }

    #[test]
    fn test_selection_order_is_preserved() {
        let ex = extraction(SourceFormat::comma(), "3,1", MalformedRowPolicy::Abort);
        let (result, written) = run("a,b,c\n", &ex);
        result.unwrap();
        assert_eq!(written.unwrap(), "c,a\n");
    }

    #[test]
    fn test_short_row_aborts_by_default() {
        let ex = extraction(SourceFormat::comma(), "1-4", MalformedRowPolicy::Abort);
        let (result, written) = run("1,2,3,4\n1,2\n", &ex);

        match result.unwrap_err() {
            EtlError::MalformedRow { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(written.is_none(), "no fragment may be left behind");
    }

    #[test]
    fn test_short_row_skip_and_pad() {
        let content = "1,2,3\n1\n";

        let skip = extraction(SourceFormat::comma(), "1-3", MalformedRowPolicy::Skip);
        let (result, written) = run(content, &skip);
        assert_eq!(result.unwrap().rows_skipped, 1);
        assert_eq!(written.unwrap(), "1,2,3\n");

        let pad = extraction(SourceFormat::comma(), "1-3", MalformedRowPolicy::Pad);
        let (result, written) = run(content, &pad);
        let stats = result.unwrap();
        assert_eq!(stats.rows_padded, 1);
        assert_eq!(stats.rows_written, stats.rows_read);
        assert_eq!(written.unwrap(), "1,2,3\n1,,\n");
    }

    #[test]
    fn test_fixed_width_short_line_is_malformed() {
        let columns = vec![ColumnSpan::new(1, 3).unwrap(), ColumnSpan::new(5, 9).unwrap()];
        let ex = extraction(SourceFormat::FixedWidth(columns), "1-2", MalformedRowPolicy::Abort);
        let (result, _) = run("abc defgh\nabc de\n", &ex);
        assert!(matches!(result, Err(EtlError::MalformedRow { line: 2, .. })));
    }

    #[test]
    fn test_selection_beyond_declared_columns_is_config_error() {
        let columns = vec![ColumnSpan::new(1, 3).unwrap()];
        let ex = extraction(SourceFormat::FixedWidth(columns), "1-2", MalformedRowPolicy::Abort);
        assert!(matches!(ex.validate(), Err(EtlError::Config(_))));
    }

    #[test]
    fn test_line_count_preserved_on_happy_path() {
        let content: String = (1..=250).map(|i| format!("{i},a,b,c,d\n")).collect();
        let ex = extraction(SourceFormat::comma(), "1-4", MalformedRowPolicy::Abort);
        let (result, written) = run(&content, &ex);
        assert_eq!(result.unwrap().rows_written, 250);
        assert_eq!(written.unwrap().lines().count(), 250);
    }

    fn run_bytes(content: &[u8], extraction: &Extraction) -> (Result<ExtractStats>, Option<String>) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.csv");
        std::fs::write(&input, content).unwrap();

        let result = extract_fields(&input, &output, extraction);
        let written = std::fs::read_to_string(&output).ok();
        (result, written)
    }

    #[test]
    fn test_invalid_utf8_row_is_malformed() {
        let content = b"1,caf\xe9,x,y\n2,b,c,d\n";

        let abort = extraction(SourceFormat::comma(), "1-4", MalformedRowPolicy::Abort);
        let (result, written) = run_bytes(content, &abort);
        let err = result.unwrap_err();
        assert!(!err.is_retryable());
        match err {
            EtlError::MalformedRow { line, detail, .. } => {
                assert_eq!(line, 1);
                assert!(detail.contains("invalid UTF-8"), "{detail}");
            },
            other => panic!("unexpected error: {other}"),
        }
        assert!(written.is_none());

        let skip = extraction(SourceFormat::comma(), "1-4", MalformedRowPolicy::Skip);
        let (result, written) = run_bytes(content, &skip);
        assert_eq!(result.unwrap().rows_skipped, 1);
        assert_eq!(written.unwrap(), "2,b,c,d\n");

        let pad = extraction(SourceFormat::comma(), "1-4", MalformedRowPolicy::Pad);
        let (result, written) = run_bytes(content, &pad);
        assert_eq!(result.unwrap().rows_padded, 1);
        assert_eq!(written.unwrap(), ",,,\n2,b,c,d\n");
    }

    #[test]
    fn test_last_line_without_newline_is_read() {
        let ex = extraction(SourceFormat::comma(), "2", MalformedRowPolicy::Abort);
        let (result, written) = run("a,b\r\nc,d", &ex);
        assert_eq!(result.unwrap().rows_read, 2);
        assert_eq!(written.unwrap(), "b\nd\n");
    }

    #[test]
    fn test_missing_input_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let ex = extraction(SourceFormat::comma(), "1", MalformedRowPolicy::Abort);
        let result = extract_fields(&dir.path().join("nope"), &dir.path().join("out"), &ex);
        assert!(matches!(result, Err(EtlError::Io(_))));
    }
}
