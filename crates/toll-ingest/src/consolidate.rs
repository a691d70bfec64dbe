//! Column-wise concatenation of the three fragments
//!
//! Rows are aligned by position only, so the line counts of all fragments are
//! compared before a single output line is written.

use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{error, info};

use crate::error::{EtlError, Result};
use crate::extract::OUTPUT_DELIMITER;
use crate::staging::{self, StagedFile};

/// The three fragment files in consolidation order
#[derive(Debug, Clone, Copy)]
pub struct FragmentInputs<'a> {
    pub csv: &'a Path,
    pub tsv: &'a Path,
    pub fixed_width: &'a Path,
}

impl<'a> FragmentInputs<'a> {
    fn in_order(&self) -> [&'a Path; 3] {
        [self.csv, self.tsv, self.fixed_width]
    }
}

/// Count the records of a staging file
pub fn count_lines(path: &Path) -> Result<usize> {
    let reader = BufReader::new(staging::open(path)?);
    let mut count = 0;
    for line in reader.lines() {
        line?;
        count += 1;
    }
    Ok(count)
}

/// Fail unless every fragment has the same number of lines
pub fn check_alignment(inputs: &FragmentInputs<'_>) -> Result<usize> {
    let csv = count_lines(inputs.csv)?;
    let tsv = count_lines(inputs.tsv)?;
    let fixed_width = count_lines(inputs.fixed_width)?;

    if csv != tsv || tsv != fixed_width {
        error!(csv, tsv, fixed_width, "Fragment row counts differ");
        return Err(EtlError::Alignment {
            csv,
            tsv,
            fixed_width,
        });
    }

    Ok(csv)
}

/// Join line i of each fragment into line i of `output`
pub fn consolidate(inputs: &FragmentInputs<'_>, output: &Path) -> Result<usize> {
    let expected = check_alignment(inputs)?;

    let mut readers = inputs
        .in_order()
        .into_iter()
        .map(|path| staging::open(path).map(|f| BufReader::new(f).lines()))
        .collect::<Result<Vec<_>>>()?;

    let mut staged = StagedFile::create(output)?;
    let mut parts: Vec<String> = Vec::with_capacity(readers.len());

    for _ in 0..expected {
        parts.clear();
        for reader in readers.iter_mut() {
            // A file that shrank after the count is a partial write upstream
            let line = reader.next().transpose()?.ok_or(EtlError::Alignment {
                csv: expected,
                tsv: expected,
                fixed_width: expected,
            })?;
            parts.push(line);
        }
        staged.write_line(&parts.join(OUTPUT_DELIMITER))?;
    }

    staged.commit()?;
    info!(output = %output.display(), rows = expected, "Consolidated fragments");

    Ok(expected)
}
