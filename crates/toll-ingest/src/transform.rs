//! Uppercasing of one designated field of the consolidated file

use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::info;

use crate::error::{EtlError, Result};
use crate::extract::OUTPUT_DELIMITER;
use crate::staging::{self, StagedFile};

/// Rewrite field `field` (1-based) of `line` to ASCII uppercase.
///
/// Every other byte, delimiters and whitespace included, is left as is.
/// Returns `None` if the line has fewer than `field` fields.
pub fn uppercase_field(line: &str, field: usize) -> Option<String> {
    if field == 0 {
        return None;
    }

    let mut start = 0;
    for _ in 1..field {
        start += line[start..].find(OUTPUT_DELIMITER)? + OUTPUT_DELIMITER.len();
    }
    let end = line[start..]
        .find(OUTPUT_DELIMITER)
        .map_or(line.len(), |i| start + i);

    let mut out = String::with_capacity(line.len());
    out.push_str(&line[..start]);
    out.push_str(&line[start..end].to_ascii_uppercase());
    out.push_str(&line[end..]);
    Some(out)
}

/// Write `input` to `output` with `field` uppercased on every line
pub fn transform(input: &Path, output: &Path, field: usize) -> Result<usize> {
    if field == 0 {
        return Err(EtlError::config("uppercase field position is 1-based"));
    }

    let reader = BufReader::new(staging::open(input)?);
    let mut staged = StagedFile::create(output)?;
    let mut rows = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let rewritten = uppercase_field(&line, field).ok_or_else(|| EtlError::MalformedRow {
            path: input.to_path_buf(),
            line: index + 1,
            detail: format!("no field {} to uppercase", field),
        })?;
        staged.write_line(&rewritten)?;
        rows += 1;
    }

    staged.commit()?;
    info!(output = %output.display(), rows, field, "Uppercased field");

    Ok(rows)
}
