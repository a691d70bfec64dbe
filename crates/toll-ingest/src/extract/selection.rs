//! Field selections and fixed-width column spans
//!
//! Both use 1-based positions, the way `cut` does. A selection is a
//! comma-separated list of `N` or `N-M` items (`1-4`, `5-7`, `1,3,6-7`) and
//! fields come out in the order listed. A span is an inclusive character
//! range (`59-61`) or a single character position.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered list of 1-based field positions to keep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldSelection {
    ranges: Vec<(usize, usize)>,
}

impl FieldSelection {
    /// Selection of the inclusive range `start..=end`
    pub fn range(start: usize, end: usize) -> Result<Self, String> {
        validate_range(start, end)?;
        Ok(Self {
            ranges: vec![(start, end)],
        })
    }

    /// 1-based positions in output order
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.ranges.iter().flat_map(|&(start, end)| start..=end)
    }

    /// Largest position referenced
    pub fn max_position(&self) -> usize {
        self.ranges.iter().map(|&(_, end)| end).max().unwrap_or(0)
    }

    /// Number of fields the selection emits
    pub fn width(&self) -> usize {
        self.ranges.iter().map(|&(start, end)| end - start + 1).sum()
    }
}

fn validate_range(start: usize, end: usize) -> Result<(), String> {
    if start == 0 {
        return Err("field positions are 1-based; 0 is not a field".to_string());
    }
    if start > end {
        return Err(format!("decreasing range {}-{}", start, end));
    }
    Ok(())
}

fn parse_position(s: &str) -> Result<usize, String> {
    s.trim()
        .parse::<usize>()
        .map_err(|_| format!("invalid position '{}'", s.trim()))
}

fn parse_range(item: &str) -> Result<(usize, usize), String> {
    let item = item.trim();
    if item.is_empty() {
        return Err("empty list item".to_string());
    }

    let (start, end) = match item.split_once('-') {
        Some((start, end)) => (parse_position(start)?, parse_position(end)?),
        None => {
            let pos = parse_position(item)?;
            (pos, pos)
        },
    };

    validate_range(start, end)?;
    Ok((start, end))
}

impl FromStr for FieldSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ranges = s
            .split(',')
            .map(parse_range)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid field selection '{}': {}", s, e))?;

        Ok(Self { ranges })
    }
}

impl fmt::Display for FieldSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, &(start, end)) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }
        Ok(())
    }
}

impl TryFrom<String> for FieldSelection {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldSelection> for String {
    fn from(value: FieldSelection) -> Self {
        value.to_string()
    }
}

/// Inclusive 1-based character span of one fixed-width column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColumnSpan {
    start: usize,
    end: usize,
}

impl ColumnSpan {
    pub fn new(start: usize, end: usize) -> Result<Self, String> {
        validate_range(start, end)?;
        Ok(Self { start, end })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// The span's characters from `line`, or `None` if the line ends first
    pub fn slice<'a>(&self, line: &'a str) -> Option<&'a str> {
        let mut offsets = line
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(line.len()));

        let from = offsets.nth(self.start - 1)?;
        let to = offsets.nth(self.end - self.start)?;
        Some(&line[from..to])
    }
}

impl FromStr for ColumnSpan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) =
            parse_range(s).map_err(|e| format!("invalid column span '{}': {}", s, e))?;
        Ok(Self { start, end })
    }
}

impl fmt::Display for ColumnSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl TryFrom<String> for ColumnSpan {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnSpan> for String {
    fn from(value: ColumnSpan) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cut_style_lists() {
        let sel: FieldSelection = "1-4".parse().unwrap();
        assert_eq!(sel.positions().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(sel.max_position(), 4);

        let sel: FieldSelection = "7, 1-2,5".parse().unwrap();
        assert_eq!(sel.positions().collect::<Vec<_>>(), vec![7, 1, 2, 5]);
        assert_eq!(sel.width(), 4);
        assert_eq!(sel.max_position(), 7);
        assert_eq!(sel.to_string(), "7,1-2,5");
    }

    #[test]
    fn test_reject_bad_selections() {
        for bad in ["", "0", "0-3", "4-2", "a", "1,,2", "3-"] {
            assert!(bad.parse::<FieldSelection>().is_err(), "accepted '{}'", bad);
        }
    }

    #[test]
    fn test_span_slices_by_character() {
        let span: ColumnSpan = "3-5".parse().unwrap();
        assert_eq!(span.slice("abcdefg"), Some("cde"));
        assert_eq!(span.slice("abcde"), Some("cde"));
        assert_eq!(span.slice("abcd"), None);

        // multi-byte characters count as one position each
        assert_eq!(span.slice("ééabc"), Some("abc"));
    }

    #[test]
    fn test_single_position_span() {
        let span: ColumnSpan = "1".parse().unwrap();
        assert_eq!(span.slice("xy"), Some("x"));
        assert_eq!(span.slice(""), None);
        assert_eq!(span.to_string(), "1");
    }

    #[test]
    fn test_serde_round_trip_as_strings() {
        #[derive(Serialize, Deserialize)]
        struct Holder {
            fields: FieldSelection,
            span: ColumnSpan,
        }

        let holder: Holder = toml::from_str("fields = \"5-7\"\nspan = \"59-61\"").unwrap();
        assert_eq!(holder.fields.to_string(), "5-7");
        assert_eq!(holder.span, ColumnSpan::new(59, 61).unwrap());
    }
}
