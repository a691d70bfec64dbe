//! Common types used across the toll-data pipeline

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TollError;

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Represents metadata for a staged file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: String,
    pub algorithm: ChecksumAlgorithm,
    pub checksum: String,
    pub size: u64,
}

impl FileMetadata {
    /// Check the recorded checksum against an expected hex digest
    pub fn verify(&self, expected: &str) -> std::result::Result<(), TollError> {
        if self.checksum.eq_ignore_ascii_case(expected.trim()) {
            Ok(())
        } else {
            Err(TollError::ChecksumMismatch {
                expected: expected.trim().to_string(),
                actual: self.checksum.clone(),
            })
        }
    }
}

/// Identifier of one pipeline run.
///
/// A run belongs to a logical date (the scheduled period it processes) and
/// carries a short random nonce, so two runs for the same period never share
/// a staging directory. The textual form is `YYYY-MM-DD_xxxxxxxx`.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use toll_common::RunId;
///
/// let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
/// let id = RunId::new(date);
/// assert!(id.to_string().starts_with("2026-10-19_"));
///
/// let parsed: RunId = id.to_string().parse().unwrap();
/// assert_eq!(parsed, id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId {
    logical_date: NaiveDate,
    nonce: String,
}

/// Length of the random suffix of a [`RunId`]
pub const RUN_NONCE_LEN: usize = 8;

impl RunId {
    /// Create a fresh run id for the given logical date
    pub fn new(logical_date: NaiveDate) -> Self {
        let nonce = Uuid::new_v4().simple().to_string()[..RUN_NONCE_LEN].to_string();
        Self {
            logical_date,
            nonce,
        }
    }

    /// The scheduled period this run processes
    pub fn logical_date(&self) -> NaiveDate {
        self.logical_date
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.logical_date.format("%Y-%m-%d"), self.nonce)
    }
}

impl std::str::FromStr for RunId {
    type Err = TollError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (date, nonce) = s
            .split_once('_')
            .ok_or_else(|| TollError::InvalidRunId(s.to_string()))?;

        let logical_date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| TollError::InvalidRunId(format!("{}: {}", s, e)))?;

        if nonce.len() != RUN_NONCE_LEN || !nonce.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TollError::InvalidRunId(s.to_string()));
        }

        Ok(Self {
            logical_date,
            nonce: nonce.to_ascii_lowercase(),
        })
    }
}

impl TryFrom<String> for RunId {
    type Error = TollError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RunId> for String {
    fn from(value: RunId) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn test_run_ids_for_same_date_differ() {
        let a = RunId::new(date());
        let b = RunId::new(date());
        assert_eq!(a.logical_date(), b.logical_date());
        assert_ne!(a, b);
    }

    #[test]
    fn test_run_id_rejects_garbage() {
        assert!("2026-10-19".parse::<RunId>().is_err());
        assert!("2026-13-01_abcdef12".parse::<RunId>().is_err());
        assert!("2026-10-19_xyz".parse::<RunId>().is_err());
        assert!("2026-10-19_ABCDEF12".parse::<RunId>().is_ok());
    }

    #[test]
    fn test_run_id_serde_as_string() {
        let id: RunId = "2026-10-19_0a1b2c3d".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"2026-10-19_0a1b2c3d\"");
        let back: RunId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
