//! Error taxonomy for pipeline steps

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use toll_common::TollError;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Errors raised by pipeline steps
#[derive(Debug, Error)]
pub enum EtlError {
    /// Archive fetch or unpack failed, including non-zero external exits
    #[error("Transport error: {0}")]
    Transport(String),

    /// A source row lacks the fields the extraction asks for
    #[error("Malformed row at {}:{line}: {detail}", path.display())]
    MalformedRow {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    /// Fragment files disagree on their row count
    #[error(
        "Row alignment failure: fragment line counts differ (csv={csv}, tsv={tsv}, fixed_width={fixed_width})"
    )]
    Alignment {
        csv: usize,
        tsv: usize,
        fixed_width: usize,
    },

    #[error("Step timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Common(#[from] TollError),
}

impl EtlError {
    pub fn transport(msg: impl Into<String>) -> Self {
        EtlError::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        EtlError::Config(msg.into())
    }

    /// Whether another attempt can plausibly succeed.
    ///
    /// Malformed rows, alignment failures and configuration errors come from
    /// the input or the setup and repeat identically on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EtlError::MalformedRow { .. }
                | EtlError::Alignment { .. }
                | EtlError::Config(_)
                | EtlError::Cancelled
        )
    }
}

impl From<reqwest::Error> for EtlError {
    fn from(err: reqwest::Error) -> Self {
        EtlError::Transport(err.to_string())
    }
}

impl From<tokio::task::JoinError> for EtlError {
    fn from(err: tokio::task::JoinError) -> Self {
        EtlError::Io(std::io::Error::other(err))
    }
}

impl From<tempfile::PersistError> for EtlError {
    fn from(err: tempfile::PersistError) -> Self {
        EtlError::Io(err.error)
    }
}
