//! Toll Common Library
//!
//! Shared types, utilities, and error handling for the toll-data pipeline.
//!
//! # Overview
//!
//! - **Error Handling**: `TollError` and the crate-wide `Result` alias
//! - **Checksums**: archive integrity fingerprints recorded per run
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Types**: run identifiers and file metadata
//!
//! # Example
//!
//! ```no_run
//! use toll_common::checksum::compute_file_checksum;
//! use toll_common::types::ChecksumAlgorithm;
//! use toll_common::Result;
//!
//! fn fingerprint(path: &str) -> Result<()> {
//!     let checksum = compute_file_checksum(path, ChecksumAlgorithm::Sha256)?;
//!     tracing::info!(%checksum, "archive fingerprint");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, TollError};
pub use types::{ChecksumAlgorithm, FileMetadata, RunId};
