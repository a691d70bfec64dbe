//! Toll-data staging pipeline
//!
//! Downloads the toll-data bundle, unpacks its three extracts, pulls selected
//! fields from each, stitches the fragments together column-wise and
//! uppercases one field. Each step writes a new file into a per-run staging
//! directory.
//!
//! # Modules
//!
//! - [`fetch`] and [`archive`]: get the tarball and unpack it
//! - [`extract`], [`consolidate`], [`transform`]: the record-level work
//! - [`pipeline`]: the linear step sequencer with retry and alerting
//! - [`scheduler`]: the daily trigger with optional catch-up
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use tokio_util::sync::CancellationToken;
//! use toll_ingest::config::PipelineConfig;
//! use toll_ingest::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::load(None)?;
//!     let pipeline = Pipeline::from_config(config)?;
//!
//!     let summary = pipeline.run(Utc::now().date_naive(), &CancellationToken::new()).await?;
//!     println!("{:?}", summary.status);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod archive;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod notify;
pub mod pipeline;
pub mod process;
pub mod scheduler;
pub mod staging;
pub mod transform;

pub use config::PipelineConfig;
pub use error::{EtlError, Result};
pub use pipeline::{Pipeline, RunStatus, RunSummary, StepKind};
