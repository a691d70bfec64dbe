//! Linear task sequencer
//!
//! A run walks the steps in [`StepKind::ALL`] order. A step starts only after
//! the previous one succeeded. Every step goes through the same attempt loop
//! ([`retry::Attempts`]) and every outcome is recorded in the run's
//! `run.json`.

pub mod retry;
pub mod summary;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use toll_common::{FileMetadata, RunId};
use tracing::{error, info, info_span, Instrument};

use crate::archive::Unpacker;
use crate::config::PipelineConfig;
use crate::consolidate::{consolidate, FragmentInputs};
use crate::error::{EtlError, Result};
use crate::extract::extract_fields;
use crate::fetch::{http_client, Fetcher};
use crate::notify::{self, build_notifier, Notification, NotificationKind, Notifier};
use crate::process::{CommandRunner, SystemCommandRunner};
use crate::staging::RunLayout;
use crate::transform::transform;

pub use retry::{Attempts, Outcome};

/// Step name reported when the staging area itself cannot be written
pub const STAGING_STEP: &str = "staging";
pub use summary::{list_summaries, succeeded_dates, RunStatus, RunSummary, StepRecord, StepStatus};

/// The steps of a run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Fetch,
    Unpack,
    ExtractCsv,
    ExtractTsv,
    ExtractFixedWidth,
    Consolidate,
    Transform,
}

impl StepKind {
    pub const ALL: [StepKind; 7] = [
        StepKind::Fetch,
        StepKind::Unpack,
        StepKind::ExtractCsv,
        StepKind::ExtractTsv,
        StepKind::ExtractFixedWidth,
        StepKind::Consolidate,
        StepKind::Transform,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Fetch => "fetch",
            StepKind::Unpack => "unpack",
            StepKind::ExtractCsv => "extract_csv",
            StepKind::ExtractTsv => "extract_tsv",
            StepKind::ExtractFixedWidth => "extract_fixed_width",
            StepKind::Consolidate => "consolidate",
            StepKind::Transform => "transform",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a successful step produced
#[derive(Debug, Default)]
struct StepOutput {
    rows: Option<usize>,
    archive: Option<FileMetadata>,
}

impl StepOutput {
    fn rows(rows: usize) -> Self {
        Self {
            rows: Some(rows),
            archive: None,
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Runs the toll-data steps for one logical date at a time
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    runner: Arc<dyn CommandRunner>,
    notifier: Arc<dyn Notifier>,
    client: Client,
    progress: bool,
}

impl Pipeline {
    /// Pipeline with explicit collaborators
    pub fn new(
        config: PipelineConfig,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<dyn Notifier>,
        client: Client,
    ) -> Self {
        Self {
            config: Arc::new(config),
            runner,
            notifier,
            client,
            progress: true,
        }
    }

    /// Pipeline using system processes and the configured notification channel
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let client = http_client(&config.source)?;
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
        let notifier = build_notifier(&config.notify, runner.clone(), client.clone())?;
        Ok(Self::new(config, runner, notifier, client))
    }

    /// Never draw a download progress bar
    pub fn without_progress(mut self) -> Self {
        self.progress = false;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run for `logical_date`.
    ///
    /// Step failures and cancellation are reported through the returned
    /// summary. An `Err` means the run directory or its summary could not be
    /// written; the failure notification is still sent for it.
    pub async fn run(&self, logical_date: NaiveDate, cancel: &CancellationToken) -> Result<RunSummary> {
        let run_id = RunId::new(logical_date);
        let span = info_span!("run", run_id = %run_id, %logical_date);

        async {
            let result = self.run_with_id(run_id.clone(), cancel).await;
            if let Err(ref err) = result {
                error!(error = %err, "Run halted, staging area not writable");
                self.notify_failure(&run_id, STAGING_STEP, 1, err).await;
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn notify_failure(&self, run_id: &RunId, step: &str, attempt: u32, err: &EtlError) {
        if !self.config.notify.on_failure {
            return;
        }
        let notification = Notification {
            kind: NotificationKind::Failure,
            run_id: run_id.clone(),
            step: step.to_string(),
            attempt,
            max_attempts: self.config.retry.max_attempts(),
            owner: self.config.owner.clone(),
            error: err.to_string(),
            timestamp: Utc::now(),
        };
        notify::deliver(self.notifier.as_ref(), &notification).await;
    }

    async fn run_with_id(&self, run_id: RunId, cancel: &CancellationToken) -> Result<RunSummary> {
        let layout = RunLayout::new(&self.config.staging.root, &run_id, &self.config.source);
        layout.create()?;

        let mut summary = RunSummary::new(run_id.clone(), self.config.owner.clone());
        summary.write(&layout.summary())?;
        info!(run_dir = %layout.run_dir().display(), owner = %self.config.owner, "Run started");

        let mut status = RunStatus::Succeeded;
        let mut halted: Option<(StepKind, u32, EtlError)> = None;

        for step in StepKind::ALL {
            if cancel.is_cancelled() {
                info!(%step, "Run cancelled before step");
                status = RunStatus::Cancelled { before_step: step };
                break;
            }

            let attempts = Attempts {
                policy: &self.config.retry,
                cancel,
                notifier: self.notifier.as_ref(),
                notify_on_retry: self.config.notify.on_retry,
                run_id: &run_id,
                owner: &self.config.owner,
                step,
            };

            let started_at = Utc::now();
            let outcome = attempts.run(|| self.execute(step, &layout)).await;
            let finished_at = Utc::now();

            let mut record = StepRecord {
                step,
                status: StepStatus::Succeeded,
                attempts: outcome.attempts,
                started_at,
                finished_at,
                duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
                rows: None,
                error: None,
            };

            match outcome.result {
                Ok(output) => {
                    info!(%step, attempts = outcome.attempts, rows = ?output.rows, "Step succeeded");
                    record.rows = output.rows;
                    if output.archive.is_some() {
                        summary.archive = output.archive;
                    }
                    summary.steps.push(record);
                    summary.write(&layout.summary())?;
                },
                Err(EtlError::Cancelled) => {
                    info!(%step, "Run cancelled while waiting to retry");
                    record.status = StepStatus::Cancelled;
                    record.error = Some(EtlError::Cancelled.to_string());
                    summary.steps.push(record);
                    status = RunStatus::Cancelled { before_step: step };
                    break;
                },
                Err(err) => {
                    error!(%step, attempts = outcome.attempts, error = %err, "Step failed");
                    record.status = StepStatus::Failed;
                    record.error = Some(err.to_string());
                    summary.steps.push(record);
                    status = RunStatus::Failed {
                        step,
                        error: err.to_string(),
                    };
                    halted = Some((step, outcome.attempts, err));
                    break;
                },
            }
        }

        summary.finish(status);
        summary.write(&layout.summary())?;

        // a failed final write is reported by `run` instead
        if let Some((step, attempts, err)) = halted {
            self.notify_failure(&run_id, step.name(), attempts, &err).await;
        }

        match &summary.status {
            RunStatus::Succeeded => info!(output = %layout.transformed().display(), "Run succeeded"),
            RunStatus::Failed { step, .. } => error!(%step, "Run failed"),
            RunStatus::Cancelled { before_step } => info!(%before_step, "Run cancelled"),
            RunStatus::Running => {},
        }

        Ok(summary)
    }

    async fn execute(&self, step: StepKind, layout: &RunLayout) -> Result<StepOutput> {
        let config = &self.config;

        match step {
            StepKind::Fetch => {
                let mut fetcher =
                    Fetcher::new(self.client.clone(), self.runner.clone(), config.source.transport);
                if !self.progress {
                    fetcher = fetcher.without_progress();
                }
                let metadata = fetcher.fetch(&config.source.archive_url, &layout.archive()).await?;
                if let Some(ref expected) = config.source.archive_sha256 {
                    metadata.verify(expected)?;
                }
                Ok(StepOutput {
                    rows: None,
                    archive: Some(metadata),
                })
            },
            StepKind::Unpack => {
                let unpacker = Unpacker::new(self.runner.clone(), config.source.transport);
                unpacker
                    .unpack(&layout.archive(), &layout.raw_dir(), &layout.raw_file_names())
                    .await?;
                Ok(StepOutput::default())
            },
            StepKind::ExtractCsv => {
                let extraction = config.extract.csv();
                let (input, output) = (layout.raw_csv(), layout.csv_fragment());
                let stats = blocking(move || extract_fields(&input, &output, &extraction)).await?;
                Ok(StepOutput::rows(stats.rows_written))
            },
            StepKind::ExtractTsv => {
                let extraction = config.extract.tsv();
                let (input, output) = (layout.raw_tsv(), layout.tsv_fragment());
                let stats = blocking(move || extract_fields(&input, &output, &extraction)).await?;
                Ok(StepOutput::rows(stats.rows_written))
            },
            StepKind::ExtractFixedWidth => {
                let extraction = config.extract.fixed_width();
                let (input, output) = (layout.raw_fixed_width(), layout.fixed_width_fragment());
                let stats = blocking(move || extract_fields(&input, &output, &extraction)).await?;
                Ok(StepOutput::rows(stats.rows_written))
            },
            StepKind::Consolidate => {
                let fragments: [PathBuf; 3] = [
                    layout.csv_fragment(),
                    layout.tsv_fragment(),
                    layout.fixed_width_fragment(),
                ];
                let output = layout.consolidated();
                let rows = blocking(move || {
                    let inputs = FragmentInputs {
                        csv: &fragments[0],
                        tsv: &fragments[1],
                        fixed_width: &fragments[2],
                    };
                    consolidate(&inputs, &output)
                })
                .await?;
                Ok(StepOutput::rows(rows))
            },
            StepKind::Transform => {
                let field = config.transform.uppercase_field;
                let (input, output) = (layout.consolidated(), layout.transformed());
                let rows = blocking(move || transform(&input, &output, field)).await?;
                Ok(StepOutput::rows(rows))
            },
        }
    }
}
