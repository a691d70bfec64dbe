//! Daily trigger
//!
//! Fires one run per day at a fixed UTC time. The logical date of a run is
//! the date it fires on. With catch-up enabled, dates between the configured
//! start date and the latest fire time that have no succeeded run are
//! processed first, oldest first.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::pipeline::{succeeded_dates, Pipeline, RunSummary};

/// Once a day at `at` (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl DailySchedule {
    pub fn new(at: NaiveTime) -> Self {
        Self { at }
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// First fire time strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.at).and_utc();
        if today > now {
            today
        } else {
            today + chrono::Duration::days(1)
        }
    }

    /// Logical date of the most recent fire at or before `now`
    pub fn last_fired_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let date = now.date_naive();
        if now.time() >= self.at {
            date
        } else {
            date.pred_opt().unwrap_or(date)
        }
    }

    /// Dates from `start` through the last fire that have not succeeded yet
    pub fn pending_dates(
        &self,
        start: NaiveDate,
        now: DateTime<Utc>,
        succeeded: &BTreeSet<NaiveDate>,
    ) -> Vec<NaiveDate> {
        let last = self.last_fired_date(now);
        let mut dates = Vec::new();
        let mut date = start;
        while date <= last {
            if !succeeded.contains(&date) {
                dates.push(date);
            }
            match date.checked_add_days(Days::new(1)) {
                Some(next) => date = next,
                None => break,
            }
        }
        dates
    }
}

/// Drives a [`Pipeline`] on a [`DailySchedule`] until cancelled
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    schedule: DailySchedule,
    catch_up_from: Option<NaiveDate>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, schedule: DailySchedule) -> Self {
        Self {
            pipeline,
            schedule,
            catch_up_from: None,
        }
    }

    /// Process missed dates starting at `start` before waiting for the next fire
    pub fn with_catch_up(mut self, start: NaiveDate) -> Self {
        self.catch_up_from = Some(start);
        self
    }

    /// Spawn the scheduling loop
    pub fn start(self, cancel: CancellationToken) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(at = %self.schedule.at(), "Scheduler started");

        if let Some(start) = self.catch_up_from {
            if let Err(e) = self.catch_up(start, &cancel).await {
                error!(%start, error = %e, "Catch-up failed");
            }
        }

        loop {
            let now = Utc::now();
            let next = self.schedule.next_after(now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next = %next, wait_secs = wait.as_secs(), "Waiting for next run");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let date = next.date_naive();
            if let Err(e) = self.run_date(date, &cancel).await {
                error!(%date, error = %e, "Scheduled run could not be recorded");
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    /// Run every pending date from `start` on, oldest first.
    ///
    /// Fails only if the staging root cannot be scanned. A date whose run
    /// cannot be recorded is logged and left pending.
    pub async fn catch_up(&self, start: NaiveDate, cancel: &CancellationToken) -> Result<Vec<RunSummary>> {
        let succeeded = succeeded_dates(&self.pipeline.config().staging.root)?;
        let pending = self.schedule.pending_dates(start, Utc::now(), &succeeded);

        if pending.is_empty() {
            info!(%start, "Nothing to catch up");
            return Ok(Vec::new());
        }
        info!(%start, runs = pending.len(), "Catching up missed dates");

        let mut summaries = Vec::with_capacity(pending.len());
        for date in pending {
            if cancel.is_cancelled() {
                warn!(%date, "Catch-up interrupted");
                break;
            }
            match self.run_date(date, cancel).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => error!(%date, error = %e, "Catch-up run could not be recorded"),
            }
        }
        Ok(summaries)
    }

    async fn run_date(&self, date: NaiveDate, cancel: &CancellationToken) -> Result<RunSummary> {
        let summary = self.pipeline.run(date, cancel).await?;
        if !summary.is_success() {
            error!(run_id = %summary.run_id, status = ?summary.status, "Scheduled run did not succeed");
        }
        Ok(summary)
    }
}
