//! Attempt loop shared by every step

use std::future::Future;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};

use super::StepKind;
use crate::config::RetryPolicy;
use crate::error::{EtlError, Result};
use crate::notify::{self, Notification, NotificationKind, Notifier};
use toll_common::RunId;

/// Everything the loop needs to attempt, time out, retry and alert
pub struct Attempts<'a> {
    pub policy: &'a RetryPolicy,
    pub cancel: &'a CancellationToken,
    pub notifier: &'a dyn Notifier,
    pub notify_on_retry: bool,
    pub run_id: &'a RunId,
    pub owner: &'a str,
    pub step: StepKind,
}

/// Final result of a step and how many attempts it took
#[derive(Debug)]
pub struct Outcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

impl Attempts<'_> {
    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out.
    ///
    /// Each attempt is bounded by the step timeout. A cancellation that
    /// arrives during the delay between attempts ends the loop with
    /// [`EtlError::Cancelled`].
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Outcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts();
        let step_timeout = self.policy.step_timeout();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let span = info_span!("step", step = %self.step, attempt);

            let result = match tokio::time::timeout(step_timeout, op().instrument(span)).await {
                Ok(res) => res,
                Err(_) => Err(EtlError::Timeout(step_timeout)),
            };

            let err = match result {
                Ok(value) => {
                    return Outcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                },
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= max_attempts {
                return Outcome {
                    result: Err(err),
                    attempts: attempt,
                };
            }

            warn!(
                step = %self.step,
                attempt,
                max_attempts,
                error = %err,
                delay_secs = self.policy.retry_delay_secs,
                "Step failed, retrying"
            );

            if self.notify_on_retry {
                let notification = Notification {
                    kind: NotificationKind::Retry,
                    run_id: self.run_id.clone(),
                    step: self.step.to_string(),
                    attempt,
                    max_attempts,
                    owner: self.owner.to_string(),
                    error: err.to_string(),
                    timestamp: Utc::now(),
                };
                notify::deliver(self.notifier, &notification).await;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Outcome {
                        result: Err(EtlError::Cancelled),
                        attempts: attempt,
                    };
                }
                _ = tokio::time::sleep(self.policy.retry_delay()) => {}
            }
        }
    }
}
