//! Retry and failure alerts
//!
//! The sequencer hands every alert to a [`Notifier`]. Delivery problems are
//! logged and swallowed; an alert never changes the outcome of a run.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use toll_common::RunId;
use tracing::{error, info, warn};

use crate::config::{NotifyChannel, NotifyConfig};
use crate::error::{EtlError, Result};
use crate::process::{CommandRunner, ExternalCommand};

/// Why an alert was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A step failed and will be attempted again
    Retry,
    /// A step failed for good and the run halted
    Failure,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::Retry => write!(f, "retry"),
            NotificationKind::Failure => write!(f, "failure"),
        }
    }
}

/// One alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub run_id: RunId,
    pub step: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub owner: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn subject(&self) -> String {
        match self.kind {
            NotificationKind::Retry => format!(
                "[toll-ingest] Retrying {} for run {} (attempt {}/{})",
                self.step, self.run_id, self.attempt, self.max_attempts
            ),
            NotificationKind::Failure => {
                format!("[toll-ingest] Run {} failed at {}", self.run_id, self.step)
            },
        }
    }

    pub fn body(&self) -> String {
        format!(
            "Run:      {}\nStep:     {}\nAttempt:  {} of {}\nOwner:    {}\nTime:     {}\n\nError:\n{}\n",
            self.run_id,
            self.step,
            self.attempt,
            self.max_attempts,
            self.owner,
            self.timestamp.to_rfc3339(),
            self.error
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Send an alert, logging instead of failing when delivery breaks
pub async fn deliver(notifier: &dyn Notifier, notification: &Notification) {
    if let Err(e) = notifier.notify(notification).await {
        warn!(
            run_id = %notification.run_id,
            step = %notification.step,
            kind = %notification.kind,
            error = %e,
            "Failed to deliver notification"
        );
    }
}

/// Writes alerts to the log only
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    recipient: Option<String>,
}

impl LogNotifier {
    pub fn new(recipient: Option<String>) -> Self {
        Self { recipient }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &Notification) -> Result<()> {
        let recipient = self.recipient.as_deref().unwrap_or("-");
        match n.kind {
            NotificationKind::Retry => warn!(
                run_id = %n.run_id,
                step = %n.step,
                attempt = n.attempt,
                max_attempts = n.max_attempts,
                owner = %n.owner,
                recipient,
                error = %n.error,
                "Step will be retried"
            ),
            NotificationKind::Failure => error!(
                run_id = %n.run_id,
                step = %n.step,
                attempt = n.attempt,
                owner = %n.owner,
                recipient,
                error = %n.error,
                "Run failed"
            ),
        }
        Ok(())
    }
}

/// Pipes an RFC 822 message into a sendmail-compatible command
pub struct SendmailNotifier {
    runner: Arc<dyn CommandRunner>,
    command: String,
    recipient: String,
}

impl SendmailNotifier {
    pub fn new(runner: Arc<dyn CommandRunner>, command: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            runner,
            command: command.into(),
            recipient: recipient.into(),
        }
    }

    /// Headers and body of the mail for `n`
    pub fn message(&self, n: &Notification) -> String {
        format!(
            "To: {}\r\nSubject: {}\r\nDate: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}",
            self.recipient,
            n.subject(),
            n.timestamp.to_rfc2822(),
            n.body().replace('\n', "\r\n")
        )
    }

    fn command(&self, n: &Notification) -> Result<ExternalCommand> {
        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| EtlError::config("notify.sendmail_command is empty"))?;

        Ok(ExternalCommand::new(program)
            .args(parts)
            .arg(self.recipient.as_str())
            .stdin(self.message(n)))
    }
}

#[async_trait]
impl Notifier for SendmailNotifier {
    async fn notify(&self, n: &Notification) -> Result<()> {
        let command = self.command(n)?;
        self.runner.run(&command).await?.check(&command)?;
        info!(recipient = %self.recipient, kind = %n.kind, "Notification mailed");
        Ok(())
    }
}

/// POSTs alerts as JSON
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, n: &Notification) -> Result<()> {
        let response = self.client.post(&self.url).json(n).send().await?;
        if !response.status().is_success() {
            return Err(EtlError::transport(format!(
                "Webhook {} answered {}",
                self.url,
                response.status()
            )));
        }
        info!(url = %self.url, kind = %n.kind, "Notification posted");
        Ok(())
    }
}

/// Build the notifier selected by `config`
pub fn build_notifier(
    config: &NotifyConfig,
    runner: Arc<dyn CommandRunner>,
    client: Client,
) -> Result<Arc<dyn Notifier>> {
    Ok(match config.channel {
        NotifyChannel::Log => Arc::new(LogNotifier::new(config.email.clone())),
        NotifyChannel::Sendmail => {
            let email = config
                .email
                .clone()
                .ok_or_else(|| EtlError::config("sendmail notifications need notify.email"))?;
            Arc::new(SendmailNotifier::new(runner, config.sendmail_command.clone(), email))
        },
        NotifyChannel::Webhook => {
            let url = config
                .webhook_url
                .clone()
                .ok_or_else(|| EtlError::config("webhook notifications need notify.webhook_url"))?;
            Arc::new(WebhookNotifier::new(client, url))
        },
    })
}
