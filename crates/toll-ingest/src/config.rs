//! Pipeline configuration
//!
//! Loaded in layers: built-in defaults, an optional TOML file, `.env`, then
//! `TOLL_*` environment variables. The result is validated before any run
//! starts.
//!
//! ```toml
//! owner = "toll-data"
//!
//! [source]
//! archive_url = "https://example.org/tolldata.tgz"
//!
//! [extract]
//! csv_fields = "1-4"
//! malformed_rows = "abort"
//!
//! [retry]
//! retries = 1
//! retry_delay_secs = 300
//!
//! [notify]
//! email = "oncall@example.org"
//! channel = "sendmail"
//! ```

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::extract::{ColumnSpan, Extraction, FieldSelection, MalformedRowPolicy, SourceFormat};

// ============================================================================
// Defaults
// ============================================================================

/// Published location of the toll-data bundle.
pub const DEFAULT_ARCHIVE_URL: &str = "https://cf-courses-data.s3.us.cloud-object-storage.appdomain.cloud/IBM-DB0250EN-SkillsNetwork/labs/Final%20Assignment/tolldata.tgz";

pub const DEFAULT_CSV_FILE: &str = "vehicle-data.csv";
pub const DEFAULT_TSV_FILE: &str = "tollplaza-data.tsv";
pub const DEFAULT_FIXED_WIDTH_FILE: &str = "payment-data.txt";

/// Default staging root
pub const DEFAULT_STAGING_DIR: &str = "./staging";

/// Default time-of-day (UTC) of the daily trigger
pub const DEFAULT_DAILY_AT: &str = "00:00";

pub const DEFAULT_RETRIES: u32 = 1;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 300;
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 1800;

/// Consolidated column rewritten to uppercase
pub const DEFAULT_UPPERCASE_FIELD: usize = 7;

// ============================================================================
// Configuration types
// ============================================================================

/// How the archive is fetched and unpacked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// reqwest download and in-process gzip/tar
    #[default]
    Native,
    /// `curl` and `tar` run as external processes
    External,
}

impl FromStr for Transport {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" => Ok(Transport::Native),
            "external" | "shell" => Ok(Transport::External),
            _ => Err(anyhow::anyhow!("Invalid transport: {}", s)),
        }
    }
}

/// Where alerts are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifyChannel {
    /// Log the alert only
    #[default]
    Log,
    /// Pipe a mail message to a sendmail-compatible command
    Sendmail,
    /// POST the alert as JSON
    Webhook,
}

impl FromStr for NotifyChannel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "log" => Ok(NotifyChannel::Log),
            "sendmail" | "email" => Ok(NotifyChannel::Sendmail),
            "webhook" => Ok(NotifyChannel::Webhook),
            _ => Err(anyhow::anyhow!("Invalid notify channel: {}", s)),
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Who owns the scheduled runs; shown in notifications and run summaries
    pub owner: String,
    pub source: SourceConfig,
    pub staging: StagingConfig,
    pub extract: ExtractConfig,
    pub transform: TransformConfig,
    pub retry: RetryPolicy,
    pub notify: NotifyConfig,
    pub schedule: ScheduleConfig,
}

/// Archive location and the names of the files inside it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub archive_url: String,
    /// Expected SHA-256 of the archive; a mismatch fails the fetch
    pub archive_sha256: Option<String>,
    pub transport: Transport,
    pub csv_file: String,
    pub tsv_file: String,
    pub fixed_width_file: String,
    /// HTTP request timeout for the native fetcher
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Root under which every run gets its own directory
    pub root: PathBuf,
}

/// Field selections per extractor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub csv_fields: FieldSelection,
    pub tsv_fields: FieldSelection,
    /// Character spans of the fixed-width layout, one per column
    pub fixed_width_columns: Vec<ColumnSpan>,
    /// Which of `fixed_width_columns` to keep
    pub fixed_width_fields: FieldSelection,
    pub malformed_rows: MalformedRowPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// 1-based position in the consolidated record
    pub uppercase_field: usize,
}

/// Retry behaviour shared by every step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub retries: u32,
    pub retry_delay_secs: u64,
    /// Upper bound for a single attempt
    pub step_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Alert recipient
    pub email: Option<String>,
    pub on_failure: bool,
    pub on_retry: bool,
    pub channel: NotifyChannel,
    /// Command reading an RFC 822 message on stdin
    pub sendmail_command: String,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Time of day (UTC, `HH:MM`) at which the daily run fires
    pub daily_at: String,
    /// Re-run missed days on startup; off unless asked for
    pub catch_up: bool,
    /// First logical date considered by catch-up
    pub start_date: Option<NaiveDate>,
}

// ============================================================================
// Defaults
// ============================================================================

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            owner: "toll-data".to_string(),
            source: SourceConfig::default(),
            staging: StagingConfig::default(),
            extract: ExtractConfig::default(),
            transform: TransformConfig::default(),
            retry: RetryPolicy::default(),
            notify: NotifyConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            archive_sha256: None,
            transport: Transport::Native,
            csv_file: DEFAULT_CSV_FILE.to_string(),
            tsv_file: DEFAULT_TSV_FILE.to_string(),
            fixed_width_file: DEFAULT_FIXED_WIDTH_FILE.to_string(),
            http_timeout_secs: 300,
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_STAGING_DIR),
        }
    }
}

fn selection(start: usize, end: usize) -> FieldSelection {
    FieldSelection::range(start, end).unwrap_or_else(|_| unreachable!("constant range"))
}

fn span(start: usize, end: usize) -> ColumnSpan {
    ColumnSpan::new(start, end).unwrap_or_else(|_| unreachable!("constant span"))
}

impl Default for ExtractConfig {
    fn default() -> Self {
        // payment-data.txt ends with the payment type code at 59-61 and the
        // vehicle code at 63-67
        Self {
            csv_fields: selection(1, 4),
            tsv_fields: selection(5, 7),
            fixed_width_columns: vec![span(59, 61), span(63, 67)],
            fixed_width_fields: selection(1, 2),
            malformed_rows: MalformedRowPolicy::Abort,
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            uppercase_field: DEFAULT_UPPERCASE_FIELD,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            email: None,
            on_failure: true,
            on_retry: true,
            channel: NotifyChannel::Log,
            sendmail_command: "sendmail".to_string(),
            webhook_url: None,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: DEFAULT_DAILY_AT.to_string(),
            catch_up: false,
            start_date: None,
        }
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl RetryPolicy {
    /// Total attempts a step gets, the first one included
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl SourceConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl ExtractConfig {
    pub fn csv(&self) -> Extraction {
        Extraction {
            format: SourceFormat::comma(),
            selection: self.csv_fields.clone(),
            policy: self.malformed_rows,
        }
    }

    pub fn tsv(&self) -> Extraction {
        Extraction {
            format: SourceFormat::tab(),
            selection: self.tsv_fields.clone(),
            policy: self.malformed_rows,
        }
    }

    pub fn fixed_width(&self) -> Extraction {
        Extraction {
            format: SourceFormat::FixedWidth(self.fixed_width_columns.clone()),
            selection: self.fixed_width_fields.clone(),
            policy: self.malformed_rows,
        }
    }

    /// Number of columns in a consolidated record
    pub fn consolidated_width(&self) -> usize {
        self.csv_fields.width() + self.tsv_fields.width() + self.fixed_width_fields.width()
    }
}

impl ScheduleConfig {
    pub fn daily_at(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.daily_at, "%H:%M")
            .with_context(|| format!("schedule.daily_at must be HH:MM, got '{}'", self.daily_at))
    }
}

// ============================================================================
// Loading
// ============================================================================

fn env_value<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {}='{}': {}", key, raw, e)),
        Err(_) => Ok(None),
    }
}

impl PipelineConfig {
    /// Load configuration: defaults, optional TOML file, `.env`, `TOLL_*` env vars
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var("TOLL_CONFIG").ok().map(PathBuf::from),
        };

        let mut config = match path {
            Some(ref p) => Self::from_file(p)?,
            None => Self::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply `TOLL_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(owner) = env_value("TOLL_OWNER")? {
            self.owner = owner;
        }
        if let Some(url) = env_value("TOLL_ARCHIVE_URL")? {
            self.source.archive_url = url;
        }
        if let Some(sha) = env_value("TOLL_ARCHIVE_SHA256")? {
            self.source.archive_sha256 = Some(sha);
        }
        if let Some(transport) = env_value("TOLL_TRANSPORT")? {
            self.source.transport = transport;
        }
        if let Some(dir) = env_value::<String>("TOLL_STAGING_DIR")? {
            self.staging.root = PathBuf::from(dir);
        }
        if let Some(email) = env_value("TOLL_NOTIFY_EMAIL")? {
            self.notify.email = Some(email);
        }
        if let Some(channel) = env_value("TOLL_NOTIFY_CHANNEL")? {
            self.notify.channel = channel;
        }
        if let Some(url) = env_value("TOLL_WEBHOOK_URL")? {
            self.notify.webhook_url = Some(url);
        }
        if let Some(retries) = env_value("TOLL_RETRIES")? {
            self.retry.retries = retries;
        }
        if let Some(secs) = env_value("TOLL_RETRY_DELAY_SECS")? {
            self.retry.retry_delay_secs = secs;
        }
        if let Some(secs) = env_value("TOLL_STEP_TIMEOUT_SECS")? {
            self.retry.step_timeout_secs = secs;
        }
        if let Some(field) = env_value("TOLL_UPPERCASE_FIELD")? {
            self.transform.uppercase_field = field;
        }
        if let Some(policy) = env_value("TOLL_MALFORMED_ROWS")? {
            self.extract.malformed_rows = policy;
        }
        if let Some(at) = env_value("TOLL_DAILY_AT")? {
            self.schedule.daily_at = at;
        }
        if let Some(catch_up) = env_value("TOLL_CATCH_UP")? {
            self.schedule.catch_up = catch_up;
        }
        if let Some(date) = env_value("TOLL_START_DATE")? {
            self.schedule.start_date = Some(date);
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let url = &self.source.archive_url;
        if !(url.starts_with("http://") || url.starts_with("https://") || url.starts_with("file://"))
        {
            anyhow::bail!("source.archive_url must be an http(s):// or file:// URL, got '{}'", url);
        }

        if let Some(ref sha) = self.source.archive_sha256 {
            if sha.len() != 64 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
                anyhow::bail!("source.archive_sha256 must be 64 hex characters");
            }
        }

        for name in [
            &self.source.csv_file,
            &self.source.tsv_file,
            &self.source.fixed_width_file,
        ] {
            if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
                anyhow::bail!("source file names must be plain file names, got '{}'", name);
            }
        }

        if self.source.http_timeout_secs == 0 {
            anyhow::bail!("source.http_timeout_secs must be greater than 0");
        }

        if self.extract.fixed_width_columns.is_empty() {
            anyhow::bail!("extract.fixed_width_columns cannot be empty");
        }
        self.extract
            .fixed_width()
            .validate()
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let width = self.extract.consolidated_width();
        if self.transform.uppercase_field == 0 || self.transform.uppercase_field > width {
            anyhow::bail!(
                "transform.uppercase_field must be between 1 and {} (the consolidated width), got {}",
                width,
                self.transform.uppercase_field
            );
        }

        if self.retry.step_timeout_secs == 0 {
            anyhow::bail!("retry.step_timeout_secs must be greater than 0");
        }

        match self.notify.channel {
            NotifyChannel::Sendmail if self.notify.email.is_none() => {
                anyhow::bail!("notify.channel = sendmail requires notify.email");
            },
            NotifyChannel::Webhook if self.notify.webhook_url.is_none() => {
                anyhow::bail!("notify.channel = webhook requires notify.webhook_url");
            },
            _ => {},
        }

        self.schedule.daily_at()?;
        if self.schedule.catch_up && self.schedule.start_date.is_none() {
            anyhow::bail!("schedule.catch_up requires schedule.start_date");
        }

        Ok(())
    }
}
