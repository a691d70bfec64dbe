//! Shared fixtures for the pipeline and CLI tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use toll_ingest::config::PipelineConfig;
use toll_ingest::notify::{Notification, NotificationKind, Notifier};
use toll_ingest::process::SystemCommandRunner;
use toll_ingest::Pipeline;

/// One toll record as it appears across the three extracts
pub struct TollRow {
    pub id: u32,
    pub timestamp: &'static str,
    pub vehicle_number: u32,
    pub vehicle_type: &'static str,
    pub axles: u32,
    pub plaza_id: u32,
    pub plaza_code: &'static str,
    pub payment_type: &'static str,
    pub vehicle_code: &'static str,
}

impl TollRow {
    pub fn csv(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.id, self.timestamp, self.vehicle_number, self.vehicle_type, self.axles, self.vehicle_code
        )
    }

    pub fn tsv(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.id,
            self.timestamp,
            self.vehicle_number,
            self.vehicle_type,
            self.axles,
            self.plaza_id,
            self.plaza_code
        )
    }

    /// Fixed-width line with the payment type at 59-61 and the vehicle code at 63-67
    pub fn fixed_width(&self) -> String {
        let prefix = format!(
            "{:>6} {:<24} {:>10} {:>2} {:>11} ",
            self.id, self.timestamp, self.vehicle_number, 1, self.plaza_id
        );
        assert_eq!(prefix.chars().count(), 58);
        format!("{}{} {:>5}", prefix, self.payment_type, self.vehicle_code)
    }

    /// The line this row becomes in transformed_data.csv
    pub fn transformed(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{}",
            self.id,
            self.timestamp,
            self.vehicle_number,
            self.vehicle_type,
            self.axles,
            self.plaza_id,
            self.plaza_code.to_ascii_uppercase(),
            self.payment_type,
            self.vehicle_code
        )
    }
}

pub fn sample_rows() -> Vec<TollRow> {
    vec![
        TollRow {
            id: 1,
            timestamp: "Thu Aug 19 21:54:38 2021",
            vehicle_number: 125094,
            vehicle_type: "car",
            axles: 2,
            plaza_id: 4856,
            plaza_code: "pc7c042b7",
            payment_type: "PTE",
            vehicle_code: "VC965",
        },
        TollRow {
            id: 2,
            timestamp: "Sat Jul 31 04:09:44 2021",
            vehicle_number: 174434,
            vehicle_type: "car",
            axles: 2,
            plaza_id: 4154,
            plaza_code: "PC2C2EF9E",
            payment_type: "PTP",
            vehicle_code: "VC965",
        },
        TollRow {
            id: 3,
            timestamp: "Sat Aug 14 17:19:04 2021",
            vehicle_number: 8538,
            vehicle_type: "truck",
            axles: 4,
            plaza_id: 4070,
            plaza_code: "pc8e9bd2e",
            payment_type: "PTC",
            vehicle_code: "VCB1A",
        },
    ]
}

/// Build a tolldata.tgz holding the given member files
pub fn tgz(files: &[(&str, String)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, contents.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn lines(rows: &[TollRow], f: impl Fn(&TollRow) -> String) -> String {
    rows.iter().map(|r| f(r) + "\n").collect()
}

/// Archive of the three extracts for `rows`
pub fn toll_archive(rows: &[TollRow]) -> Vec<u8> {
    tgz(&[
        ("vehicle-data.csv", lines(rows, TollRow::csv)),
        ("tollplaza-data.tsv", lines(rows, TollRow::tsv)),
        ("payment-data.txt", lines(rows, TollRow::fixed_width)),
        ("fileformats.txt", "field descriptions\n".to_string()),
    ])
}

/// Archive whose tsv extract is one row short
pub fn misaligned_archive(rows: &[TollRow]) -> Vec<u8> {
    tgz(&[
        ("vehicle-data.csv", lines(rows, TollRow::csv)),
        ("tollplaza-data.tsv", lines(&rows[..rows.len() - 1], TollRow::tsv)),
        ("payment-data.txt", lines(rows, TollRow::fixed_width)),
    ])
}

/// Configuration pointing at `archive_url` with staging under `staging_root`
pub fn test_config(archive_url: &str, staging_root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.source.archive_url = archive_url.to_string();
    config.staging.root = staging_root.to_path_buf();
    config.retry.retry_delay_secs = 0;
    config.retry.step_timeout_secs = 30;
    config.validate().unwrap();
    config
}

/// Notifier that keeps every notification
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.seen.lock().unwrap().iter().filter(|n| n.kind == kind).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> toll_ingest::Result<()> {
        self.seen.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub fn pipeline(config: PipelineConfig, notifier: Arc<RecordingNotifier>) -> Pipeline {
    Pipeline::new(
        config,
        Arc::new(SystemCommandRunner),
        notifier,
        reqwest::Client::new(),
    )
    .without_progress()
}
