//! Tests for the toll-ingest binary

mod common;

use assert_cmd::Command;
use common::{misaligned_archive, sample_rows, toll_archive};
use predicates::prelude::*;
use std::path::Path;

/// Binary running in `dir`, so no stray `.env` is picked up
fn toll_ingest(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("toll-ingest").unwrap();
    cmd.current_dir(dir)
        .env_remove("TOLL_CONFIG")
        .env("LOG_LEVEL", "warn");
    cmd
}

fn write_archive(dir: &Path, bytes: Vec<u8>) -> String {
    let archive = dir.join("tolldata.tgz");
    std::fs::write(&archive, bytes).unwrap();
    format!("file://{}", archive.display())
}

#[test]
fn test_help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    toll_ingest(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("schedule"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_config_prints_defaults() {
    let dir = tempfile::tempdir().unwrap();
    toll_ingest(dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("uppercase_field = 7"))
        .stdout(predicate::str::contains("csv_fields = \"1-4\""))
        .stdout(predicate::str::contains("retry_delay_secs = 300"));
}

#[test]
fn test_config_output_stays_parseable_with_logging() {
    let dir = tempfile::tempdir().unwrap();
    let output = toll_ingest(dir.path())
        .arg("config")
        .env("LOG_LEVEL", "debug")
        .output()
        .unwrap();

    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    let parsed: toll_ingest::PipelineConfig = toml::from_str(&text).unwrap();
    assert_eq!(parsed.transform.uppercase_field, 7);
}

#[test]
fn test_config_file_and_env_layers() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("toll.toml");
    std::fs::write(&file, "owner = \"night-shift\"\n\n[retry]\nretries = 2\n").unwrap();

    toll_ingest(dir.path())
        .arg("--config")
        .arg(&file)
        .arg("config")
        .env("TOLL_RETRIES", "4")
        .assert()
        .success()
        .stdout(predicate::str::contains("owner = \"night-shift\""))
        .stdout(predicate::str::contains("retries = 4"));
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    toll_ingest(dir.path())
        .arg("config")
        .env("TOLL_UPPERCASE_FIELD", "0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("uppercase_field"));
}

#[test]
fn test_run_from_local_archive() {
    let dir = tempfile::tempdir().unwrap();
    let url = write_archive(dir.path(), toll_archive(&sample_rows()));
    let staging = dir.path().join("staging");

    toll_ingest(dir.path())
        .args(["run", "--date", "2026-10-19"])
        .env("TOLL_ARCHIVE_URL", &url)
        .env("TOLL_STAGING_DIR", &staging)
        .assert()
        .success()
        .stdout(predicate::str::contains("Run 2026-10-19_"))
        .stdout(predicate::str::contains("succeeded"));

    let runs: Vec<_> = std::fs::read_dir(&staging).unwrap().collect();
    assert_eq!(runs.len(), 1);
    let run_dir = runs.into_iter().next().unwrap().unwrap().path();
    let transformed = std::fs::read_to_string(run_dir.join("transformed_data.csv")).unwrap();
    assert!(transformed.contains(",PC7C042B7,PTE,VC965"));
}

#[test]
fn test_failed_run_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let url = write_archive(dir.path(), misaligned_archive(&sample_rows()));

    toll_ingest(dir.path())
        .args(["run", "--date", "2026-10-19"])
        .env("TOLL_ARCHIVE_URL", &url)
        .env("TOLL_STAGING_DIR", dir.path().join("staging"))
        .env("TOLL_RETRY_DELAY_SECS", "0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed at step consolidate"))
        .stderr(predicate::str::contains("tsv=2"));
}

#[test]
fn test_bad_date_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    toll_ingest(dir.path())
        .args(["run", "--date", "19/10/2026"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--date"));
}
