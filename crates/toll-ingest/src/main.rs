//! toll-ingest - toll-data staging pipeline

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use toll_common::logging::{init_logging, LogConfig, LogLevel};
use toll_ingest::config::PipelineConfig;
use toll_ingest::pipeline::{Pipeline, RunStatus};
use toll_ingest::scheduler::{DailySchedule, Scheduler};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "toll-ingest")]
#[command(author, version, about = "Toll-data staging pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true, env = "TOLL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute one run now
    Run {
        /// Logical date of the run (defaults to today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Run every day at the configured time until interrupted
    Schedule {
        /// Re-run missed dates since schedule.start_date first
        #[arg(long)]
        catch_up: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("toll-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Config => {
            let text = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", text);
            Ok(ExitCode::SUCCESS)
        },
        Command::Run { date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let pipeline = Pipeline::from_config(config).context("Failed to set up pipeline")?;

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let summary = pipeline
                .run(date, &cancel)
                .await
                .context("Failed to record run")?;

            match &summary.status {
                RunStatus::Succeeded => {
                    println!("Run {} succeeded", summary.run_id);
                    Ok(ExitCode::SUCCESS)
                },
                RunStatus::Failed { step, error } => {
                    eprintln!("Run {} failed at step {}: {}", summary.run_id, step, error);
                    Ok(ExitCode::FAILURE)
                },
                RunStatus::Cancelled { before_step } => {
                    eprintln!("Run {} cancelled before step {}", summary.run_id, before_step);
                    Ok(ExitCode::FAILURE)
                },
                RunStatus::Running => Ok(ExitCode::FAILURE),
            }
        },
        Command::Schedule { catch_up } => {
            let mut config = config;
            if catch_up {
                config.schedule.catch_up = true;
                config.validate()?;
            }

            let schedule = DailySchedule::new(config.schedule.daily_at()?);
            let catch_up_from = config.schedule.catch_up.then_some(config.schedule.start_date).flatten();

            let pipeline = Arc::new(Pipeline::from_config(config).context("Failed to set up pipeline")?);
            let mut scheduler = Scheduler::new(pipeline, schedule);
            if let Some(start) = catch_up_from {
                scheduler = scheduler.with_catch_up(start);
            }

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            scheduler
                .start(cancel)
                .await
                .context("Scheduler task panicked")?
                .context("Scheduler stopped with an error")?;

            info!("Shutdown complete");
            Ok(ExitCode::SUCCESS)
        },
    }
}
