//! # daily-report
//!
//! One-shot job: summarize today's heart-rate samples and push the report.
//! Meant to run from a timer shortly before local midnight.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Context;
use bandwatch_core::{Config, SqliteRecorder};
use bandwatch_daemon::daily::{run_daily_report, today_in};
use bandwatch_daemon::{logging, wiring};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production(), "daily-report")?;

    let config = Config::load().context("failed to load configuration")?;
    let recorder = SqliteRecorder::open(&config.storage.database_path)
        .context("failed to open history database")?;
    let notifier = wiring::build_notifier(&config)?;

    let tz = config.report.timezone;
    let today = today_in(tz);
    match run_daily_report(&recorder, notifier.as_ref(), today, tz).await? {
        Some(report) => println!("{report}"),
        None => println!("No heart-rate data for {today}."),
    }
    Ok(())
}
