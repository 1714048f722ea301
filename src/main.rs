mod canvas;
mod classify;
mod compose;
mod config;
mod error;
mod logger;
mod merge;
mod models;
mod openai;
mod pipeline;
mod plan;
mod study_kit;
mod telegram;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;

use crate::config::Config;
use crate::telegram::TelegramClient;

/// Daily Canvas digest over Telegram, with AI study guides for exams.
#[derive(Parser)]
#[command(name = "canvas-planner", version)]
struct Cli {
    /// Free-text study guide request, e.g. "create study guide for Midterm
    /// Exam". Without it the scheduled daily digest runs.
    request: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logger::init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Configuration error")?;

    if !cli.request.is_empty() {
        let request = cli.request.join(" ");
        return study_kit::run_on_demand(&config, &request).await;
    }

    tracing::info!(
        accounts = config.accounts.len(),
        "Starting Canvas daily planner"
    );
    match pipeline::run(&config, Utc::now()).await {
        Ok(report) => {
            tracing::info!(
                items = report.items,
                delivered = report.delivered,
                study_kits = report.study_kits,
                "Run completed successfully"
            );
            Ok(())
        }
        Err(err) => {
            notify_failure(&config, &err).await;
            Err(err)
        }
    }
}

/// Best-effort error message before the non-zero exit.
async fn notify_failure(config: &Config, err: &anyhow::Error) {
    let telegram = TelegramClient::new(&config.telegram);
    let text = format!("❌ *Error in Daily Canvas Planner*\n\n{:#}", err);
    if let Err(send_err) = telegram.send_message(&text).await {
        tracing::error!(error = %send_err, "Could not deliver the error notification");
    }
}
