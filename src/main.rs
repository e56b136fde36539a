//! Daily Deploy Notifier Binary

use chrono::{NaiveDate, Utc};
use clap::Parser;
use deploy_notifier::{Config, DeliveryMode, NotificationJob, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Post yesterday's deploy statistics to a chat channel
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Report on this date (YYYY-MM-DD) instead of yesterday
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Print the message instead of posting it
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing();

    let cli = Cli::parse();

    info!("Starting deploy notifier v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration loading failed: {}", e);
            std::process::exit(1);
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    info!(
        "Notifier configuration - Elasticsearch: {}, Index: {}, Channel: {}",
        config.elasticsearch_urls.join(","),
        config.index_prefix,
        config.channel
    );

    let job = match NotificationJob::new(config).await {
        Ok(job) => job,
        Err(e) => {
            error!("Failed to initialize notifier: {}", e);
            std::process::exit(1);
        }
    };

    let date = cli.date.unwrap_or_else(|| job.default_report_date(Utc::now()));
    info!("Notification run {} starting", job.run_id());
    let mode = if cli.dry_run {
        DeliveryMode::DryRun
    } else {
        DeliveryMode::Post
    };

    match job.run(date, mode).await {
        Ok(text) => {
            if mode == DeliveryMode::DryRun {
                println!("{}", text);
            }
        }
        Err(e) => {
            error!("Deploy notification for {} failed: {}", date, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Initialize structured logging
fn initialize_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
