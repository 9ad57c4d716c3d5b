use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use huddle_store::Database;
use huddle_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "huddle", about = "Anonymous interest-matched group chat server", version)]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 7070)]
    port: u16,

    /// Path to the chat database file
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log plain text instead of JSON lines
    #[arg(long)]
    plain_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry_config = TelemetryConfig {
        json_output: !cli.plain_logs,
        ..TelemetryConfig::default()
    };
    let snapshot_interval = telemetry_config.metrics_snapshot_interval_secs;
    let retention_days = telemetry_config.metrics_retention_days;
    let telemetry = Arc::new(init_telemetry(telemetry_config));

    tracing::info!("Starting Huddle server");

    // Database path
    let db_path = match cli.db_path {
        Some(path) => path,
        None => dirs_home().join(".huddle").join("database").join("huddle.db"),
    };
    let db = Database::open(&db_path).context("Failed to open database")?;
    tracing::info!(path = %db_path.display(), "Database opened");

    // Periodic metric snapshots with retention pruning
    let snapshot_guard = Arc::clone(&telemetry);
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(snapshot_interval));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(metrics) = snapshot_guard.metrics() else {
                break;
            };
            if let Err(e) = metrics.snapshot() {
                tracing::warn!(error = %e, "Could not snapshot metrics");
            }
            if let Err(e) = metrics.prune(retention_days) {
                tracing::warn!(error = %e, "Could not prune metric snapshots");
            }
        }
    });

    // Start server
    let config = huddle_server::ServerConfig {
        port: cli.port,
        ..Default::default()
    };
    let port = config.port;
    let _handle = huddle_server::start(config, db, Some(Arc::clone(&telemetry)))
        .await
        .context("Failed to start server")?;

    tracing::info!(port = port, "Huddle server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    Ok(())
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
