//! Archiver binary entrypoint.
//! Loads configuration, wires the production stores and runs once, or on an
//! interval when `run_interval_secs` is set.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use board_rss_archiver::ingest::{config, scheduler};
use board_rss_archiver::Archiver;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `RUST_LOG` controls verbosity; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("board_rss_archiver=info,archiver=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = match config::load_default() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "failed to load configuration");
            return ExitCode::from(2);
        }
    };
    let interval = cfg.run_interval_secs;

    let archiver = match Archiver::from_config(cfg) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "invalid configuration");
            return ExitCode::from(2);
        }
    };

    if let Some(secs) = interval {
        let handle = scheduler::spawn_scheduler(archiver, Duration::from_secs(secs.max(1)));
        tokio::select! {
            _ = handle => {}
            _ = tokio::signal::ctrl_c() => tracing::info!("shutdown requested"),
        }
        return ExitCode::SUCCESS;
    }

    match archiver.run_once(chrono::Utc::now()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "archival run failed");
            ExitCode::FAILURE
        }
    }
}
