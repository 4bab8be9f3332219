// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ingest::Archiver;

/// Run the archiver on a fixed interval. Runs never overlap: the next tick
/// waits for the previous run to finish.
pub fn spawn_scheduler(archiver: Arc<Archiver>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            counter!("archiver_runs_total").increment(1);
            match archiver.run_once(chrono::Utc::now()).await {
                Ok(report) => tracing::info!(
                    target: "archiver",
                    succeeded = report.succeeded,
                    failed = report.failed,
                    "scheduled run complete"
                ),
                Err(e) => tracing::error!(target: "archiver", error = %e, "scheduled run failed"),
            }
        }
    })
}
