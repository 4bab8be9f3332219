// src/ingest/mod.rs
pub mod config;
pub mod enrich;
pub mod fetcher;
pub mod parser;
pub mod progress;
pub mod retention;
pub mod scheduler;
pub mod types;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use thiserror::Error;

use crate::ingest::config::ArchiverConfig;
use crate::ingest::enrich::enrich_entry;
use crate::ingest::fetcher::{FeedClient, FeedFetch};
use crate::ingest::parser::parse_feed;
use crate::ingest::progress::{FileProgressStore, ProgressStore, ProgressTracker};
use crate::ingest::retention::{compute_cutoff_utc, filter_entries};
use crate::ingest::types::{Entry, FeedSource, UNKNOWN_ARTICLE_ID};
use crate::preview::{HttpPreviewClient, PreviewLookup};
use crate::render::{format_document, MarkdownRenderer, Render};
use crate::storage::{ArchiveWriter, FsObjectStore, ObjectStore, RetentionReaper};

/// One-time metrics registration (so series show up once a recorder exists).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("archiver_entries_saved_total", "New documents written.");
        describe_counter!(
            "archiver_entries_duplicate_total",
            "Retained entries whose key already existed."
        );
        describe_counter!(
            "archiver_entries_skipped_total",
            "Entries at or below the progress cursor."
        );
        describe_counter!(
            "archiver_entries_expired_total",
            "Entries older than the retention cutoff."
        );
        describe_counter!(
            "archiver_objects_purged_total",
            "Stored documents removed by retention."
        );
        describe_counter!("archiver_source_errors_total", "Sources that failed a run.");
        describe_counter!("archiver_runs_total", "Scheduled runs started.");
        describe_counter!(
            "archiver_fetch_retries_total",
            "Feed fetch attempts retried after a transient error."
        );
        describe_counter!(
            "archiver_preview_errors_total",
            "Attachment preview lookups that failed."
        );
        describe_histogram!("archiver_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!("archiver_last_run_ts", "Unix ts when the last run finished.");
    });
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("All {failed} sources failed to process: {message}")]
    AllSourcesFailed { failed: usize, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceReport {
    pub source_id: String,
    pub parsed: usize,
    pub saved: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub expired: usize,
    pub deleted: usize,
    /// Cursor written at the end of this run, if any.
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunReport {
    pub fn total_saved(&self) -> usize {
        self.sources.iter().map(|s| s.saved).sum()
    }
}

/// Drives one archival run over every configured source, in order.
pub struct Archiver {
    config: ArchiverConfig,
    fetcher: Arc<dyn FeedFetch>,
    tracker: ProgressTracker,
    writer: ArchiveWriter,
    reaper: RetentionReaper,
    preview: Option<Arc<dyn PreviewLookup>>,
    renderer: Arc<dyn Render>,
    state: Mutex<RunState>,
}

impl Archiver {
    pub fn new(
        config: ArchiverConfig,
        fetcher: Arc<dyn FeedFetch>,
        objects: Arc<dyn ObjectStore>,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        let reaper =
            RetentionReaper::new(objects.clone()).with_retention_years(config.retention_years);
        Self {
            fetcher,
            tracker: ProgressTracker::new(progress),
            writer: ArchiveWriter::new(objects),
            reaper,
            preview: None,
            renderer: Arc::new(MarkdownRenderer),
            state: Mutex::new(RunState::Idle),
            config,
        }
    }

    /// Production wiring: HTTP feed client, directory object store, JSON
    /// progress file, and the preview service when configured.
    pub fn from_config(config: ArchiverConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = Arc::new(FeedClient::new(config.retry.clone()));
        let objects = Arc::new(FsObjectStore::new(&config.storage_root));
        let progress = Arc::new(FileProgressStore::new(&config.progress_path));
        let preview = config
            .preview
            .clone()
            .map(|p| Arc::new(HttpPreviewClient::new(p)) as Arc<dyn PreviewLookup>);
        let mut archiver = Self::new(config, fetcher, objects, progress);
        archiver.preview = preview;
        Ok(archiver)
    }

    pub fn with_preview(mut self, lookup: Arc<dyn PreviewLookup>) -> Self {
        self.preview = Some(lookup);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Render>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_reaper(mut self, reaper: RetentionReaper) -> Self {
        self.reaper = reaper;
        self
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, s: RunState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = s;
    }

    /// Process every source sequentially. Per-source failures are logged and
    /// counted; the run only fails when no source succeeded.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RunReport, RunError> {
        ensure_metrics_described();
        self.set_state(RunState::Running);
        let t0 = Instant::now();

        let sources = self.config.sources();
        let cutoff = compute_cutoff_utc(now, self.config.retention_years);
        tracing::info!(
            target: "archiver",
            sources = sources.len(),
            cutoff = %cutoff,
            "starting archival run"
        );

        let mut report = RunReport::default();
        let mut failures: Vec<String> = Vec::new();

        for source in &sources {
            match self.process_source(source, now, &cutoff).await {
                Ok(r) => {
                    tracing::info!(
                        target: "archiver",
                        source = %r.source_id,
                        parsed = r.parsed,
                        saved = r.saved,
                        duplicates = r.duplicates,
                        skipped = r.skipped,
                        expired = r.expired,
                        deleted = r.deleted,
                        "source done"
                    );
                    report.succeeded += 1;
                    report.sources.push(r);
                }
                Err(e) => {
                    tracing::error!(
                        target: "archiver",
                        source = %source.id,
                        error = %format!("{e:#}"),
                        "source failed"
                    );
                    counter!("archiver_source_errors_total").increment(1);
                    report.failed += 1;
                    failures.push(format!("{}: {e:#}", source.id));
                }
            }
        }

        gauge!("archiver_last_run_ts").set(now.timestamp() as f64);
        tracing::info!(
            target: "archiver",
            succeeded = report.succeeded,
            failed = report.failed,
            saved = report.total_saved(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "archival run finished"
        );

        if report.failed > 0 && report.succeeded == 0 {
            self.set_state(RunState::Failed);
            return Err(RunError::AllSourcesFailed {
                failed: report.failed,
                message: failures.join("; "),
            });
        }
        self.set_state(RunState::Completed);
        Ok(report)
    }

    async fn process_source(
        &self,
        source: &FeedSource,
        now: DateTime<Utc>,
        cutoff: &str,
    ) -> Result<SourceReport> {
        let id = source.id.as_str();
        let url = source.feed_url(&self.config.feed_base_url, &self.config.source_param);
        tracing::debug!(source = id, url = %url, "fetching feed");

        let xml = self
            .fetcher
            .fetch(&url)
            .await
            .with_context(|| format!("fetching {url}"))?;
        let mut feed = parse_feed(&xml).context("parsing feed")?;

        let mut report = SourceReport {
            source_id: id.to_string(),
            parsed: feed.items.len(),
            ..Default::default()
        };

        if feed.items.is_empty() {
            tracing::info!(source = id, "feed has no items");
        } else {
            let last = self.tracker.get(id).await.context("reading cursor")?;
            let outcome = filter_entries(std::mem::take(&mut feed.items), cutoff, last)?;
            report.skipped = outcome.skipped;
            report.expired = outcome.expired;
            counter!("archiver_entries_skipped_total").increment(outcome.skipped as u64);
            counter!("archiver_entries_expired_total").increment(outcome.expired as u64);

            warn_if_out_of_order(id, &outcome.retained);
            let first_id = outcome.retained.first().map(|e| e.article_id.clone());

            let mut enriched = Vec::with_capacity(outcome.retained.len());
            for entry in outcome.retained {
                enriched.push(enrich_entry(entry, self.preview.as_deref(), id).await);
            }

            for entry in &enriched {
                if entry.article_id == UNKNOWN_ARTICLE_ID {
                    tracing::warn!(
                        source = id,
                        link = %entry.link,
                        "entry has no article id; it shares a storage key with other such entries"
                    );
                }
                let doc = format_document(&feed, entry, now, self.renderer.as_ref());
                let out = self
                    .writer
                    .write(&doc, id, &entry.published_at, &entry.article_id)
                    .await?;
                if out.saved {
                    report.saved += 1;
                    counter!("archiver_entries_saved_total").increment(1);
                } else {
                    report.duplicates += 1;
                    counter!("archiver_entries_duplicate_total").increment(1);
                }
            }

            if let Some(first_id) = first_id {
                let written = self
                    .tracker
                    .set(id, &first_id)
                    .await
                    .context("writing cursor")?;
                if written {
                    report.cursor = Some(first_id);
                }
            }
        }

        report.deleted = self
            .reaper
            .purge(id, now)
            .await
            .context("purging expired documents")?;
        Ok(report)
    }
}

/// The cursor is taken from the first retained entry, which is only the
/// highest id when the feed is sorted by descending id.
fn warn_if_out_of_order(source_id: &str, retained: &[Entry]) {
    let ids: Vec<u64> = retained.iter().filter_map(Entry::numeric_id).collect();
    if let Some(w) = ids.windows(2).find(|w| w[0] <= w[1]) {
        tracing::warn!(
            source = source_id,
            first = w[0],
            next = w[1],
            "feed is not in descending id order; cursor may skip entries"
        );
    }
}
