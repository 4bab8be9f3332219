// src/storage/reaper.rs
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use metrics::counter;

use super::{
    parse_key_date, source_prefix, ListRequest, ObjectStore, LIST_PAGE_SIZE, MAX_DELETE_BATCH,
};
use crate::ingest::retention::{compute_cutoff_utc, DEFAULT_RETENTION_YEARS};

/// Deletes archived documents whose key date falls before the retention cutoff.
#[derive(Clone)]
pub struct RetentionReaper {
    store: Arc<dyn ObjectStore>,
    retention_years: u32,
    page_size: usize,
    batch_size: usize,
}

impl RetentionReaper {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            retention_years: DEFAULT_RETENTION_YEARS,
            page_size: LIST_PAGE_SIZE,
            batch_size: MAX_DELETE_BATCH,
        }
    }

    pub fn with_retention_years(mut self, years: u32) -> Self {
        self.retention_years = years;
        self
    }

    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = n.max(1);
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.clamp(1, MAX_DELETE_BATCH);
        self
    }

    /// Every key under the source prefix dated before `cutoff`. Keys that do
    /// not have the archive shape are left alone.
    pub async fn collect_expired(&self, source_id: &str, cutoff: &str) -> Result<Vec<String>> {
        let prefix = source_prefix(source_id);
        let mut cursor: Option<String> = None;
        let mut expired = Vec::new();

        loop {
            let page = self
                .store
                .list(ListRequest {
                    prefix: &prefix,
                    cursor: cursor.as_deref(),
                    limit: self.page_size,
                })
                .await
                .with_context(|| format!("listing {prefix}"))?;

            for obj in page.objects {
                let Some(date) = parse_key_date(&obj.key) else {
                    continue;
                };
                if date.as_str() < cutoff {
                    expired.push(obj.key);
                }
            }

            match page.cursor {
                Some(next) if page.truncated => cursor = Some(next),
                _ => break,
            }
        }
        Ok(expired)
    }

    /// Two phases: list every page first, then delete in bounded batches so
    /// the listing never runs against a mutating prefix. A failed batch does
    /// not stop later batches; already-deleted batches are not rolled back.
    pub async fn purge(&self, source_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = compute_cutoff_utc(now, self.retention_years);
        let expired = self.collect_expired(source_id, &cutoff).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0usize;
        let mut failures = Vec::new();
        for batch in expired.chunks(self.batch_size) {
            match self.store.delete(batch).await {
                Ok(()) => {
                    deleted += batch.len();
                    counter!("archiver_objects_purged_total").increment(batch.len() as u64);
                    for key in batch {
                        tracing::debug!(source = source_id, key = %key, "deleted expired document");
                    }
                }
                Err(e) => {
                    tracing::error!(
                        source = source_id,
                        batch = batch.len(),
                        error = %format!("{e:#}"),
                        "delete batch failed"
                    );
                    failures.push(e);
                }
            }
        }

        if deleted > 0 {
            tracing::info!(
                source = source_id,
                deleted,
                cutoff = %cutoff,
                "removed expired documents"
            );
        }
        if !failures.is_empty() {
            bail!(
                "{} of {} delete batches failed for source {source_id} ({deleted} documents deleted): {:#}",
                failures.len(),
                expired.len().div_ceil(self.batch_size),
                failures[0]
            );
        }
        Ok(deleted)
    }
}
