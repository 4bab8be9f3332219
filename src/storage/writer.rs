// src/storage/writer.rs
use std::sync::Arc;

use anyhow::{Context, Result};

use super::{derive_key, ObjectStore};

pub const MARKDOWN_CONTENT_TYPE: &str = "text/markdown; charset=utf-8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub saved: bool,
    pub key: String,
}

/// Write-once persistence of rendered entries.
///
/// Presence of the key decides the skip, not content equality: an upstream
/// edit under an unchanged key is never written. The head-then-put pair is
/// not atomic; concurrent writers of one key end last-writer-wins.
#[derive(Clone)]
pub struct ArchiveWriter {
    store: Arc<dyn ObjectStore>,
}

impl ArchiveWriter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn write(
        &self,
        document: &str,
        source_id: &str,
        published_at: &str,
        article_id: &str,
    ) -> Result<WriteOutcome> {
        let key = derive_key(source_id, published_at, article_id)?;

        if self
            .store
            .head(&key)
            .await
            .with_context(|| format!("probing {key}"))?
            .is_some()
        {
            return Ok(WriteOutcome { saved: false, key });
        }

        self.store
            .put(&key, document.as_bytes().to_vec(), MARKDOWN_CONTENT_TYPE)
            .await
            .with_context(|| format!("storing {key}"))?;
        Ok(WriteOutcome { saved: true, key })
    }
}
