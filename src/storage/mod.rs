// src/storage/mod.rs
//! Object storage seam plus the archive key scheme.
//!
//! Every archived document lives at
//! `sources/<source_id>/<YYYY>_<MM>_<DD>_<article_id>.md`. The retention
//! reaper works purely off that shape.

pub mod fs;
pub mod reaper;
pub mod writer;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use tokio::sync::Mutex;

use crate::ingest::retention::{extract_date_only, DateFormatError};

pub use fs::FsObjectStore;
pub use reaper::RetentionReaper;
pub use writer::{ArchiveWriter, WriteOutcome};

pub const KEY_ROOT: &str = "sources";
pub const LIST_PAGE_SIZE: usize = 1000;
pub const MAX_DELETE_BATCH: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ListRequest<'a> {
    pub prefix: &'a str,
    /// Opaque continuation token from the previous page.
    pub cursor: Option<&'a str>,
    pub limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    pub truncated: bool,
    pub cursor: Option<String>,
}

/// Key-addressed blob store with metadata probes, paged listing and batch
/// deletes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>>;
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;
    async fn list(&self, req: ListRequest<'_>) -> Result<ListPage>;
    /// At most [`MAX_DELETE_BATCH`] keys per call. Missing keys are not an error.
    async fn delete(&self, keys: &[String]) -> Result<()>;
}

pub fn source_prefix(source_id: &str) -> String {
    format!("{KEY_ROOT}/{source_id}/")
}

/// `sources/<source>/<YYYY>_<MM>_<DD>_<article>.md`.
pub fn derive_key(
    source_id: &str,
    published_at: &str,
    article_id: &str,
) -> Result<String, DateFormatError> {
    let date = extract_date_only(published_at)?;
    let mut parts = date.splitn(3, '-');
    let (Some(y), Some(m), Some(d)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(DateFormatError(published_at.to_string()));
    };
    Ok(format!("{KEY_ROOT}/{source_id}/{y}_{m}_{d}_{article_id}.md"))
}

/// Embedded `YYYY-MM-DD` of a key produced by [`derive_key`]; `None` for any
/// other shape.
pub fn parse_key_date(key: &str) -> Option<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"^sources/[^/]+/(\d{4})_(\d{2})_(\d{2})_").unwrap());
    let c = re.captures(key)?;
    Some(format!("{}-{}-{}", &c[1], &c[2], &c[3]))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

/// Ordered in-memory store. The list cursor is the last key returned.
#[derive(Debug, Default, Clone)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    delete_batches: Arc<Mutex<Vec<usize>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(key).cloned()
    }

    /// Sizes of each `delete` call, in call order.
    pub async fn delete_batches(&self) -> Vec<usize> {
        self.delete_batches.lock().await.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        Ok(self.objects.lock().await.get(key).map(|o| ObjectMeta {
            key: key.to_string(),
            size: o.body.len() as u64,
        }))
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.objects.lock().await.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn list(&self, req: ListRequest<'_>) -> Result<ListPage> {
        let objects = self.objects.lock().await;
        let limit = req.limit.max(1);
        let mut matching = objects
            .iter()
            .filter(|(k, _)| k.starts_with(req.prefix))
            .filter(|(k, _)| req.cursor.map_or(true, |c| k.as_str() > c));

        let page: Vec<ObjectMeta> = matching
            .by_ref()
            .take(limit)
            .map(|(k, o)| ObjectMeta {
                key: k.clone(),
                size: o.body.len() as u64,
            })
            .collect();
        let truncated = matching.next().is_some();
        let cursor = if truncated {
            page.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            objects: page,
            truncated,
            cursor,
        })
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        anyhow::ensure!(
            keys.len() <= MAX_DELETE_BATCH,
            "delete batch of {} exceeds limit {MAX_DELETE_BATCH}",
            keys.len()
        );
        let mut objects = self.objects.lock().await;
        for k in keys {
            objects.remove(k);
        }
        self.delete_batches.lock().await.push(keys.len());
        Ok(())
    }
}
