// src/ingest/progress.rs
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Durable string key-value store holding one cursor per source.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// In-process store; the default for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryProgressStore {
    inner: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner.lock().await.clone()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// All cursors in one JSON object on disk, replaced via temp file + rename.
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FileProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) if s.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(s) => serde_json::from_str(&s)
                .with_context(|| format!("parsing progress file {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e)
                .with_context(|| format!("reading progress file {}", self.path.display())),
        }
    }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _g = self.lock.lock().await;
        Ok(self.load().await?.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let _g = self.lock.lock().await;
        let mut map = self.load().await?;
        map.insert(key.to_string(), value.to_string());

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&map)?;
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// Per-source "highest article id already archived".
pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self { store }
    }

    pub fn key_for(source_id: &str) -> String {
        format!("last_processed:{source_id}")
    }

    /// Stored cursor, or 0 when absent. A corrupt value is logged, reset to
    /// 0 and reported as 0.
    pub async fn get(&self, source_id: &str) -> Result<u64> {
        let key = Self::key_for(source_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(0);
        };
        match raw.trim().parse::<u64>() {
            Ok(v) => Ok(v),
            Err(_) => {
                tracing::warn!(
                    source = source_id,
                    value = %raw,
                    "stored cursor is not an integer; resetting to 0"
                );
                self.store.put(&key, "0").await?;
                Ok(0)
            }
        }
    }

    /// Record `article_id` as the new cursor and report whether it was
    /// written. Non-integer ids are refused (logged, nothing written).
    pub async fn set(&self, source_id: &str, article_id: &str) -> Result<bool> {
        if article_id.parse::<u64>().is_err() {
            tracing::error!(
                source = source_id,
                article_id,
                "refusing to store non-integer cursor"
            );
            return Ok(false);
        }
        self.store.put(&Self::key_for(source_id), article_id).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_cursor_reads_as_zero() {
        let t = ProgressTracker::new(Arc::new(MemoryProgressStore::new()));
        assert_eq!(t.get("25").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn corrupt_cursor_resets() {
        let store = MemoryProgressStore::new();
        store.put("last_processed:25", "abc").await.unwrap();
        let t = ProgressTracker::new(Arc::new(store.clone()));
        assert_eq!(t.get("25").await.unwrap(), 0);
        assert_eq!(
            store.snapshot().await.get("last_processed:25").map(String::as_str),
            Some("0")
        );
    }

    #[tokio::test]
    async fn set_ignores_non_integer_ids() {
        let store = MemoryProgressStore::new();
        let t = ProgressTracker::new(Arc::new(store.clone()));
        assert!(t.set("25", "77561").await.unwrap());
        assert!(!t.set("25", "unknown").await.unwrap());
        assert_eq!(t.get("25").await.unwrap(), 77561);
    }

    #[tokio::test]
    async fn file_store_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("progress.json");

        let a = FileProgressStore::new(&path);
        a.put("last_processed:25", "100").await.unwrap();
        a.put("last_processed:26", "7").await.unwrap();

        let b = FileProgressStore::new(&path);
        assert_eq!(b.get("last_processed:25").await.unwrap().as_deref(), Some("100"));
        assert_eq!(b.get("last_processed:26").await.unwrap().as_deref(), Some("7"));
        assert_eq!(b.get("last_processed:27").await.unwrap(), None);
    }
}
