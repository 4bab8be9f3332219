// src/storage/fs.rs
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;

use super::{ListPage, ListRequest, ObjectMeta, ObjectStore, MAX_DELETE_BATCH};

const TMP_SUFFIX: &str = ".tmp";

/// Directory-backed object store: key `a/b/c.md` is the file `<root>/a/b/c.md`.
///
/// There is no metadata slot on disk, so the content type passed to `put` is
/// not persisted; archive keys already end in `.md`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let clean = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            bail!("invalid object key: {key:?}");
        }
        Ok(self.root.join(rel))
    }
}

/// Every regular file under `dir`, as `/`-separated keys relative to `root`.
fn walk_keys(root: &Path, dir: &Path, out: &mut Vec<(String, u64)>) -> std::io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let ft = entry.file_type()?;
        if ft.is_dir() {
            walk_keys(root, &path, out)?;
        } else if ft.is_file() {
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.ends_with(TMP_SUFFIX) {
                continue;
            }
            out.push((key, entry.metadata()?.len()));
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => Ok(Some(ObjectMeta {
                key: key.to_string(),
                size: m.len(),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("stat {}", path.display())),
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    async fn list(&self, req: ListRequest<'_>) -> Result<ListPage> {
        // Walk from the deepest directory fully named by the prefix.
        let dir_part = match req.prefix.rfind('/') {
            Some(i) => &req.prefix[..i],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.path_for(dir_part)?
        };

        let root = self.root.clone();
        let mut keys = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            walk_keys(&root, &start, &mut out).map(|_| out)
        })
        .await
        .map_err(|e| anyhow!("listing task failed: {e}"))?
        .with_context(|| format!("listing {}", req.prefix))?;
        keys.sort();

        let limit = req.limit.max(1);
        let mut matching = keys
            .into_iter()
            .filter(|(k, _)| k.starts_with(req.prefix))
            .filter(|(k, _)| req.cursor.map_or(true, |c| k.as_str() > c));
        let objects: Vec<ObjectMeta> = matching
            .by_ref()
            .take(limit)
            .map(|(key, size)| ObjectMeta { key, size })
            .collect();
        let truncated = matching.next().is_some();
        let cursor = if truncated {
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            objects,
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
        for key in keys {
            let path = self.path_for(key)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("removing {}", path.display())),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_head_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        assert!(store.head("sources/25/2025_10_17_1.md").await.unwrap().is_none());
        store
            .put("sources/25/2025_10_17_1.md", b"# one".to_vec(), "text/markdown")
            .await
            .unwrap();
        store
            .put("sources/25/2025_10_18_2.md", b"# two".to_vec(), "text/markdown")
            .await
            .unwrap();
        store
            .put("sources/26/2025_10_18_2.md", b"# other".to_vec(), "text/markdown")
            .await
            .unwrap();

        let meta = store.head("sources/25/2025_10_17_1.md").await.unwrap().unwrap();
        assert_eq!(meta.size, 5);

        let page = store
            .list(ListRequest {
                prefix: "sources/25/",
                cursor: None,
                limit: 1,
            })
            .await
            .unwrap();
        assert_eq!(page.objects[0].key, "sources/25/2025_10_17_1.md");
        assert!(page.truncated);
        let page2 = store
            .list(ListRequest {
                prefix: "sources/25/",
                cursor: page.cursor.as_deref(),
                limit: 1,
            })
            .await
            .unwrap();
        assert_eq!(page2.objects[0].key, "sources/25/2025_10_18_2.md");
        assert!(!page2.truncated);

        store
            .delete(&["sources/25/2025_10_17_1.md".to_string(), "sources/25/missing.md".to_string()])
            .await
            .unwrap();
        assert!(store.head("sources/25/2025_10_17_1.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_a_missing_prefix_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let page = store
            .list(ListRequest {
                prefix: "sources/99/",
                cursor: None,
                limit: 10,
            })
            .await
            .unwrap();
        assert!(page.objects.is_empty());
        assert!(!page.truncated);
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.put("../escape.md", vec![], "text/plain").await.is_err());
        assert!(store.head("/etc/passwd").await.is_err());
    }
}
