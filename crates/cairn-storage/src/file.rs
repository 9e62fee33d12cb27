//! # Filesystem Bucket
//!
//! Stores each object as a file under a root directory. Writes go to a
//! temporary sibling file that is then renamed over the target, so a
//! reader never observes a partially written object. Deleting the last
//! object in a directory prunes the now-empty directories up to the root,
//! keeping directory listings in step with what the object stores report.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::bucket::{dir_prefix, validate_key, Bucket, ListEntry, SEPARATOR};
use crate::error::BucketError;

/// Suffix of in-flight temporary files; never reported by `list`.
const TEMP_SUFFIX: &str = ".cairn-tmp";

/// A bucket backed by a local directory.
#[derive(Debug, Clone)]
pub struct FileBucket {
    root: PathBuf,
}

impl FileBucket {
    /// Create a bucket rooted at `root`. The directory is created on the
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BucketError> {
        validate_key(key)?;
        Ok(key
            .split(SEPARATOR)
            .fold(self.root.clone(), |path, seg| path.join(seg)))
    }

    fn dir_path_for(&self, dir: &str) -> Result<PathBuf, BucketError> {
        let prefix = dir_prefix(dir);
        if prefix.is_empty() {
            return Ok(self.root.clone());
        }
        self.path_for(prefix.trim_end_matches(SEPARATOR))
    }

    async fn prune_empty_parents(&self, mut path: PathBuf) {
        while let Some(parent) = path.parent().map(Path::to_path_buf) {
            if parent == self.root || !parent.starts_with(&self.root) {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk.
            if tokio::fs::remove_dir(&parent).await.is_err() {
                break;
            }
            path = parent;
        }
    }
}

#[async_trait]
impl Bucket for FileBucket {
    fn driver(&self) -> &'static str {
        "file"
    }

    async fn read_all(&self, key: &str) -> Result<Vec<u8>, BucketError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| BucketError::from_io(key, e))
    }

    async fn write_all(&self, key: &str, data: &[u8]) -> Result<(), BucketError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BucketError::from_io(key, e))?;
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("object");
        let temp = path.with_file_name(format!(
            ".{file_name}.{}{TEMP_SUFFIX}",
            uuid::Uuid::new_v4().simple()
        ));
        if let Err(e) = tokio::fs::write(&temp, data).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(BucketError::from_io(key, e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(BucketError::from_io(key, e));
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BucketError> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BucketError::from_io(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BucketError> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| BucketError::from_io(key, e))?;
        self.prune_empty_parents(path).await;
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<ListEntry>, BucketError> {
        let prefix = dir_prefix(dir);
        let path = self.dir_path_for(dir)?;
        let mut read_dir = match tokio::fs::read_dir(&path).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BucketError::from_io(&prefix, e)),
        };

        let mut entries = Vec::new();
        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(BucketError::from_io(&prefix, e)),
            };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::debug!(dir = %prefix, "skipping non-UTF-8 file name");
                continue;
            };
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| BucketError::from_io(&prefix, e))?;
            if file_type.is_dir() {
                entries.push(ListEntry {
                    key: format!("{prefix}{name}{SEPARATOR}"),
                    is_dir: true,
                });
            } else {
                entries.push(ListEntry {
                    key: format!("{prefix}{name}"),
                    is_dir: false,
                });
            }
        }
        entries.sort();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = FileBucket::new(dir.path());

        bucket.write_all("a/b/c.json", b"{}").await.unwrap();
        assert!(bucket.exists("a/b/c.json").await.unwrap());
        assert_eq!(bucket.read_all("a/b/c.json").await.unwrap(), b"{}");

        bucket.delete("a/b/c.json").await.unwrap();
        assert!(!bucket.exists("a/b/c.json").await.unwrap());
        assert!(!dir.path().join("a").exists(), "empty parents are pruned");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = FileBucket::new(dir.path());
        assert!(bucket.read_all("nope").await.unwrap_err().is_not_found());
        assert!(bucket.delete("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_reports_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = FileBucket::new(dir.path());
        bucket.write_all("s/dev.json", b"1").await.unwrap();
        bucket.write_all("s/infra/prod.json", b"2").await.unwrap();

        let entries = bucket.list("s").await.unwrap();
        assert_eq!(
            entries,
            vec![
                ListEntry { key: "s/dev.json".into(), is_dir: false },
                ListEntry { key: "s/infra/".into(), is_dir: true },
            ]
        );
        assert!(bucket.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = FileBucket::new(dir.path());
        bucket.write_all("k", b"one").await.unwrap();
        bucket.write_all("k", b"two").await.unwrap();
        assert_eq!(bucket.read_all("k").await.unwrap(), b"two");
        assert_eq!(bucket.list("").await.unwrap().len(), 1, "no temp files left");
    }

    #[tokio::test]
    async fn signed_url_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = FileBucket::new(dir.path());
        assert!(matches!(
            bucket.signed_url("k").await,
            Err(BucketError::Unsupported { .. })
        ));
    }
}
