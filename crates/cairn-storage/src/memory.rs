//! In-process bucket backed by an ordered map. Used for `mem://` URLs and
//! throughout the test suites.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::bucket::{dir_prefix, validate_key, Bucket, ListEntry, SEPARATOR};
use crate::error::BucketError;

/// A bucket held entirely in memory. Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryBucket {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBucket {
    /// An empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every key currently stored, in order.
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    fn driver(&self) -> &'static str {
        "mem"
    }

    async fn read_all(&self, key: &str) -> Result<Vec<u8>, BucketError> {
        validate_key(key)?;
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| BucketError::NotFound {
                key: key.to_string(),
            })
    }

    async fn write_all(&self, key: &str, data: &[u8]) -> Result<(), BucketError> {
        validate_key(key)?;
        self.objects.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BucketError> {
        validate_key(key)?;
        Ok(self.objects.read().contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), BucketError> {
        validate_key(key)?;
        match self.objects.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(BucketError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn list(&self, dir: &str) -> Result<Vec<ListEntry>, BucketError> {
        let prefix = dir_prefix(dir);
        let objects = self.objects.read();
        let mut files = Vec::new();
        let mut dirs = BTreeSet::new();
        for key in objects.keys().filter(|k| k.starts_with(&prefix)) {
            let rest = &key[prefix.len()..];
            match rest.split_once(SEPARATOR) {
                Some((child, _)) => {
                    dirs.insert(format!("{prefix}{child}{SEPARATOR}"));
                }
                None => files.push(ListEntry {
                    key: key.clone(),
                    is_dir: false,
                }),
            }
        }
        files.extend(dirs.into_iter().map(|key| ListEntry { key, is_dir: true }));
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_groups_children_into_dirs() {
        let bucket = MemoryBucket::new();
        bucket.write_all(".cairn/stacks/a.json", b"").await.unwrap();
        bucket.write_all(".cairn/stacks/p/b.json", b"").await.unwrap();
        bucket.write_all(".cairn/stacks/p/c.json", b"").await.unwrap();
        bucket.write_all(".cairn/history/a/x", b"").await.unwrap();

        let entries = bucket.list(".cairn/stacks/").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, ".cairn/stacks/a.json");
        assert!(entries[1].is_dir);
        assert_eq!(entries[1].object_name(), "p");

        let root = bucket.list("").await.unwrap();
        assert_eq!(root, vec![ListEntry { key: ".cairn/".into(), is_dir: true }]);
    }

    #[tokio::test]
    async fn clones_share_objects() {
        let a = MemoryBucket::new();
        let b = a.clone();
        a.write_all("k", b"v").await.unwrap();
        assert_eq!(b.read_all("k").await.unwrap(), b"v");
        b.delete("k").await.unwrap();
        assert!(a.delete("k").await.unwrap_err().is_not_found());
    }
}
