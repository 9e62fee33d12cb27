//! A bucket view that scopes every key under a fixed sub-directory of
//! another bucket. Used when a cloud bucket URL carries a path, e.g.
//! `s3://team-state/cairn` stores everything under `cairn/`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bucket::{dir_prefix, Bucket, ListEntry};
use crate::error::BucketError;

/// Prefix-scoped view over another bucket.
#[derive(Debug, Clone)]
pub struct PrefixedBucket {
    inner: Arc<dyn Bucket>,
    prefix: String,
}

impl PrefixedBucket {
    /// Scope `inner` under `prefix`.
    pub fn new(inner: Arc<dyn Bucket>, prefix: &str) -> Self {
        Self {
            inner,
            prefix: dir_prefix(prefix),
        }
    }

    /// The prefix, with trailing separator.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn strip(&self, err: BucketError) -> BucketError {
        match err {
            BucketError::NotFound { key } => BucketError::NotFound {
                key: key
                    .strip_prefix(&self.prefix)
                    .map(str::to_string)
                    .unwrap_or(key),
            },
            other => other,
        }
    }
}

#[async_trait]
impl Bucket for PrefixedBucket {
    fn driver(&self) -> &'static str {
        self.inner.driver()
    }

    async fn read_all(&self, key: &str) -> Result<Vec<u8>, BucketError> {
        self.inner
            .read_all(&self.full(key))
            .await
            .map_err(|e| self.strip(e))
    }

    async fn write_all(&self, key: &str, data: &[u8]) -> Result<(), BucketError> {
        self.inner.write_all(&self.full(key), data).await
    }

    async fn exists(&self, key: &str) -> Result<bool, BucketError> {
        self.inner.exists(&self.full(key)).await
    }

    async fn delete(&self, key: &str) -> Result<(), BucketError> {
        self.inner
            .delete(&self.full(key))
            .await
            .map_err(|e| self.strip(e))
    }

    async fn list(&self, dir: &str) -> Result<Vec<ListEntry>, BucketError> {
        let entries = self.inner.list(&self.full(&dir_prefix(dir))).await?;
        Ok(entries
            .into_iter()
            .map(|e| ListEntry {
                key: e
                    .key
                    .strip_prefix(&self.prefix)
                    .map(str::to_string)
                    .unwrap_or(e.key),
                is_dir: e.is_dir,
            })
            .collect())
    }

    async fn signed_url(&self, key: &str) -> Result<String, BucketError> {
        self.inner.signed_url(&self.full(key)).await
    }
}
