//! # The Bucket Trait
//!
//! Every storage operation in Cairn goes through [`Bucket`]. Keys are
//! forward-slash separated regardless of host OS, and every key is scoped
//! under the bucket's canonicalized root.
//!
//! ## Listing
//!
//! [`Bucket::list`] is directory-style: it returns the immediate children
//! of a directory key. Directory entries carry a trailing `/` in their key
//! and `is_dir == true`. Listing a directory that does not exist yields an
//! empty list, not `NotFound`.
//!
//! ## Atomicity
//!
//! `write_all` either fully replaces the object or fails leaving the prior
//! object intact. Operations on distinct keys are independent, so a bucket
//! handle is safe to share across concurrent tasks.

use async_trait::async_trait;

use crate::error::BucketError;

/// Key separator.
pub const SEPARATOR: char = '/';

/// One entry returned by [`Bucket::list`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListEntry {
    /// Full key. Directory keys end with `/`.
    pub key: String,
    /// Whether this entry is a directory prefix.
    pub is_dir: bool,
}

impl ListEntry {
    /// The last path segment, without any trailing separator.
    pub fn object_name(&self) -> &str {
        let trimmed = self.key.trim_end_matches(SEPARATOR);
        trimmed.rsplit(SEPARATOR).next().unwrap_or(trimmed)
    }
}

/// Uniform key/value byte storage.
#[async_trait]
pub trait Bucket: Send + Sync + std::fmt::Debug {
    /// Driver name, for diagnostics.
    fn driver(&self) -> &'static str;

    /// Read an object. Returns [`BucketError::NotFound`] if it is absent.
    async fn read_all(&self, key: &str) -> Result<Vec<u8>, BucketError>;

    /// Write an object, replacing any existing one.
    async fn write_all(&self, key: &str, data: &[u8]) -> Result<(), BucketError>;

    /// Whether an object exists.
    async fn exists(&self, key: &str) -> Result<bool, BucketError>;

    /// Delete an object. Returns [`BucketError::NotFound`] if it is absent.
    async fn delete(&self, key: &str) -> Result<(), BucketError>;

    /// List the immediate children of directory `dir`.
    async fn list(&self, dir: &str) -> Result<Vec<ListEntry>, BucketError>;

    /// A URL granting temporary read access to `key`.
    async fn signed_url(&self, key: &str) -> Result<String, BucketError> {
        let _ = key;
        Err(BucketError::Unsupported {
            driver: self.driver(),
            operation: "signed_url",
        })
    }

    /// Copy `src` to `dst`.
    async fn copy(&self, src: &str, dst: &str) -> Result<(), BucketError> {
        let data = self.read_all(src).await?;
        self.write_all(dst, &data).await
    }
}

/// Join key segments with `/`, skipping empty segments and collapsing
/// duplicate separators at the joins.
pub fn join_key<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for seg in segments {
        let seg = seg.as_ref().trim_matches(SEPARATOR);
        if seg.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(SEPARATOR);
        }
        out.push_str(seg);
    }
    out
}

/// Ensure `dir` ends with a separator (empty stays empty: the root).
pub fn dir_prefix(dir: &str) -> String {
    let trimmed = dir.trim_matches(SEPARATOR);
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}{SEPARATOR}")
    }
}

/// Reject keys that are empty, absolute, or contain `.`/`..` segments.
pub fn validate_key(key: &str) -> Result<(), BucketError> {
    let invalid = |reason| BucketError::InvalidKey {
        key: key.to_string(),
        reason,
    };
    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.starts_with(SEPARATOR) || key.contains('\\') {
        return Err(invalid("key must be relative and use forward slashes"));
    }
    if key
        .split(SEPARATOR)
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(invalid("key contains an empty, '.' or '..' segment"));
    }
    Ok(())
}

/// List every object key under `dir`, recursing into sub-directories.
pub async fn list_recursive(bucket: &dyn Bucket, dir: &str) -> Result<Vec<String>, BucketError> {
    let mut out = Vec::new();
    let mut pending = vec![dir_prefix(dir)];
    while let Some(next) = pending.pop() {
        for entry in bucket.list(&next).await? {
            if entry.is_dir {
                pending.push(entry.key);
            } else {
                out.push(entry.key);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Delete every object under `dir`. Objects that vanish concurrently are
/// ignored.
pub async fn remove_all(bucket: &dyn Bucket, dir: &str) -> Result<(), BucketError> {
    for key in list_recursive(bucket, dir).await? {
        match bucket.delete(&key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
