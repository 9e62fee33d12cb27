//! # Bucket URL Resolution
//!
//! Maps a backend URL to a [`Bucket`] by scheme:
//!
//! | scheme      | driver                                     |
//! |-------------|--------------------------------------------|
//! | `file://`   | [`FileBucket`], built in                   |
//! | `mem://`    | [`MemoryBucket`], built in, process-shared |
//! | `s3://`, `gs://`, `azblob://` | injected [`BucketOpener`]s |
//!
//! `file://` paths are canonicalized before use: `~` expands to the home
//! directory, relative paths become absolute, and separators are forced
//! to `/` so the persisted URL is the same on every host OS. Cloud URLs
//! with a path component are scoped to that sub-directory.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use crate::bucket::Bucket;
use crate::error::BucketError;
use crate::file::FileBucket;
use crate::memory::MemoryBucket;
use crate::prefixed::PrefixedBucket;

/// `file://` URL prefix.
pub const FILE_PREFIX: &str = "file://";

/// Opens buckets for one URL scheme.
pub trait BucketOpener: Send + Sync {
    /// Open the bucket named by `url`. Path components beyond the bucket
    /// name are handled by the mux, not the opener.
    fn open(&self, url: &Url) -> Result<Arc<dyn Bucket>, BucketError>;
}

/// A bucket together with the canonical URL it was opened from.
#[derive(Debug, Clone)]
pub struct OpenedBucket {
    /// Canonicalized URL (what should be persisted).
    pub url: String,
    /// The bucket.
    pub bucket: Arc<dyn Bucket>,
}

#[derive(Default)]
struct MemOpener {
    buckets: Mutex<HashMap<String, MemoryBucket>>,
}

impl BucketOpener for MemOpener {
    fn open(&self, url: &Url) -> Result<Arc<dyn Bucket>, BucketError> {
        let name = url.host_str().unwrap_or_default().to_string();
        let bucket = self.buckets.lock().entry(name).or_default().clone();
        Ok(Arc::new(bucket))
    }
}

/// Scheme-to-driver registry.
pub struct BucketMux {
    openers: BTreeMap<String, Arc<dyn BucketOpener>>,
}

impl Default for BucketMux {
    fn default() -> Self {
        let mut openers: BTreeMap<String, Arc<dyn BucketOpener>> = BTreeMap::new();
        openers.insert("mem".to_string(), Arc::new(MemOpener::default()));
        Self { openers }
    }
}

impl std::fmt::Debug for BucketMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketMux")
            .field("schemes", &self.schemes())
            .finish()
    }
}

impl BucketMux {
    /// A mux with the built-in `file` and `mem` drivers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the opener for `scheme`.
    pub fn register(&mut self, scheme: &str, opener: Arc<dyn BucketOpener>) {
        self.openers.insert(scheme.to_string(), opener);
    }

    /// Supported schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.openers.keys().cloned().collect();
        schemes.push("file".to_string());
        schemes.sort();
        schemes
    }

    /// Whether `url` names a scheme this mux can open.
    pub fn is_bucket_url(&self, url: &str) -> bool {
        match url.split_once("://") {
            Some(("file", _)) => true,
            Some((scheme, _)) => self.openers.contains_key(scheme),
            None => false,
        }
    }

    /// Open the bucket for `original_url`.
    pub fn open(&self, original_url: &str) -> Result<OpenedBucket, BucketError> {
        if !self.is_bucket_url(original_url) {
            return Err(BucketError::UnknownScheme {
                url: original_url.to_string(),
                supported: self
                    .schemes()
                    .iter()
                    .map(|s| format!("{s}://"))
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        if original_url.starts_with(FILE_PREFIX) {
            let url = canonicalize_file_url(original_url)?;
            let root = file_url_to_path(&url);
            tracing::debug!(url = %url, "opening filesystem bucket");
            return Ok(OpenedBucket {
                url,
                bucket: Arc::new(FileBucket::new(root)),
            });
        }

        let parsed = Url::parse(original_url).map_err(|e| BucketError::InvalidUrl {
            url: original_url.to_string(),
            reason: e.to_string(),
        })?;
        let opener = self
            .openers
            .get(parsed.scheme())
            .ok_or_else(|| BucketError::UnknownScheme {
                url: original_url.to_string(),
                supported: self.schemes().join(", "),
            })?;
        let mut bucket = opener.open(&parsed)?;

        let sub_dir = parsed.path().trim_start_matches('/');
        if !sub_dir.is_empty() {
            bucket = Arc::new(PrefixedBucket::new(bucket, sub_dir));
        }
        tracing::debug!(url = %original_url, "opened bucket");
        Ok(OpenedBucket {
            url: original_url.to_string(),
            bucket,
        })
    }
}

/// Canonicalize a `file://` URL: expand `~`, make the path absolute, and
/// use forward slashes. Non-file URLs are returned unchanged.
pub fn canonicalize_file_url(url: &str) -> Result<String, BucketError> {
    let Some(raw) = url.strip_prefix(FILE_PREFIX) else {
        return Ok(url.to_string());
    };

    let mut path = if raw == "~" || raw.starts_with("~/") || raw.starts_with("~\\") {
        let home = dirs_next::home_dir().ok_or_else(|| BucketError::InvalidUrl {
            url: url.to_string(),
            reason: "could not determine the current user's home directory to resolve `~`"
                .to_string(),
        })?;
        if raw == "~" {
            home
        } else {
            home.join(&raw[2..])
        }
    } else {
        PathBuf::from(raw)
    };

    if !path.is_absolute() {
        let cwd = std::env::current_dir().map_err(|e| BucketError::InvalidUrl {
            url: url.to_string(),
            reason: format!("could not resolve relative path: {e}"),
        })?;
        path = cwd.join(path);
    }

    let mut slashed = path.to_string_lossy().replace('\\', "/");
    if !slashed.starts_with('/') {
        slashed.insert(0, '/');
    }
    Ok(format!("{FILE_PREFIX}{slashed}"))
}

fn file_url_to_path(url: &str) -> PathBuf {
    let path = url.strip_prefix(FILE_PREFIX).unwrap_or(url);
    // "/C:/state" on Windows is the drive path "C:/state".
    let bytes = path.as_bytes();
    if cfg!(windows) && bytes.len() > 2 && bytes[0] == b'/' && bytes[2] == b':' {
        PathBuf::from(&path[1..])
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_expands_to_home() {
        let Some(home) = dirs_next::home_dir() else {
            return;
        };
        let url = canonicalize_file_url("file://~/state").unwrap();
        let expected = home.join("state").to_string_lossy().replace('\\', "/");
        assert!(url.ends_with(&expected), "{url} should end with {expected}");
    }

    #[test]
    fn relative_paths_become_absolute() {
        let url = canonicalize_file_url("file://state-dir").unwrap();
        let path = url.strip_prefix(FILE_PREFIX).unwrap();
        assert!(path.starts_with('/'));
        assert!(path.ends_with("/state-dir"));
        assert!(!path.contains('\\'));
    }

    #[test]
    fn non_file_urls_untouched() {
        assert_eq!(
            canonicalize_file_url("s3://bucket/dir").unwrap(),
            "s3://bucket/dir"
        );
    }

    #[test]
    fn unknown_scheme_lists_supported() {
        let mux = BucketMux::new();
        let err = mux.open("ftp://host/x").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("file://"));
        assert!(msg.contains("mem://"));
    }

    #[test]
    fn mem_urls_share_by_name() {
        let mux = BucketMux::new();
        let a = mux.open("mem://shared").unwrap();
        let b = mux.open("mem://shared").unwrap();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            a.bucket.write_all("k", b"v").await.unwrap();
            assert_eq!(b.bucket.read_all("k").await.unwrap(), b"v");
        });
    }

    #[test]
    fn cloud_url_with_path_is_prefixed() {
        struct Fixed(MemoryBucket);
        impl BucketOpener for Fixed {
            fn open(&self, _url: &Url) -> Result<Arc<dyn Bucket>, BucketError> {
                Ok(Arc::new(self.0.clone()))
            }
        }

        let backing = MemoryBucket::new();
        let mut mux = BucketMux::new();
        mux.register("s3", Arc::new(Fixed(backing.clone())));
        assert!(mux.is_bucket_url("s3://team/state"));

        let opened = mux.open("s3://team/state").unwrap();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            opened.bucket.write_all("k", b"v").await.unwrap();
        });
        assert_eq!(backing.keys(), vec!["state/k".to_string()]);
    }
}
