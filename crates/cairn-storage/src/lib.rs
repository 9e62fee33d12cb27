//! # cairn-storage — Bucket Abstraction
//!
//! A uniform key/value byte-storage interface over heterogeneous object
//! stores. The state backend never touches a filesystem or object store
//! directly; everything goes through [`Bucket`].
//!
//! - [`FileBucket`]: local directory, atomic rename-into-place writes.
//! - [`MemoryBucket`]: in-process map (`mem://`, tests).
//! - [`PrefixedBucket`]: sub-directory view over another bucket.
//! - [`BucketMux`]: URL scheme → driver, with `file://` canonicalization.
//!
//! Missing objects surface as [`BucketError::NotFound`], which callers use
//! as a sentinel rather than a failure where that makes sense.

pub mod bucket;
pub mod error;
pub mod file;
pub mod memory;
pub mod mux;
pub mod prefixed;

pub use bucket::{dir_prefix, join_key, list_recursive, remove_all, Bucket, ListEntry};
pub use error::BucketError;
pub use file::FileBucket;
pub use memory::MemoryBucket;
pub use mux::{canonicalize_file_url, BucketMux, BucketOpener, OpenedBucket, FILE_PREFIX};
pub use prefixed::PrefixedBucket;
