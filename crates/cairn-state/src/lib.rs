//! # cairn-state — Self-Managed Stack State Backend
//!
//! Persists stack checkpoints in a bucket and serializes mutations with an
//! advisory lock.
//!
//! ## Modules
//!
//! - **References** (`reference.rs`): stack identity and the two storage
//!   layouts, legacy (flat) and project-scoped.
//! - **Manifest** (`meta.rs`): the layout version stored in the bucket.
//! - **Locks** (`lock.rs`): marker-object locking and forced cancel.
//! - **Checkpoints** (`checkpoint.rs`, `history.rs`): versioned checkpoint
//!   documents, timestamped backups, and the update history.
//! - **Backend** (`backend.rs`): stack lifecycle, rename, export/import,
//!   and legacy-to-project migration.
//! - **Apply** (`apply.rs`): the engine seam and event pipeline for
//!   preview, update, refresh, destroy and import.
//!
//! ## Crate Policy
//!
//! - All storage access goes through [`cairn_storage::Bucket`].
//! - Locking is cooperative. It is not consensus.
//! - Best-effort diagnostics never fail an operation.

pub mod apply;
pub mod backend;
pub mod checkpoint;
pub mod error;
pub mod history;
pub mod lock;
pub mod meta;
pub mod options;
pub mod reference;
pub mod stack;

pub use apply::{
    ApplyOptions, ApplyResult, Engine, EngineContext, EngineEvent, EventSink, Severity,
    SnapshotPersister, StackPersister, TracingDisplay, UpdateOperation,
};
pub use backend::LocalBackend;
pub use checkpoint::CheckpointStore;
pub use error::{BackendError, EngineError};
pub use lock::{LockContent, LockGuard, LockManager};
pub use meta::{LayoutManifest, META_PATH};
pub use options::BackendOptions;
pub use reference::{CurrentProject, ReferenceStore, StackReference, ORGANIZATION};
pub use stack::{Stack, StackSummary};
