//! # Update Records
//!
//! Every completed, non-dry-run operation appends one [`UpdateInfo`] to the
//! stack's history. Records are immutable once written.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ConfigMap;

/// The kind of operation that produced an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    /// Create or modify resources to match the program.
    Update,
    /// Dry-run of an update.
    Preview,
    /// Reconcile state with the live resources.
    Refresh,
    /// Delete every resource.
    Destroy,
    /// Adopt existing resources into the stack.
    Import,
    /// Rename of the stack itself.
    Rename,
}

impl UpdateKind {
    /// Present-progressive label used in log lines ("Updating", ...).
    pub fn action_label(self, dry_run: bool) -> &'static str {
        if dry_run {
            return "Previewing";
        }
        match self {
            Self::Update => "Updating",
            Self::Preview => "Previewing",
            Self::Refresh => "Refreshing",
            Self::Destroy => "Destroying",
            Self::Import => "Importing",
            Self::Rename => "Renaming",
        }
    }
}

impl std::fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Update => "update",
            Self::Preview => "preview",
            Self::Refresh => "refresh",
            Self::Destroy => "destroy",
            Self::Import => "import",
            Self::Rename => "rename",
        };
        f.write_str(s)
    }
}

/// Outcome of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateResult {
    /// The engine reported success.
    Succeeded,
    /// The engine reported failure.
    Failed,
}

/// Per-operation resource change counts, keyed by operation name
/// (`create`, `update`, `delete`, `same`, ...).
pub type ResourceChanges = BTreeMap<String, u64>;

/// One history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateInfo {
    /// Operation kind.
    pub kind: UpdateKind,
    /// Start time, Unix seconds.
    #[serde(rename = "startTime")]
    pub start_time: i64,
    /// End time, Unix seconds.
    #[serde(rename = "endTime")]
    pub end_time: i64,
    /// Update message supplied by the caller.
    #[serde(default)]
    pub message: String,
    /// Free-form environment metadata (git commit, CI job, ...).
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Configuration in effect for the update.
    #[serde(default)]
    pub config: ConfigMap,
    /// Outcome.
    pub result: UpdateResult,
    /// Resource change summary.
    #[serde(default, rename = "resourceChanges")]
    pub resource_changes: ResourceChanges,
}
