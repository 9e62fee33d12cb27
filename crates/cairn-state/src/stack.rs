//! Stack handles returned by the backend.

use chrono::{DateTime, Utc};
use cairn_core::Deployment;

use crate::reference::StackReference;

/// A stack together with its latest deployment.
#[derive(Debug, Clone)]
pub struct Stack {
    reference: StackReference,
    snapshot: Option<Deployment>,
    path: String,
}

impl Stack {
    pub(crate) fn new(reference: StackReference, snapshot: Option<Deployment>, path: String) -> Self {
        Self {
            reference,
            snapshot,
            path,
        }
    }

    /// The stack's reference.
    pub fn reference(&self) -> &StackReference {
        &self.reference
    }

    /// Latest deployment; `None` if the stack was never deployed.
    pub fn snapshot(&self) -> Option<&Deployment> {
        self.snapshot.as_ref()
    }

    /// Key of the checkpoint backing this stack.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of resources in the latest deployment.
    pub fn resource_count(&self) -> usize {
        self.snapshot.as_ref().map_or(0, |d| d.resources.len())
    }

    /// Summary used by stack listings.
    pub fn summary(&self) -> StackSummary {
        StackSummary {
            name: self.reference.clone(),
            last_update: self.snapshot.as_ref().map(|d| d.manifest.time),
            resource_count: self.snapshot.as_ref().map(|d| d.resources.len()),
        }
    }
}

/// One row of a stack listing.
#[derive(Debug, Clone, PartialEq)]
pub struct StackSummary {
    /// The stack.
    pub name: StackReference,
    /// When the latest deployment was written.
    pub last_update: Option<DateTime<Utc>>,
    /// Resources in the latest deployment.
    pub resource_count: Option<usize>,
}
