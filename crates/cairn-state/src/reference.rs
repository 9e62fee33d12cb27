//! # Stack References and Storage Layouts
//!
//! A [`StackReference`] is the logical identity of a stack: an optional
//! project plus a name. The [`ReferenceStore`] that produced it decides how
//! that identity maps onto bucket keys:
//!
//! | layout  | checkpoint base                  | history / backups                  |
//! |---------|----------------------------------|------------------------------------|
//! | Legacy  | `.cairn/stacks/<name>`           | `.cairn/history/<name>`            |
//! | Project | `.cairn/stacks/<project>/<name>` | `.cairn/history/<project>/<name>`  |
//!
//! Locks live under `.cairn/locks/<fully qualified name>` in both layouts.
//!
//! ## Rendering
//!
//! Legacy references render as the bare name. Project references render as
//! the bare name when their project is the current project, and as
//! `organization/<project>/<name>` otherwise. The current project is read
//! at render time from a cell shared with the backend, so a reference made
//! before the current project changes renders against the new value.

use std::collections::BTreeSet;
use std::sync::Arc;

use cairn_core::Name;
use cairn_storage::{join_key, Bucket, ListEntry};
use parking_lot::RwLock;

use crate::error::BackendError;

/// Root of all backend-owned keys.
pub const STATE_DIR: &str = ".cairn";
/// Checkpoint directory.
pub const STACKS_DIR: &str = ".cairn/stacks";
/// History directory.
pub const HISTORY_DIR: &str = ".cairn/history";
/// Backup directory.
pub const BACKUP_DIR: &str = ".cairn/backups";
/// Lock directory.
pub const LOCKS_DIR: &str = ".cairn/locks";

/// The only organization name self-managed backends accept.
pub const ORGANIZATION: &str = "organization";

/// Plain checkpoint extension.
pub const JSON_EXT: &str = ".json";
/// Compressed checkpoint extension.
pub const GZIP_EXT: &str = ".json.gz";

/// The backend's current-project cell.
pub type CurrentProject = Arc<RwLock<Option<Name>>>;

/// Layout variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceStore {
    /// Flat namespace, layout version 0.
    Legacy,
    /// Project-scoped namespace, layout version 1.
    Project,
}

/// A stack's logical identity.
#[derive(Clone)]
pub struct StackReference {
    project: Option<Name>,
    name: Name,
    store: ReferenceStore,
    current_project: CurrentProject,
}

impl std::fmt::Debug for StackReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackReference")
            .field("project", &self.project)
            .field("name", &self.name)
            .field("store", &self.store)
            .finish()
    }
}

impl PartialEq for StackReference {
    fn eq(&self, other: &Self) -> bool {
        self.project == other.project && self.name == other.name && self.store == other.store
    }
}

impl Eq for StackReference {}

impl std::fmt::Display for StackReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(project) = &self.project else {
            return f.write_str(self.name.as_str());
        };
        if self.current_project.read().as_ref() == Some(project) {
            return f.write_str(self.name.as_str());
        }
        write!(f, "{ORGANIZATION}/{project}/{}", self.name)
    }
}

impl StackReference {
    /// Stack name.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Project, `None` under the legacy layout.
    pub fn project(&self) -> Option<&Name> {
        self.project.as_ref()
    }

    /// The layout that produced this reference.
    pub fn store(&self) -> ReferenceStore {
        self.store
    }

    /// Name independent of the current project: `organization/<p>/<n>`,
    /// or the bare name for legacy references.
    pub fn fully_qualified_name(&self) -> String {
        match &self.project {
            Some(project) => format!("{ORGANIZATION}/{project}/{}", self.name),
            None => self.name.to_string(),
        }
    }

    /// Check this reference against its layout.
    pub fn validate(&self) -> Result<(), BackendError> {
        self.store.validate_reference(self)
    }

    /// Checkpoint key without extension.
    pub fn stack_base_path(&self) -> String {
        self.store.stack_base_path(self)
    }

    /// History directory.
    pub fn history_dir(&self) -> String {
        self.store.history_dir(self)
    }

    /// Backup directory.
    pub fn backup_dir(&self) -> String {
        self.store.backup_dir(self)
    }

    /// Lock directory.
    pub fn lock_dir(&self) -> String {
        join_key([LOCKS_DIR, self.fully_qualified_name().as_str()])
    }
}

fn invalid(reference: &str, reason: impl Into<String>) -> BackendError {
    BackendError::InvalidReference {
        reference: reference.to_string(),
        reason: reason.into(),
    }
}

/// Strip a checkpoint extension from an object name.
pub fn checkpoint_stem(object_name: &str) -> Option<&str> {
    object_name
        .strip_suffix(GZIP_EXT)
        .or_else(|| object_name.strip_suffix(JSON_EXT))
}

fn stack_names(entries: &[ListEntry]) -> BTreeSet<Name> {
    entries
        .iter()
        .filter(|e| !e.is_dir)
        .filter_map(|e| checkpoint_stem(e.object_name()))
        .filter_map(|stem| Name::parse(stem).ok())
        .collect()
}

impl ReferenceStore {
    /// The layout for a manifest version.
    pub fn for_version(version: u32) -> Result<Self, BackendError> {
        match version {
            0 => Ok(Self::Legacy),
            1 => Ok(Self::Project),
            other => Err(BackendError::UnsupportedLayoutVersion(other)),
        }
    }

    /// The manifest version of this layout.
    pub fn version(self) -> u32 {
        match self {
            Self::Legacy => 0,
            Self::Project => 1,
        }
    }

    /// Build a reference without validation beyond the name types.
    pub fn new_reference(
        self,
        project: Option<Name>,
        name: Name,
        current_project: &CurrentProject,
    ) -> StackReference {
        StackReference {
            project,
            name,
            store: self,
            current_project: current_project.clone(),
        }
    }

    /// Parse user-supplied stack text.
    ///
    /// Legacy: a bare name. Project: `name`, `project/name`, or
    /// `organization/project/name`; a bare name takes the current project.
    pub fn parse_reference(
        self,
        text: &str,
        current_project: &CurrentProject,
    ) -> Result<StackReference, BackendError> {
        match self {
            Self::Legacy => {
                let name = Name::parse(text)?;
                Ok(self.new_reference(None, name, current_project))
            }
            Self::Project => {
                let parts: Vec<&str> = text.split('/').collect();
                let (project, name) = match parts.as_slice() {
                    [name] => {
                        let current = current_project.read().clone();
                        let Some(project) = current else {
                            return Err(invalid(
                                text,
                                "no current project found, pass the fully qualified name \
                                 (organization/project/stack)",
                            ));
                        };
                        (project, *name)
                    }
                    [project, name] => (Name::parse_project(project)?, *name),
                    [org, project, name] => {
                        if *org != ORGANIZATION {
                            return Err(invalid(
                                text,
                                format!(
                                    "stacks in a self-managed backend must use the \
                                     organization name '{ORGANIZATION}'"
                                ),
                            ));
                        }
                        (Name::parse_project(project)?, *name)
                    }
                    _ => {
                        return Err(invalid(
                            text,
                            "expected [organization/][project/]stack",
                        ))
                    }
                };
                let name = Name::parse(name)?;
                Ok(self.new_reference(Some(project), name, current_project))
            }
        }
    }

    /// Check a reference against this layout.
    pub fn validate_reference(self, reference: &StackReference) -> Result<(), BackendError> {
        match (self, reference.project()) {
            (Self::Legacy, Some(project)) => Err(invalid(
                &reference.fully_qualified_name(),
                format!(
                    "project scoped stacks are not supported by this backend \
                     (found project '{project}'); run `cairn state upgrade`"
                ),
            )),
            (Self::Project, None) => Err(invalid(
                &reference.fully_qualified_name(),
                "a project is required",
            )),
            _ => Ok(()),
        }
    }

    fn scoped(self, root: &str, reference: &StackReference) -> String {
        match (self, reference.project()) {
            (Self::Project, Some(project)) => {
                join_key([root, project.as_str(), reference.name().as_str()])
            }
            _ => join_key([root, reference.name().as_str()]),
        }
    }

    /// Checkpoint key without extension.
    pub fn stack_base_path(self, reference: &StackReference) -> String {
        self.scoped(STACKS_DIR, reference)
    }

    /// History directory.
    pub fn history_dir(self, reference: &StackReference) -> String {
        self.scoped(HISTORY_DIR, reference)
    }

    /// Backup directory.
    pub fn backup_dir(self, reference: &StackReference) -> String {
        self.scoped(BACKUP_DIR, reference)
    }

    /// Every stack stored under this layout, sorted and de-duplicated
    /// (a stack may have both plain and compressed checkpoints).
    pub async fn list_references(
        self,
        bucket: &dyn Bucket,
        current_project: &CurrentProject,
    ) -> Result<Vec<StackReference>, BackendError> {
        let top = bucket.list(STACKS_DIR).await?;
        match self {
            Self::Legacy => Ok(stack_names(&top)
                .into_iter()
                .map(|name| self.new_reference(None, name, current_project))
                .collect()),
            Self::Project => {
                let mut refs = Vec::new();
                for dir in top.iter().filter(|e| e.is_dir) {
                    let Ok(project) = Name::parse_project(dir.object_name()) else {
                        continue;
                    };
                    let entries = bucket.list(&dir.key).await?;
                    refs.extend(stack_names(&entries).into_iter().map(|name| {
                        self.new_reference(Some(project.clone()), name, current_project)
                    }));
                }
                Ok(refs)
            }
        }
    }
}
