//! # Self-Managed Backend
//!
//! [`LocalBackend`] stores stack state in a bucket opened from a URL
//! (`file://`, `mem://`, or an injected cloud scheme). It owns the bucket,
//! the active [`ReferenceStore`], the current-project cell, a lock manager
//! with a per-instance lock id, and the checkpoint store.
//!
//! ## Operation Shape
//!
//! Mutating operations follow one pattern: resolve the reference, take the
//! stack lock, do the work, release the lock on every exit path. Reads
//! (`get_stack`, `list_stacks`, history) take no lock.
//!
//! ## Layout Migration
//!
//! [`LocalBackend::upgrade`] moves every legacy stack into the project
//! layout, inferring each stack's project from its resource URNs. A stack
//! without resources stops the migration with `MigrationIncomplete`;
//! stacks already moved stay moved, so re-running after fixing the
//! offender finishes the job. The manifest is written only after every
//! stack has moved.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cairn_core::{ConfigMap, Name, ProjectStack, UntypedDeployment, UpdateInfo};
use cairn_secrets::{
    resolve_stack_secrets_manager, DefaultSecretsManager, SecretsError, SecretsManager,
    SecretsProvider,
};
use cairn_storage::Bucket;
use parking_lot::{Mutex, RwLock};

use crate::checkpoint::CheckpointStore;
use crate::error::BackendError;
use crate::lock::LockManager;
use crate::meta::LayoutManifest;
use crate::options::BackendOptions;
use crate::reference::{CurrentProject, ReferenceStore, StackReference, STACKS_DIR};
use crate::stack::{Stack, StackSummary};

/// A bucket-backed stack state backend.
#[derive(Debug)]
pub struct LocalBackend {
    url: String,
    bucket: Arc<dyn Bucket>,
    store: Mutex<ReferenceStore>,
    current_project: CurrentProject,
    pub(crate) locks: LockManager,
    pub(crate) checkpoints: CheckpointStore,
    secrets: SecretsProvider,
}

impl LocalBackend {
    /// Open the backend at `url`.
    ///
    /// Reads the layout manifest to choose the reference store. In project
    /// mode, leftover legacy stack files are reported as warnings.
    pub async fn new(url: &str, opts: BackendOptions) -> Result<Self, BackendError> {
        let opened = opts.mux.open(url)?;
        let manifest = LayoutManifest::read(opened.bucket.as_ref()).await?;
        let store = manifest.store()?;

        let backend = Self {
            locks: LockManager::new(opened.bucket.clone(), opened.url.clone()),
            checkpoints: CheckpointStore::new(opened.bucket.clone(), opts.gzip),
            url: opened.url,
            bucket: opened.bucket,
            store: Mutex::new(store),
            current_project: Arc::new(RwLock::new(opts.current_project)),
            secrets: opts.secrets,
        };
        tracing::debug!(url = %backend.url, layout = store.version(), "opened state backend");

        if store == ReferenceStore::Project {
            backend.warn_legacy_stacks().await;
        }
        Ok(backend)
    }

    async fn warn_legacy_stacks(&self) {
        let Ok(refs) = ReferenceStore::Legacy
            .list_references(self.bucket.as_ref(), &self.current_project)
            .await
        else {
            return;
        };
        for legacy in refs {
            tracing::warn!(
                stack = %legacy,
                "found legacy stack file '{}', you should run `cairn state upgrade`",
                legacy.name()
            );
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────

    /// Canonical URL of the state bucket.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The state bucket.
    pub fn bucket(&self) -> &Arc<dyn Bucket> {
        &self.bucket
    }

    /// The active layout.
    pub fn store(&self) -> ReferenceStore {
        *self.store.lock()
    }

    /// This instance's lock id.
    pub fn lock_id(&self) -> &str {
        self.locks.lock_id()
    }

    /// The current project, if any.
    pub fn current_project(&self) -> Option<Name> {
        self.current_project.read().clone()
    }

    /// Change the current project. Affects how existing references render.
    pub fn set_current_project(&self, project: Option<Name>) {
        *self.current_project.write() = project;
    }

    /// The secrets provider used to rebuild managers.
    pub fn secrets_provider(&self) -> &SecretsProvider {
        &self.secrets
    }

    // ─── References ──────────────────────────────────────────────────

    /// Parse user-supplied stack text under the active layout.
    pub fn parse_stack_reference(&self, text: &str) -> Result<StackReference, BackendError> {
        self.store().parse_reference(text, &self.current_project)
    }

    /// Check that `text` names a valid stack under the active layout.
    pub fn validate_stack_name(&self, text: &str) -> Result<(), BackendError> {
        self.parse_stack_reference(text)?.validate()
    }

    /// Build a reference under the active layout.
    pub fn new_reference(&self, project: Option<Name>, name: Name) -> StackReference {
        self.store()
            .new_reference(project, name, &self.current_project)
    }

    pub(crate) fn check_project(&self, stack: &StackReference) -> Result<(), BackendError> {
        let (Some(project), Some(current)) = (stack.project(), self.current_project()) else {
            return Ok(());
        };
        if *project != current {
            return Err(BackendError::ProjectMismatch {
                project: project.to_string(),
                current: current.to_string(),
            });
        }
        Ok(())
    }

    // ─── Stack lifecycle ─────────────────────────────────────────────

    /// Create an empty stack.
    pub async fn create_stack(&self, stack: &StackReference) -> Result<Stack, BackendError> {
        stack.validate()?;
        self.check_project(stack)?;

        let guard = self.locks.lock(stack).await?;
        let result = self.create_stack_locked(stack).await;
        guard.release().await;
        result
    }

    async fn create_stack_locked(&self, stack: &StackReference) -> Result<Stack, BackendError> {
        if self.checkpoints.exists(stack).await? {
            return Err(BackendError::AlreadyExists {
                stack: stack.to_string(),
            });
        }
        let path = self.checkpoints.save_stack(stack, None, None).await?;
        tracing::info!(stack = %stack, key = %path, "created stack");
        Ok(Stack::new(stack.clone(), None, path))
    }

    /// Look up a stack; `None` if it does not exist.
    pub async fn get_stack(&self, stack: &StackReference) -> Result<Option<Stack>, BackendError> {
        let path = self.checkpoints.stack_path(stack).await?;
        match self.checkpoints.load(stack).await? {
            Some(checkpoint) => Ok(Some(Stack::new(stack.clone(), checkpoint.latest, path))),
            None => Ok(None),
        }
    }

    /// Summaries of every stack, optionally restricted to one project.
    pub async fn list_stacks(
        &self,
        project: Option<&Name>,
    ) -> Result<Vec<StackSummary>, BackendError> {
        let refs = self
            .store()
            .list_references(self.bucket.as_ref(), &self.current_project)
            .await?;
        let mut summaries = Vec::with_capacity(refs.len());
        for stack in refs {
            if project.is_some() && stack.project() != project {
                continue;
            }
            let Some(found) = self.get_stack(&stack).await? else {
                continue;
            };
            summaries.push(found.summary());
        }
        Ok(summaries)
    }

    /// Projects that have stack directories. Always empty under the legacy
    /// layout.
    pub async fn list_projects(&self) -> Result<Vec<Name>, BackendError> {
        if self.store() == ReferenceStore::Legacy {
            return Ok(Vec::new());
        }
        Ok(self
            .bucket
            .list(STACKS_DIR)
            .await?
            .into_iter()
            .filter(|e| e.is_dir)
            .filter_map(|e| Name::parse_project(e.object_name()).ok())
            .collect())
    }

    /// Whether `project` has a stack directory.
    pub async fn does_project_exist(&self, project: &str) -> Result<bool, BackendError> {
        Ok(self
            .list_projects()
            .await?
            .iter()
            .any(|p| p.as_str() == project))
    }

    /// Remove a stack. Refuses while resources remain unless `force` is
    /// set. The checkpoint is moved to backup; history is deleted.
    pub async fn remove_stack(&self, stack: &StackReference, force: bool) -> Result<(), BackendError> {
        let guard = self.locks.lock(stack).await?;
        let result = self.remove_stack_locked(stack, force).await;
        guard.release().await;
        result
    }

    async fn remove_stack_locked(
        &self,
        stack: &StackReference,
        force: bool,
    ) -> Result<(), BackendError> {
        let checkpoint = self.checkpoints.get_checkpoint(stack).await?;
        if !force && checkpoint.resource_count() > 0 {
            return Err(BackendError::HasResources {
                stack: stack.to_string(),
            });
        }
        self.checkpoints.move_to_backup(stack).await?;
        self.checkpoints.remove_history(stack).await?;
        tracing::info!(stack = %stack, force, "removed stack");
        Ok(())
    }

    /// Rename a stack, possibly into another project. Returns the new
    /// reference.
    pub async fn rename_stack(
        &self,
        old: &StackReference,
        new: &StackReference,
    ) -> Result<StackReference, BackendError> {
        new.validate()?;
        let guard = self.locks.lock(old).await?;
        let result = self.rename_stack_locked(old, new).await;
        guard.release().await;
        result.map(|()| new.clone())
    }

    async fn rename_stack_locked(
        &self,
        old: &StackReference,
        new: &StackReference,
    ) -> Result<(), BackendError> {
        let mut checkpoint = self.checkpoints.get_checkpoint(old).await?;
        if self.checkpoints.exists(new).await? {
            return Err(BackendError::AlreadyExists {
                stack: new.to_string(),
            });
        }

        if let Some(latest) = checkpoint.latest.as_mut() {
            let project = match (old.project(), new.project()) {
                (Some(from), Some(to)) if from != to => Some(to.as_str()),
                (None, Some(to)) => Some(to.as_str()),
                _ => None,
            };
            latest.rename_stack(new.name().as_str(), project)?;
        }
        checkpoint.stack = new.fully_qualified_name();

        self.checkpoints.save_checkpoint(new, &checkpoint).await?;
        self.checkpoints.move_to_backup(old).await?;
        self.checkpoints.rename_history(old, new).await?;
        tracing::info!(from = %old, to = %new, "renamed stack");
        Ok(())
    }

    // ─── Deployments and history ─────────────────────────────────────

    /// Export the stack's latest deployment.
    pub async fn export_deployment(
        &self,
        stack: &StackReference,
    ) -> Result<UntypedDeployment, BackendError> {
        let checkpoint = self.checkpoints.get_checkpoint(stack).await?;
        let latest = checkpoint.latest.unwrap_or_else(cairn_core::Deployment::empty);
        Ok(UntypedDeployment::from_deployment(&latest)?)
    }

    /// Replace the stack's latest deployment with `deployment`.
    pub async fn import_deployment(
        &self,
        stack: &StackReference,
        deployment: UntypedDeployment,
    ) -> Result<(), BackendError> {
        let guard = self.locks.lock(stack).await?;
        let result = self.import_deployment_locked(stack, deployment).await;
        guard.release().await;
        result
    }

    async fn import_deployment_locked(
        &self,
        stack: &StackReference,
        deployment: UntypedDeployment,
    ) -> Result<(), BackendError> {
        let checkpoint = deployment.into_checkpoint(&stack.fully_qualified_name(), ConfigMap::new())?;
        let path = self.checkpoints.save_checkpoint(stack, &checkpoint).await?;
        tracing::info!(stack = %stack, key = %path, "imported deployment");
        Ok(())
    }

    /// The stack's update records, newest first. See
    /// [`CheckpointStore::get_history`] for paging.
    pub async fn get_history(
        &self,
        stack: &StackReference,
        page_size: usize,
        page: usize,
    ) -> Result<Vec<UpdateInfo>, BackendError> {
        self.checkpoints.get_history(stack, page_size, page).await
    }

    /// Configuration recorded by the stack's most recent update.
    pub async fn get_latest_configuration(
        &self,
        stack: &StackReference,
    ) -> Result<ConfigMap, BackendError> {
        self.get_history(stack, 1, 1)
            .await?
            .into_iter()
            .next()
            .map(|update| update.config)
            .ok_or(BackendError::NoPreviousDeployment)
    }

    /// Delete every lock marker of the stack, whoever holds it.
    pub async fn cancel_current_update(&self, stack: &StackReference) -> Result<(), BackendError> {
        self.locks.cancel(stack).await
    }

    // ─── Secrets ─────────────────────────────────────────────────────

    /// Resolve the secrets manager for the stack whose settings live at
    /// `settings_path`.
    pub async fn stack_secrets_manager(
        &self,
        settings_path: &Path,
    ) -> Result<SecretsManager, BackendError> {
        Ok(resolve_stack_secrets_manager(settings_path, &self.secrets, self).await?)
    }

    // ─── Migration ───────────────────────────────────────────────────

    /// Move every legacy stack into the project layout and switch this
    /// backend to it.
    pub async fn upgrade(&self) -> Result<(), BackendError> {
        if self.store() == ReferenceStore::Project {
            tracing::info!(url = %self.url, "state store already uses the project layout");
            return Ok(());
        }

        let legacy = ReferenceStore::Legacy
            .list_references(self.bucket.as_ref(), &self.current_project)
            .await?;
        for old in &legacy {
            let guard = self.locks.lock(old).await?;
            let result = self.upgrade_stack_locked(old).await;
            guard.release().await;
            result?;
        }

        LayoutManifest {
            version: ReferenceStore::Project.version(),
        }
        .write(self.bucket.as_ref())
        .await?;
        *self.store.lock() = ReferenceStore::Project;
        tracing::info!(url = %self.url, migrated = legacy.len(), "upgraded state store layout");
        Ok(())
    }

    async fn upgrade_stack_locked(&self, old: &StackReference) -> Result<(), BackendError> {
        let new = self.upgrade_reference(old).await?;
        self.rename_stack_locked(old, &new)
            .await
            .map_err(|e| e.context(format!("upgrade stack {old} to {new}")))
    }

    async fn upgrade_reference(&self, old: &StackReference) -> Result<StackReference, BackendError> {
        let checkpoint = self.checkpoints.get_checkpoint(old).await?;
        let project = checkpoint
            .latest
            .as_ref()
            .and_then(|d| d.infer_project())
            .ok_or_else(|| BackendError::MigrationIncomplete {
                stack: old.to_string(),
            })?;
        let project = Name::parse_project(project)?;
        Ok(ReferenceStore::Project.new_reference(
            Some(project),
            old.name().clone(),
            &self.current_project,
        ))
    }
}

/// Stacks without recorded secrets settings use a passphrase manager.
#[async_trait]
impl DefaultSecretsManager for LocalBackend {
    async fn default_secrets_manager(
        &self,
        settings: &mut ProjectStack,
    ) -> Result<(SecretsManager, bool), SecretsError> {
        self.secrets.default_secrets_manager(settings).await
    }
}
