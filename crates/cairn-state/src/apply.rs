//! # Apply Pipeline
//!
//! Runs the external deployment engine against a stack and records the
//! outcome. The engine itself is out of scope and reached through the
//! [`Engine`] trait.
//!
//! ## Event Flow
//!
//! ```text
//! engine ──events──▶ forwarder ──▶ display task ──▶ EventSink
//!                        └──────▶ caller feed (optional)
//! ```
//!
//! Both channels hold one event, so a slow consumer applies back-pressure
//! to the engine. The engine owns the only sender of its channel, inside
//! [`EngineContext`]; dropping the context when the engine returns closes
//! the channel, which ends the forwarder, which ends the display task.
//! A cancellation signal also ends the forwarder, after which the engine's
//! sends fail. Both tasks are awaited before `apply` returns.
//!
//! ## Outcome
//!
//! On a non-dry run the update record is appended to history and the new
//! checkpoint is backed up. An engine failure outranks history and backup
//! failures, which are then only logged. Neither secondary step is skipped
//! because the engine failed: the record carries `result: failed`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cairn_core::{
    ConfigMap, Deployment, ResourceChanges, SecretsProviderState, UpdateInfo, UpdateKind,
    UpdateResult,
};
use cairn_storage::FILE_PREFIX;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::backend::LocalBackend;
use crate::checkpoint::CheckpointStore;
use crate::error::{BackendError, EngineError};
use crate::reference::StackReference;

// ─── Events ─────────────────────────────────────────────────────────

/// Severity of an engine diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Info,
    /// Warning.
    Warning,
    /// Error.
    Error,
}

/// An event emitted by the engine while it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// A resource step started or finished.
    ResourceStep {
        /// Resource URN.
        urn: String,
        /// Step operation (`create`, `update`, `delete`, ...).
        op: String,
    },
    /// A diagnostic message.
    Diagnostic {
        /// Severity.
        severity: Severity,
        /// Message text.
        message: String,
    },
    /// Final tally.
    Summary {
        /// Changes by operation.
        changes: ResourceChanges,
    },
}

/// Consumer of the event stream shown to the user.
#[async_trait]
pub trait EventSink: Send {
    /// Handle one event.
    async fn handle(&mut self, event: EngineEvent);

    /// Called once after the last event.
    async fn finish(&mut self) {}
}

/// Writes events to the `tracing` subscriber.
#[derive(Debug, Clone)]
pub struct TracingDisplay {
    stack: String,
}

impl TracingDisplay {
    /// A display for events of `stack`.
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
        }
    }
}

#[async_trait]
impl EventSink for TracingDisplay {
    async fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ResourceStep { urn, op } => {
                tracing::info!(stack = %self.stack, %urn, %op, "resource step");
            }
            EngineEvent::Diagnostic { severity, message } => match severity {
                Severity::Info => tracing::info!(stack = %self.stack, "{message}"),
                Severity::Warning => tracing::warn!(stack = %self.stack, "{message}"),
                Severity::Error => tracing::error!(stack = %self.stack, "{message}"),
            },
            EngineEvent::Summary { changes } => {
                tracing::info!(stack = %self.stack, ?changes, "resource changes");
            }
        }
    }
}

// ─── Engine seam ────────────────────────────────────────────────────

/// Persists intermediate snapshots while the engine runs.
#[async_trait]
pub trait SnapshotPersister: Send + Sync {
    /// Save `snapshot` as the stack's latest deployment.
    async fn save(&self, snapshot: &Deployment) -> Result<(), BackendError>;
}

/// Persister writing through [`CheckpointStore::save_stack`].
#[derive(Debug, Clone)]
pub struct StackPersister {
    store: CheckpointStore,
    stack: StackReference,
    secrets: Option<SecretsProviderState>,
}

impl StackPersister {
    /// A persister for `stack`, recording `secrets` in every snapshot.
    pub fn new(
        store: CheckpointStore,
        stack: StackReference,
        secrets: Option<SecretsProviderState>,
    ) -> Self {
        Self {
            store,
            stack,
            secrets,
        }
    }
}

#[async_trait]
impl SnapshotPersister for StackPersister {
    async fn save(&self, snapshot: &Deployment) -> Result<(), BackendError> {
        self.store
            .save_stack(&self.stack, Some(snapshot), self.secrets.as_ref())
            .await
            .map(|_| ())
    }
}

/// Everything the engine gets for one run. Dropping it closes the event
/// channel.
pub struct EngineContext {
    /// Operation kind.
    pub kind: UpdateKind,
    /// Whether changes must not be applied.
    pub dry_run: bool,
    /// Rendered stack reference.
    pub stack: String,
    /// Deployment the run starts from.
    pub base: Option<Deployment>,
    /// Stack configuration.
    pub config: ConfigMap,
    /// Event feed.
    pub events: mpsc::Sender<EngineEvent>,
    /// Becomes `true` when the caller cancels.
    pub cancel: watch::Receiver<bool>,
    /// Snapshot persister; `None` on dry runs.
    pub persister: Option<Arc<dyn SnapshotPersister>>,
}

impl EngineContext {
    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// The deployment engine.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Run one operation, returning the changes it applied.
    async fn run(&self, ctx: EngineContext) -> Result<ResourceChanges, EngineError>;
}

// ─── Options ────────────────────────────────────────────────────────

/// What to run.
pub struct UpdateOperation {
    /// The engine.
    pub engine: Arc<dyn Engine>,
    /// Update message recorded in history.
    pub message: String,
    /// Environment metadata recorded in history.
    pub environment: BTreeMap<String, String>,
    /// Stack configuration.
    pub config: ConfigMap,
    /// Secrets provider recorded in saved snapshots.
    pub secrets: Option<SecretsProviderState>,
}

impl UpdateOperation {
    /// An operation with empty message, environment, and configuration.
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            message: String::new(),
            environment: BTreeMap::new(),
            config: ConfigMap::new(),
            secrets: None,
        }
    }
}

/// How to run it.
#[derive(Default)]
pub struct ApplyOptions {
    /// Skip history and backups; pass no persister.
    pub dry_run: bool,
    /// Produce a link to the checkpoint.
    pub show_link: bool,
    /// Caller's copy of the event stream.
    pub events: Option<mpsc::Sender<EngineEvent>>,
    /// Display; defaults to [`TracingDisplay`].
    pub display: Option<Box<dyn EventSink>>,
    /// Cancellation signal.
    pub cancel: Option<watch::Receiver<bool>>,
}

/// Outcome of a successful apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyResult {
    /// Changes reported by the engine.
    pub changes: ResourceChanges,
    /// Link to the checkpoint, when requested and available.
    pub permalink: Option<String>,
}

// ─── Pipeline ───────────────────────────────────────────────────────

async fn run_display(mut sink: Box<dyn EventSink>, mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        sink.handle(event).await;
    }
    sink.finish().await;
}

async fn forward_events(
    mut engine: mpsc::Receiver<EngineEvent>,
    display: mpsc::Sender<EngineEvent>,
    mut caller: Option<mpsc::Sender<EngineEvent>>,
    mut cancel: watch::Receiver<bool>,
) {
    if *cancel.borrow_and_update() {
        return;
    }
    // A dropped sender means nobody can cancel any more.
    let mut watching = true;
    loop {
        let event = tokio::select! {
            event = engine.recv() => match event {
                Some(event) => event,
                None => break,
            },
            changed = cancel.changed(), if watching => {
                match changed {
                    Ok(()) if *cancel.borrow_and_update() => {
                        tracing::debug!("event fan-out cancelled");
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => watching = false,
                }
                continue;
            }
        };
        if let Some(feed) = &caller {
            if feed.send(event.clone()).await.is_err() {
                caller = None;
            }
        }
        // The display only stops early if it panicked; keep draining.
        let _ = display.send(event).await;
    }
}

fn unix_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

impl LocalBackend {
    /// Run `op` against `stack`. Takes no lock; see [`LocalBackend::update`]
    /// and friends for the locked entry points.
    pub async fn apply(
        &self,
        kind: UpdateKind,
        stack: &StackReference,
        op: UpdateOperation,
        opts: ApplyOptions,
    ) -> Result<ApplyResult, BackendError> {
        self.check_project(stack)?;
        let dry_run = opts.dry_run;
        tracing::info!(stack = %stack, "{} ({stack})", kind.action_label(dry_run));

        let base = self.checkpoints.snapshot(stack).await?;

        let (display_tx, display_rx) = mpsc::channel(1);
        let (engine_tx, engine_rx) = mpsc::channel(1);
        let sink = opts
            .display
            .unwrap_or_else(|| Box::new(TracingDisplay::new(stack.to_string())) as Box<dyn EventSink>);
        let cancel = opts.cancel.unwrap_or_else(|| watch::channel(false).1);
        let display = tokio::spawn(run_display(sink, display_rx));
        let forwarder = tokio::spawn(forward_events(
            engine_rx,
            display_tx,
            opts.events,
            cancel.clone(),
        ));

        let persister: Option<Arc<dyn SnapshotPersister>> = if dry_run {
            None
        } else {
            Some(Arc::new(StackPersister::new(
                self.checkpoints.clone(),
                stack.clone(),
                op.secrets.clone(),
            )))
        };

        let start_time = unix_seconds();
        let ctx = EngineContext {
            kind,
            dry_run,
            stack: stack.to_string(),
            base,
            config: op.config.clone(),
            events: engine_tx,
            cancel,
            persister,
        };
        let engine_result = op.engine.run(ctx).await;
        let end_time = unix_seconds();

        let mut secondary: Vec<BackendError> = Vec::new();
        if let Err(e) = forwarder.await {
            secondary.push(BackendError::Task(format!("event forwarder: {e}")));
        }
        if let Err(e) = display.await {
            secondary.push(BackendError::Task(format!("event display: {e}")));
        }

        let (result, changes) = match &engine_result {
            Ok(changes) => (UpdateResult::Succeeded, changes.clone()),
            Err(e) => (UpdateResult::Failed, e.changes.clone()),
        };

        if !dry_run {
            let info = UpdateInfo {
                kind,
                start_time,
                end_time,
                message: op.message,
                environment: op.environment,
                config: op.config,
                result,
                resource_changes: changes.clone(),
            };
            if let Err(e) = self.checkpoints.add_history(stack, &info).await {
                secondary.push(e.context("saving update info"));
            }
            if let Err(e) = self.checkpoints.backup_stack(stack).await {
                secondary.push(e.context("saving backup"));
            }
        }

        if let Err(e) = engine_result {
            for other in &secondary {
                tracing::warn!(stack = %stack, error = %other, "secondary failure after engine error");
            }
            return Err(e.into());
        }
        let mut secondary = secondary.into_iter();
        if let Some(first) = secondary.next() {
            for other in secondary {
                tracing::warn!(stack = %stack, error = %other, "additional failure");
            }
            return Err(first);
        }

        let permalink = if opts.show_link {
            self.permalink(stack).await
        } else {
            None
        };
        Ok(ApplyResult { changes, permalink })
    }

    async fn permalink(&self, stack: &StackReference) -> Option<String> {
        let path = match self.checkpoints.stack_path(stack).await {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(stack = %stack, error = %e, "could not resolve checkpoint path");
                return None;
            }
        };
        if self.url().starts_with(FILE_PREFIX) {
            return Some(format!("{}/{path}", self.url().trim_end_matches('/')));
        }
        match self.bucket().signed_url(&path).await {
            Ok(link) => Some(link),
            Err(e) => {
                tracing::warn!(stack = %stack, error = %e, "could not get signed url for stack location");
                None
            }
        }
    }

    async fn apply_locked(
        &self,
        kind: UpdateKind,
        stack: &StackReference,
        op: UpdateOperation,
        mut opts: ApplyOptions,
    ) -> Result<ApplyResult, BackendError> {
        opts.dry_run = false;
        let guard = self.locks.lock(stack).await?;
        let result = self.apply(kind, stack, op, opts).await;
        guard.release().await;
        result
    }

    /// Compute changes without applying them. Takes no lock and writes
    /// nothing.
    pub async fn preview(
        &self,
        stack: &StackReference,
        op: UpdateOperation,
        mut opts: ApplyOptions,
    ) -> Result<ApplyResult, BackendError> {
        opts.dry_run = true;
        opts.show_link = true;
        self.apply(UpdateKind::Preview, stack, op, opts).await
    }

    /// Bring the stack to its desired state.
    pub async fn update(
        &self,
        stack: &StackReference,
        op: UpdateOperation,
        opts: ApplyOptions,
    ) -> Result<ApplyResult, BackendError> {
        self.apply_locked(UpdateKind::Update, stack, op, opts).await
    }

    /// Reconcile the checkpoint with the live resources.
    pub async fn refresh(
        &self,
        stack: &StackReference,
        op: UpdateOperation,
        opts: ApplyOptions,
    ) -> Result<ApplyResult, BackendError> {
        self.apply_locked(UpdateKind::Refresh, stack, op, opts).await
    }

    /// Delete every resource of the stack.
    pub async fn destroy(
        &self,
        stack: &StackReference,
        op: UpdateOperation,
        opts: ApplyOptions,
    ) -> Result<ApplyResult, BackendError> {
        self.apply_locked(UpdateKind::Destroy, stack, op, opts).await
    }

    /// Adopt existing resources into the stack.
    pub async fn import(
        &self,
        stack: &StackReference,
        op: UpdateOperation,
        opts: ApplyOptions,
    ) -> Result<ApplyResult, BackendError> {
        self.apply_locked(UpdateKind::Import, stack, op, opts).await
    }
}
