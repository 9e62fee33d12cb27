//! The apply pipeline with a scripted engine: event fan-out, history and
//! backup recording, locking, and failure ranking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cairn_core::{Deployment, Manifest, Resource, ResourceChanges, UpdateResult, Urn};
use cairn_state::{
    ApplyOptions, BackendError, BackendOptions, Engine, EngineContext, EngineError, EngineEvent,
    EventSink, LocalBackend, LockManager, UpdateOperation,
};
use cairn_storage::{Bucket, BucketError, BucketOpener, ListEntry, MemoryBucket};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

// ─── Fakes ──────────────────────────────────────────────────────────

struct ScriptedEngine {
    resources: usize,
    fail: bool,
}

fn snapshot(resources: usize) -> Deployment {
    Deployment {
        manifest: Manifest::now(),
        secrets_providers: None,
        resources: (0..resources)
            .map(|i| {
                Resource::new(
                    Urn::new("dev", "infra", "pkg:Queue", &format!("q{i}")),
                    "pkg:Queue",
                )
            })
            .collect(),
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn run(&self, ctx: EngineContext) -> Result<ResourceChanges, EngineError> {
        if ctx.is_cancelled() {
            return Err(EngineError::new("cancelled"));
        }
        let send_failed = |e: mpsc::error::SendError<EngineEvent>| EngineError::new(e.to_string());
        for i in 0..self.resources {
            ctx.events
                .send(EngineEvent::ResourceStep {
                    urn: format!("q{i}"),
                    op: "create".into(),
                })
                .await
                .map_err(send_failed)?;
        }

        let mut changes = ResourceChanges::new();
        changes.insert("create".into(), self.resources as u64);
        if let Some(persister) = &ctx.persister {
            persister
                .save(&snapshot(self.resources))
                .await
                .map_err(|e| EngineError::new(e.to_string()))?;
        }
        ctx.events
            .send(EngineEvent::Summary {
                changes: changes.clone(),
            })
            .await
            .map_err(send_failed)?;

        if self.fail {
            return Err(EngineError {
                message: "provider exploded".into(),
                changes,
            });
        }
        Ok(changes)
    }
}

/// Streams events until the stream closes, never looking at `ctx.cancel`.
struct DeafEngine;

#[async_trait]
impl Engine for DeafEngine {
    async fn run(&self, ctx: EngineContext) -> Result<ResourceChanges, EngineError> {
        loop {
            ctx.events
                .send(EngineEvent::ResourceStep {
                    urn: "q0".into(),
                    op: "refresh".into(),
                })
                .await
                .map_err(|_| EngineError::new("event stream closed"))?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Never finishes on its own.
struct StuckEngine;

#[async_trait]
impl Engine for StuckEngine {
    async fn run(&self, _ctx: EngineContext) -> Result<ResourceChanges, EngineError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ResourceChanges::new())
    }
}

struct PanickingEngine;

#[async_trait]
impl Engine for PanickingEngine {
    async fn run(&self, _ctx: EngineContext) -> Result<ResourceChanges, EngineError> {
        panic!("engine bug");
    }
}

#[derive(Clone, Default)]
struct CollectSink {
    seen: Arc<Mutex<Vec<EngineEvent>>>,
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl EventSink for CollectSink {
    async fn handle(&mut self, event: EngineEvent) {
        self.seen.lock().push(event);
    }

    async fn finish(&mut self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// Memory bucket that refuses writes below one prefix.
#[derive(Debug, Clone)]
struct FaultyBucket {
    inner: MemoryBucket,
    deny: &'static str,
}

#[async_trait]
impl Bucket for FaultyBucket {
    fn driver(&self) -> &'static str {
        "faulty"
    }

    async fn read_all(&self, key: &str) -> Result<Vec<u8>, BucketError> {
        self.inner.read_all(key).await
    }

    async fn write_all(&self, key: &str, data: &[u8]) -> Result<(), BucketError> {
        if key.starts_with(self.deny) {
            return Err(BucketError::Driver {
                driver: "faulty",
                message: format!("write to {key} denied"),
            });
        }
        self.inner.write_all(key, data).await
    }

    async fn exists(&self, key: &str) -> Result<bool, BucketError> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), BucketError> {
        self.inner.delete(key).await
    }

    async fn list(&self, dir: &str) -> Result<Vec<ListEntry>, BucketError> {
        self.inner.list(dir).await
    }
}

struct FaultyOpener(FaultyBucket);

impl BucketOpener for FaultyOpener {
    fn open(&self, _url: &url::Url) -> Result<Arc<dyn Bucket>, BucketError> {
        Ok(Arc::new(self.0.clone()))
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn operation(resources: usize, fail: bool) -> UpdateOperation {
    let mut op = UpdateOperation::new(Arc::new(ScriptedEngine { resources, fail }));
    op.message = "deploy queues".into();
    op
}

async fn backend_with_stack(url: &str, opts: BackendOptions) -> LocalBackend {
    let backend = LocalBackend::new(url, opts).await.unwrap();
    let dev = backend.parse_stack_reference("dev").unwrap();
    backend.create_stack(&dev).await.unwrap();
    backend
}

async fn wait_for_unlocked(backend: &LocalBackend, dir: &str) {
    for _ in 0..200 {
        if backend.bucket().list(dir).await.unwrap().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("lock markers under {dir} were never released");
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn update_fans_out_events_and_records_history() {
    let backend = backend_with_stack("mem://update", BackendOptions::default()).await;
    let dev = backend.parse_stack_reference("dev").unwrap();

    let sink = CollectSink::default();
    let (feed_tx, mut feed_rx) = mpsc::channel(16);
    let opts = ApplyOptions {
        events: Some(feed_tx),
        display: Some(Box::new(sink.clone())),
        ..ApplyOptions::default()
    };
    let result = backend.update(&dev, operation(2, false), opts).await.unwrap();
    assert_eq!(result.changes.get("create"), Some(&2));
    assert_eq!(result.permalink, None);

    let mut fed = Vec::new();
    while let Some(event) = feed_rx.recv().await {
        fed.push(event);
    }
    assert_eq!(fed.len(), 3);
    assert!(matches!(fed[2], EngineEvent::Summary { .. }));
    assert_eq!(*sink.seen.lock(), fed);
    assert!(sink.finished.load(Ordering::SeqCst));

    let history = backend.get_history(&dev, 0, 0).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].result, UpdateResult::Succeeded);
    assert_eq!(history[0].message, "deploy queues");
    assert!(history[0].end_time >= history[0].start_time);

    // One backup from the persisted snapshot, one after apply.
    assert_eq!(backend.bucket().list(".cairn/backups/dev").await.unwrap().len(), 2);
    assert_eq!(backend.get_stack(&dev).await.unwrap().unwrap().resource_count(), 2);
    assert!(backend.bucket().list(".cairn/locks/dev").await.unwrap().is_empty());
}

#[tokio::test]
async fn preview_runs_unlocked_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file://{}", dir.path().display());
    let backend = backend_with_stack(&url, BackendOptions::default()).await;
    let dev = backend.parse_stack_reference("dev").unwrap();
    let other = LockManager::new(backend.bucket().clone(), backend.url());
    let _held = other.lock(&dev).await.unwrap();

    let result = backend
        .preview(&dev, operation(3, false), ApplyOptions::default())
        .await
        .unwrap();
    assert_eq!(
        result.permalink,
        Some(format!("{}/.cairn/stacks/dev.json", backend.url()))
    );
    assert!(backend.get_history(&dev, 0, 0).await.unwrap().is_empty());
    assert!(backend.bucket().list(".cairn/backups/dev").await.unwrap().is_empty());
    assert_eq!(backend.get_stack(&dev).await.unwrap().unwrap().resource_count(), 0);

    let err = backend
        .update(&dev, operation(3, false), ApplyOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_locked());
}

#[tokio::test]
async fn engine_failure_is_recorded_and_returned() {
    let backend = backend_with_stack("mem://fail", BackendOptions::default()).await;
    let dev = backend.parse_stack_reference("dev").unwrap();

    let err = backend
        .destroy(&dev, operation(1, true), ApplyOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Engine(_)));
    assert_eq!(err.to_string(), "provider exploded");

    let history = backend.get_history(&dev, 0, 0).await.unwrap();
    assert_eq!(history[0].result, UpdateResult::Failed);
    assert_eq!(history[0].resource_changes.get("create"), Some(&1));
    assert!(backend.bucket().list(".cairn/locks/dev").await.unwrap().is_empty());
}

#[tokio::test]
async fn history_failure_ranks_below_engine_failure() {
    let bucket = FaultyBucket {
        inner: MemoryBucket::new(),
        deny: ".cairn/history/",
    };
    let opts = || {
        BackendOptions::default().with_bucket_opener("faulty", Arc::new(FaultyOpener(bucket.clone())))
    };
    let backend = backend_with_stack("faulty://state", opts()).await;
    let dev = backend.parse_stack_reference("dev").unwrap();

    let err = backend
        .update(&dev, operation(1, false), ApplyOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("saving update info: "));

    let err = backend
        .refresh(&dev, operation(1, true), ApplyOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Engine(_)));
}

#[tokio::test]
async fn cancellation_reaches_engine() {
    let backend = backend_with_stack("mem://cancel", BackendOptions::default()).await;
    let dev = backend.parse_stack_reference("dev").unwrap();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    cancel_tx.send(true).unwrap();

    let opts = ApplyOptions {
        cancel: Some(cancel_rx),
        ..ApplyOptions::default()
    };
    let err = backend.import(&dev, operation(1, false), opts).await.unwrap_err();
    assert_eq!(err.to_string(), "cancelled");
    assert!(backend.bucket().list(".cairn/locks/dev").await.unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_stops_fan_out_for_engine_ignoring_it() {
    let backend = backend_with_stack("mem://deaf", BackendOptions::default()).await;
    let dev = backend.parse_stack_reference("dev").unwrap();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel_tx.send(true).unwrap();
        cancel_tx
    });

    let opts = ApplyOptions {
        cancel: Some(cancel_rx),
        ..ApplyOptions::default()
    };
    let op = UpdateOperation::new(Arc::new(DeafEngine));
    let err = tokio::time::timeout(Duration::from_secs(10), backend.refresh(&dev, op, opts))
        .await
        .expect("refresh ends once cancelled")
        .unwrap_err();
    assert_eq!(err.to_string(), "event stream closed");
    drop(trigger.await.unwrap());

    let history = backend.get_history(&dev, 0, 0).await.unwrap();
    assert_eq!(history[0].result, UpdateResult::Failed);
    assert!(backend.bucket().list(".cairn/locks/dev").await.unwrap().is_empty());
}

#[tokio::test]
async fn abandoned_update_releases_lock() {
    let backend = backend_with_stack("mem://abandon", BackendOptions::default()).await;
    let dev = backend.parse_stack_reference("dev").unwrap();

    let op = UpdateOperation::new(Arc::new(StuckEngine));
    let outcome = tokio::time::timeout(
        Duration::from_millis(100),
        backend.update(&dev, op, ApplyOptions::default()),
    )
    .await;
    assert!(outcome.is_err(), "the engine never finishes");

    wait_for_unlocked(&backend, ".cairn/locks/dev").await;
    let other = LockManager::new(backend.bucket().clone(), backend.url());
    other.lock(&dev).await.unwrap().release().await;
}

#[tokio::test]
async fn panicking_engine_releases_lock() {
    let backend = Arc::new(backend_with_stack("mem://panic", BackendOptions::default()).await);
    let dev = backend.parse_stack_reference("dev").unwrap();

    let task = tokio::spawn({
        let backend = backend.clone();
        let dev = dev.clone();
        async move {
            let op = UpdateOperation::new(Arc::new(PanickingEngine));
            backend.update(&dev, op, ApplyOptions::default()).await
        }
    });
    assert!(task.await.unwrap_err().is_panic());

    wait_for_unlocked(&backend, ".cairn/locks/dev").await;
    backend.remove_stack(&dev, true).await.unwrap();
}
