//! Legacy-to-project layout migration.

use std::collections::BTreeMap;

use cairn_core::{
    ConfigMap, Deployment, Manifest, Resource, UntypedDeployment, UpdateInfo, UpdateKind,
    UpdateResult, Urn,
};
use cairn_state::{
    BackendError, BackendOptions, LocalBackend, LockManager, ReferenceStore, META_PATH,
};

fn deployment(stack: &str, project: &str, resources: usize) -> Deployment {
    Deployment {
        manifest: Manifest::now(),
        secrets_providers: None,
        resources: (0..resources)
            .map(|i| {
                Resource::new(
                    Urn::new(stack, project, "pkg:Topic", &format!("topic-{i}")),
                    "pkg:Topic",
                )
            })
            .collect(),
    }
}

fn record(message: &str) -> UpdateInfo {
    UpdateInfo {
        kind: UpdateKind::Update,
        start_time: 10,
        end_time: 20,
        message: message.into(),
        environment: BTreeMap::new(),
        config: ConfigMap::new(),
        result: UpdateResult::Succeeded,
        resource_changes: BTreeMap::new(),
    }
}

async fn seed(backend: &LocalBackend, name: &str, resources: usize) {
    let stack = backend.parse_stack_reference(name).unwrap();
    backend.create_stack(&stack).await.unwrap();
    if resources > 0 {
        let envelope =
            UntypedDeployment::from_deployment(&deployment(name, "infra", resources)).unwrap();
        backend.import_deployment(&stack, envelope).await.unwrap();
    }
}

#[tokio::test]
async fn partial_migration_is_safe_to_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file://{}", dir.path().display());
    let backend = LocalBackend::new(&url, BackendOptions::default()).await.unwrap();
    assert_eq!(backend.store(), ReferenceStore::Legacy);

    seed(&backend, "alpha", 2).await;
    seed(&backend, "beta", 0).await;
    let bucket = backend.bucket().clone();

    let err = backend.upgrade().await.unwrap_err();
    assert!(matches!(err.root(), BackendError::MigrationIncomplete { .. }));
    assert!(err.to_string().contains("beta"));
    assert_eq!(backend.store(), ReferenceStore::Legacy);
    assert!(!bucket.exists(META_PATH).await.unwrap());
    assert!(bucket.exists(".cairn/stacks/infra/alpha.json").await.unwrap());
    assert!(!bucket.exists(".cairn/stacks/alpha.json").await.unwrap());
    assert!(bucket.exists(".cairn/stacks/beta.json").await.unwrap());
    let alpha_backups = bucket.list(".cairn/backups/alpha").await.unwrap().len();

    // A second attempt must not touch the already-moved stack.
    backend.upgrade().await.unwrap_err();
    assert_eq!(
        bucket.list(".cairn/backups/alpha").await.unwrap().len(),
        alpha_backups
    );
    assert!(bucket.exists(".cairn/stacks/infra/alpha.json").await.unwrap());

    let beta = backend.parse_stack_reference("beta").unwrap();
    let envelope = UntypedDeployment::from_deployment(&deployment("beta", "infra", 1)).unwrap();
    backend.import_deployment(&beta, envelope).await.unwrap();

    backend.upgrade().await.unwrap();
    assert_eq!(backend.store(), ReferenceStore::Project);
    assert!(bucket.exists(META_PATH).await.unwrap());

    let names: Vec<String> = backend
        .list_stacks(None)
        .await
        .unwrap()
        .iter()
        .map(|s| s.name.to_string())
        .collect();
    assert_eq!(names, vec!["organization/infra/alpha", "organization/infra/beta"]);

    let reopened = LocalBackend::new(&url, BackendOptions::default()).await.unwrap();
    assert_eq!(reopened.store(), ReferenceStore::Project);
}

#[tokio::test]
async fn migration_moves_history_and_rewrites_urns() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file://{}", dir.path().display());
    let backend = LocalBackend::new(&url, BackendOptions::default()).await.unwrap();
    seed(&backend, "dev", 2).await;

    // Write a history record through a second handle on the same store.
    let dev = backend.parse_stack_reference("dev").unwrap();
    let store = cairn_state::CheckpointStore::new(backend.bucket().clone(), false);
    store.add_history(&dev, &record("first")).await.unwrap();

    backend.upgrade().await.unwrap();
    let moved = backend.parse_stack_reference("infra/dev").unwrap();
    let history = backend.get_history(&moved, 0, 0).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message, "first");
    assert!(backend
        .bucket()
        .list(".cairn/history/dev")
        .await
        .unwrap()
        .iter()
        .all(|e| e.is_dir));

    let stack = backend.get_stack(&moved).await.unwrap().unwrap();
    for r in &stack.snapshot().unwrap().resources {
        assert_eq!(r.urn.project(), Some("infra"));
        assert_eq!(r.urn.stack(), Some("dev"));
    }
}

#[tokio::test]
async fn legacy_files_only_warn_in_project_mode() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file://{}", dir.path().display());
    let backend = LocalBackend::new(&url, BackendOptions::default()).await.unwrap();
    backend.upgrade().await.unwrap();
    backend
        .bucket()
        .write_all(".cairn/stacks/stray.json", b"{}")
        .await
        .unwrap();

    let reopened = LocalBackend::new(&url, BackendOptions::default()).await.unwrap();
    assert_eq!(reopened.store(), ReferenceStore::Project);
    assert!(reopened.list_stacks(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn upgrade_is_noop_in_project_mode() {
    let backend = LocalBackend::new("mem://noop", BackendOptions::default())
        .await
        .unwrap();
    backend.upgrade().await.unwrap();
    backend.upgrade().await.unwrap();
    assert_eq!(backend.store(), ReferenceStore::Project);
}

#[tokio::test]
async fn upgrade_waits_for_stack_lock_before_reading_it() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file://{}", dir.path().display());
    let backend = LocalBackend::new(&url, BackendOptions::default()).await.unwrap();
    seed(&backend, "beta", 0).await;

    let beta = backend.parse_stack_reference("beta").unwrap();
    let other = LockManager::new(backend.bucket().clone(), backend.url());
    let held = other.lock(&beta).await.unwrap();

    // A stack without resources would fail inference; the lock is checked first.
    let err = backend.upgrade().await.unwrap_err();
    assert!(err.root().is_locked());
    assert!(backend
        .bucket()
        .exists(".cairn/stacks/beta.json")
        .await
        .unwrap());

    held.release().await;
    let err = backend.upgrade().await.unwrap_err();
    assert!(matches!(err.root(), BackendError::MigrationIncomplete { .. }));
    assert!(backend.bucket().list(".cairn/locks/beta").await.unwrap().is_empty());
}
