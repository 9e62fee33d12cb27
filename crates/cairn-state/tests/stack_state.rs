//! Checkpoint, backup, lock and naming behaviour of the backend, run
//! against a filesystem bucket so that several backend instances can share
//! one state directory.

use cairn_core::{
    Deployment, Manifest, Name, Resource, UntypedDeployment, Urn, VersionedCheckpoint,
};
use cairn_state::{checkpoint, BackendError, BackendOptions, LocalBackend, ReferenceStore};
use tempfile::TempDir;

fn deployment(stack: &str, project: &str, resources: usize) -> Deployment {
    Deployment {
        manifest: Manifest::now(),
        secrets_providers: None,
        resources: (0..resources)
            .map(|i| {
                Resource::new(
                    Urn::new(stack, project, "pkg:Bucket", &format!("bucket-{i}")),
                    "pkg:Bucket",
                )
            })
            .collect(),
    }
}

fn file_url(dir: &TempDir) -> String {
    format!("file://{}", dir.path().display())
}

async fn open(url: &str, gzip: bool, project: Option<&str>) -> LocalBackend {
    let opts = BackendOptions::default()
        .with_gzip(gzip)
        .with_current_project(project.map(|p| Name::parse_project(p).unwrap()));
    LocalBackend::new(url, opts).await.unwrap()
}

async fn backups(backend: &LocalBackend, dir: &str) -> usize {
    backend.bucket().list(dir).await.unwrap().len()
}

#[tokio::test]
async fn n_saves_leave_n_minus_one_backups() {
    for gzip in [false, true] {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(&file_url(&dir), gzip, None).await;
        let dev = backend.parse_stack_reference("dev").unwrap();
        backend.create_stack(&dev).await.unwrap();

        for n in 1..=3 {
            let envelope =
                UntypedDeployment::from_deployment(&deployment("dev", "infra", n)).unwrap();
            backend.import_deployment(&dev, envelope).await.unwrap();
        }

        // create + 3 imports = 4 saves
        assert_eq!(backups(&backend, ".cairn/backups/dev").await, 3);
        let mut saved: Vec<(i64, usize)> = Vec::new();
        for entry in backend.bucket().list(".cairn/backups/dev").await.unwrap() {
            let nanos: i64 = entry.object_name().split('.').nth(1).unwrap().parse().unwrap();
            let bytes = backend.bucket().read_all(&entry.key).await.unwrap();
            let doc: VersionedCheckpoint = checkpoint::decode(&entry.key, &bytes).unwrap();
            saved.push((nanos, doc.checkpoint.resource_count()));
        }
        saved.sort();
        let counts: Vec<usize> = saved.into_iter().map(|(_, n)| n).collect();
        assert_eq!(counts, vec![0, 1, 2], "each backup holds the checkpoint it replaced");
        let live = backend.get_stack(&dev).await.unwrap().unwrap();
        assert_eq!(live.resource_count(), 3);
        let ext = if gzip { ".json.gz" } else { ".json" };
        assert_eq!(live.path(), format!(".cairn/stacks/dev{ext}"));
    }
}

#[tokio::test]
async fn checkpoint_survives_gzip_toggle() {
    let dir = tempfile::tempdir().unwrap();
    let url = file_url(&dir);
    let plain = open(&url, false, None).await;
    let dev = plain.parse_stack_reference("dev").unwrap();
    plain.create_stack(&dev).await.unwrap();
    let envelope = UntypedDeployment::from_deployment(&deployment("dev", "infra", 2)).unwrap();
    plain.import_deployment(&dev, envelope.clone()).await.unwrap();

    let zipped = open(&url, true, None).await;
    let dev = zipped.parse_stack_reference("dev").unwrap();
    let before = zipped.export_deployment(&dev).await.unwrap();
    assert_eq!(before.deployment, envelope.deployment);

    zipped.import_deployment(&dev, before).await.unwrap();
    assert!(!zipped.bucket().exists(".cairn/stacks/dev.json").await.unwrap());
    assert!(zipped.bucket().exists(".cairn/stacks/dev.json.gz").await.unwrap());
    assert_eq!(plain.get_stack(&dev).await.unwrap().unwrap().resource_count(), 2);
}

#[tokio::test]
async fn removal_refuses_stack_with_resources() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&file_url(&dir), false, None).await;
    let dev = backend.parse_stack_reference("dev").unwrap();
    backend.create_stack(&dev).await.unwrap();
    let envelope = UntypedDeployment::from_deployment(&deployment("dev", "infra", 1)).unwrap();
    backend.import_deployment(&dev, envelope).await.unwrap();

    let err = backend.remove_stack(&dev, false).await.unwrap_err();
    assert!(matches!(err, BackendError::HasResources { .. }));
    assert!(backend.get_stack(&dev).await.unwrap().is_some());

    backend.remove_stack(&dev, true).await.unwrap();
    assert!(backend.get_stack(&dev).await.unwrap().is_none());
    assert!(backups(&backend, ".cairn/backups/dev").await >= 1);
    assert!(backend.bucket().list(".cairn/locks/dev").await.unwrap().is_empty());

    let err = backend.remove_stack(&dev, false).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn empty_stack_removal_needs_no_force() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&file_url(&dir), false, None).await;
    let dev = backend.parse_stack_reference("dev").unwrap();
    backend.create_stack(&dev).await.unwrap();
    backend.remove_stack(&dev, false).await.unwrap();
    assert!(backend.list_stacks(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn second_backend_is_locked_out_until_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let url = file_url(&dir);
    let a = open(&url, false, None).await;
    let b = open(&url, false, None).await;
    assert_ne!(a.lock_id(), b.lock_id());
    let dev = a.parse_stack_reference("dev").unwrap();
    a.create_stack(&dev).await.unwrap();

    let holder = cairn_state::LockManager::with_lock_id(a.bucket().clone(), a.url(), a.lock_id());
    let _held = holder.lock(&dev).await.unwrap();

    let err = b.remove_stack(&dev, true).await.unwrap_err();
    assert!(err.is_locked());
    assert!(err.to_string().contains("dev"));
    assert!(b.get_stack(&dev).await.unwrap().is_some());

    b.cancel_current_update(&dev).await.unwrap();
    b.cancel_current_update(&dev).await.unwrap();
    b.remove_stack(&dev, true).await.unwrap();
}

#[tokio::test]
async fn project_references_render_against_current_project() {
    let dir = tempfile::tempdir().unwrap();
    let url = file_url(&dir);
    let backend = open(&url, false, Some("infra")).await;
    backend.upgrade().await.unwrap();
    assert_eq!(backend.store(), ReferenceStore::Project);

    let prod = backend.parse_stack_reference("prod").unwrap();
    assert_eq!(prod.to_string(), "prod");
    assert_eq!(prod.fully_qualified_name(), "organization/infra/prod");
    backend.create_stack(&prod).await.unwrap();

    backend.set_current_project(Some(Name::parse_project("web").unwrap()));
    assert_eq!(prod.to_string(), "organization/infra/prod");

    backend.set_current_project(None);
    let listed = backend.list_stacks(None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name.to_string(), "organization/infra/prod");
    assert_eq!(listed[0].resource_count, None);

    let web = Name::parse_project("web").unwrap();
    assert!(backend.list_stacks(Some(&web)).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_names_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&file_url(&dir), false, None).await;
    assert!(backend.validate_stack_name("dev").is_ok());
    assert!(backend.validate_stack_name("has space").is_err());
    assert!(backend.validate_stack_name(&"x".repeat(101)).is_err());
    assert!(backend.validate_stack_name("infra/dev").is_err());
}

#[tokio::test]
async fn unknown_layout_version_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let url = file_url(&dir);
    let backend = open(&url, false, None).await;
    backend
        .bucket()
        .write_all(cairn_state::META_PATH, b"version: 2\n")
        .await
        .unwrap();
    let err = LocalBackend::new(&url, BackendOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::UnsupportedLayoutVersion(2)));
}
