//! Behaviour every bucket driver must share, run against each built-in
//! driver through the URL mux.

use std::sync::Arc;

use cairn_storage::{list_recursive, remove_all, Bucket, BucketMux};

async fn exercise(bucket: Arc<dyn Bucket>) {
    assert!(bucket.list(".cairn").await.unwrap().is_empty());
    assert!(bucket.read_all(".cairn/meta.yaml").await.unwrap_err().is_not_found());

    bucket.write_all(".cairn/stacks/dev.json", b"{}").await.unwrap();
    bucket.write_all(".cairn/stacks/infra/prod.json", b"{}").await.unwrap();
    bucket.write_all(".cairn/history/dev/a.history.json", b"{}").await.unwrap();

    let stacks = bucket.list(".cairn/stacks").await.unwrap();
    assert_eq!(stacks.len(), 2);
    assert!(!stacks[0].is_dir);
    assert!(stacks[1].is_dir);

    bucket.copy(".cairn/stacks/dev.json", ".cairn/backups/dev/dev.json.1").await.unwrap();
    assert!(bucket.exists(".cairn/backups/dev/dev.json.1").await.unwrap());

    let all = list_recursive(bucket.as_ref(), ".cairn").await.unwrap();
    assert_eq!(
        all,
        vec![
            ".cairn/backups/dev/dev.json.1".to_string(),
            ".cairn/history/dev/a.history.json".to_string(),
            ".cairn/stacks/dev.json".to_string(),
            ".cairn/stacks/infra/prod.json".to_string(),
        ]
    );

    remove_all(bucket.as_ref(), ".cairn/history").await.unwrap();
    assert!(bucket.list(".cairn/history/dev").await.unwrap().is_empty());
    remove_all(bucket.as_ref(), ".cairn/nothing-here").await.unwrap();
}

#[tokio::test]
async fn file_driver_honours_contract() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file://{}", dir.path().display());
    let opened = BucketMux::new().open(&url).unwrap();
    assert!(opened.url.starts_with("file:///"));
    exercise(opened.bucket).await;
}

#[tokio::test]
async fn mem_driver_honours_contract() {
    let opened = BucketMux::new().open("mem://contract").unwrap();
    exercise(opened.bucket).await;
}
