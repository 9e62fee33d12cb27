//! # Update History
//!
//! Each completed, non-dry-run operation writes two objects into the
//! stack's history directory, sharing one timestamp:
//!
//! - `<name>-<unix nanos>.history.json[.gz]`: the [`UpdateInfo`] record.
//! - `<name>-<unix nanos>.checkpoint.json[.gz]`: a copy of the checkpoint
//!   as it stood when the record was written.
//!
//! Object names sort in creation order. Records are never rewritten.

use cairn_core::UpdateInfo;
use cairn_storage::{join_key, remove_all};

use crate::checkpoint::{decode, encode, unix_nanos, CheckpointStore};
use crate::error::BackendError;
use crate::reference::{StackReference, GZIP_EXT, JSON_EXT};

const HISTORY_SUFFIX: &str = ".history";
const CHECKPOINT_SUFFIX: &str = ".checkpoint";

fn is_history_record(object_name: &str) -> bool {
    [JSON_EXT, GZIP_EXT]
        .iter()
        .any(|ext| object_name.ends_with(&format!("{HISTORY_SUFFIX}{ext}")))
}

impl CheckpointStore {
    /// Append `update` to the stack's history, together with a copy of the
    /// current checkpoint.
    pub async fn add_history(
        &self,
        stack: &StackReference,
        update: &UpdateInfo,
    ) -> Result<(), BackendError> {
        let dir = stack.history_dir();
        let bucket = self.bucket();
        let ext = self.ext();

        let mut nanos = unix_nanos();
        let record_key = loop {
            let key = join_key([
                dir.clone(),
                format!("{}-{nanos}{HISTORY_SUFFIX}{ext}", stack.name()),
            ]);
            if !bucket.exists(&key).await? {
                break key;
            }
            nanos += 1;
        };
        bucket
            .write_all(&record_key, &encode(update, self.gzip())?)
            .await?;

        let checkpoint = self.stack_path(stack).await?;
        let checkpoint_ext = if checkpoint.ends_with(GZIP_EXT) {
            GZIP_EXT
        } else {
            JSON_EXT
        };
        let copy_key = join_key([
            dir,
            format!("{}-{nanos}{CHECKPOINT_SUFFIX}{checkpoint_ext}", stack.name()),
        ]);
        match bucket.copy(&checkpoint, &copy_key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(stack = %stack, "no checkpoint to copy into history");
            }
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(stack = %stack, key = %record_key, kind = %update.kind, "recorded update");
        Ok(())
    }

    /// The stack's update records, newest first.
    ///
    /// With `page_size > 0` only one page is returned; pages count from 1
    /// and a page below 1 is treated as 1. A stack without history yields
    /// an empty list.
    pub async fn get_history(
        &self,
        stack: &StackReference,
        page_size: usize,
        page: usize,
    ) -> Result<Vec<UpdateInfo>, BackendError> {
        let mut keys: Vec<String> = self
            .bucket()
            .list(&stack.history_dir())
            .await?
            .into_iter()
            .filter(|e| !e.is_dir && is_history_record(e.object_name()))
            .map(|e| e.key)
            .collect();
        keys.sort();
        keys.reverse();

        if page_size > 0 {
            let page = page.max(1);
            let start = (page - 1).saturating_mul(page_size).min(keys.len());
            let end = start.saturating_add(page_size).min(keys.len());
            keys = keys[start..end].to_vec();
        }

        let mut updates = Vec::with_capacity(keys.len());
        for key in keys {
            let data = self.bucket().read_all(&key).await?;
            let update: UpdateInfo = decode(&key, &data)
                .map_err(|e| e.context(format!("reading history file {key}")))?;
            updates.push(update);
        }
        Ok(updates)
    }

    /// Move every history object of `old` under `new`, renaming the name
    /// prefix. Objects not prefixed by `old`'s name are left alone.
    pub async fn rename_history(
        &self,
        old: &StackReference,
        new: &StackReference,
    ) -> Result<(), BackendError> {
        let bucket = self.bucket();
        let old_name = old.name().as_str();
        let new_dir = new.history_dir();

        for entry in bucket.list(&old.history_dir()).await? {
            if entry.is_dir {
                continue;
            }
            let file = entry.object_name();
            // The timestamp never contains '-', so the last one ends the name.
            let Some(idx) = file.rfind('-') else {
                continue;
            };
            let (prefix, rest) = file.split_at(idx);
            if prefix != old_name {
                continue;
            }
            let dst = join_key([new_dir.clone(), format!("{}{rest}", new.name())]);
            bucket.copy(&entry.key, &dst).await?;
            bucket.delete(&entry.key).await?;
        }
        Ok(())
    }

    /// Delete the stack's whole history directory.
    pub async fn remove_history(&self, stack: &StackReference) -> Result<(), BackendError> {
        Ok(remove_all(self.bucket().as_ref(), &stack.history_dir()).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::reference::{CurrentProject, ReferenceStore};
    use cairn_core::{ConfigMap, ResourceChanges, UpdateKind, UpdateResult};
    use cairn_storage::{Bucket, MemoryBucket};

    fn reference(text: &str) -> StackReference {
        ReferenceStore::Legacy
            .parse_reference(text, &CurrentProject::default())
            .unwrap()
    }

    fn update(message: &str) -> UpdateInfo {
        UpdateInfo {
            kind: UpdateKind::Update,
            start_time: 1,
            end_time: 2,
            message: message.into(),
            environment: BTreeMap::new(),
            config: ConfigMap::new(),
            result: UpdateResult::Succeeded,
            resource_changes: ResourceChanges::new(),
        }
    }

    #[tokio::test]
    async fn history_is_newest_first_and_paged() {
        let bucket = MemoryBucket::new();
        let store = CheckpointStore::new(Arc::new(bucket.clone()), false);
        let dev = reference("dev");
        store.save_stack(&dev, None, None).await.unwrap();
        for i in 0..5 {
            store.add_history(&dev, &update(&format!("u{i}"))).await.unwrap();
        }

        let all = store.get_history(&dev, 0, 0).await.unwrap();
        let messages: Vec<&str> = all.iter().map(|u| u.message.as_str()).collect();
        assert_eq!(messages, vec!["u4", "u3", "u2", "u1", "u0"]);

        let page2 = store.get_history(&dev, 2, 2).await.unwrap();
        assert_eq!(page2[0].message, "u2");
        assert_eq!(page2.len(), 2);
        let page0 = store.get_history(&dev, 2, 0).await.unwrap();
        assert_eq!(page0[0].message, "u4");
        assert!(store.get_history(&dev, 2, 9).await.unwrap().is_empty());

        let copies = bucket
            .list(".cairn/history/dev")
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.key.ends_with(".checkpoint.json"))
            .count();
        assert_eq!(copies, 5);
    }

    #[tokio::test]
    async fn missing_history_is_empty() {
        let store = CheckpointStore::new(Arc::new(MemoryBucket::new()), true);
        assert!(store.get_history(&reference("dev"), 0, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rename_moves_only_matching_prefix() {
        let bucket = MemoryBucket::new();
        let store = CheckpointStore::new(Arc::new(bucket.clone()), true);
        let old = reference("my-stack");
        let new = reference("renamed");
        store.add_history(&old, &update("x")).await.unwrap();
        bucket
            .write_all(".cairn/history/my-stack/stray-1.history.json", b"{}")
            .await
            .unwrap();

        store.rename_history(&old, &new).await.unwrap();
        let moved = store.get_history(&new, 0, 0).await.unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].message, "x");
        let left: Vec<String> = bucket
            .list(".cairn/history/my-stack")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(left, vec![".cairn/history/my-stack/stray-1.history.json"]);
    }

    #[tokio::test]
    async fn remove_history_clears_directory() {
        let bucket = MemoryBucket::new();
        let store = CheckpointStore::new(Arc::new(bucket.clone()), false);
        let dev = reference("dev");
        store.add_history(&dev, &update("x")).await.unwrap();
        store.remove_history(&dev).await.unwrap();
        assert!(bucket.list(".cairn/history/dev").await.unwrap().is_empty());
    }
}
