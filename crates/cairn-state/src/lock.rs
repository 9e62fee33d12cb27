//! # Advisory Stack Locks
//!
//! A stack is locked while any marker object exists under its lock
//! directory, `.cairn/locks/<fully qualified name>/`. Each backend instance
//! owns one marker name (`<lock id>.json`), generated at construction.
//!
//! ## Protocol
//!
//! 1. List the lock directory. Any marker, our own included, means the
//!    stack is busy: fail with [`BackendError::Locked`].
//! 2. Write our marker.
//! 3. List again. If a foreign marker appeared in between, delete ours and
//!    fail.
//!
//! There are no retries and no expiry. The protocol is cooperative: two
//! writers that interleave steps 1 to 3 exactly can both back off, but
//! they can never both proceed. It is not a substitute for consensus.
//!
//! A successful [`LockManager::lock`] returns a [`LockGuard`]. Call
//! [`LockGuard::release`] when the work is done; a guard dropped without
//! release (a cancelled future, a panic) deletes its marker from a spawned
//! task.
//!
//! `cairn cancel` deletes every marker for a stack, including ones held by
//! live processes, and is idempotent.

use std::sync::Arc;

use cairn_storage::{join_key, Bucket};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::reference::StackReference;

/// Contents of a lock marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockContent {
    /// Process id of the holder.
    pub pid: u32,
    /// User running the holder.
    pub username: String,
    /// Host running the holder.
    pub hostname: String,
    /// When the lock was taken.
    pub timestamp: DateTime<Utc>,
}

impl LockContent {
    /// Describe the current process.
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            username: env_or_unknown(&["USER", "USERNAME"]),
            hostname: hostname(),
            timestamp: Utc::now(),
        }
    }
}

fn env_or_unknown(vars: &[&str]) -> String {
    vars.iter()
        .find_map(|v| std::env::var(v).ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn hostname() -> String {
    if let Some(name) = ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|v| std::env::var(v).ok().filter(|s| !s.is_empty()))
    {
        return name;
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Per-backend lock manager.
#[derive(Debug, Clone)]
pub struct LockManager {
    bucket: Arc<dyn Bucket>,
    lock_id: String,
    url: String,
}

impl LockManager {
    /// A manager with a fresh lock id.
    pub fn new(bucket: Arc<dyn Bucket>, url: impl Into<String>) -> Self {
        Self::with_lock_id(bucket, url, uuid::Uuid::new_v4().to_string())
    }

    /// A manager with a specific lock id.
    pub fn with_lock_id(
        bucket: Arc<dyn Bucket>,
        url: impl Into<String>,
        lock_id: impl Into<String>,
    ) -> Self {
        Self {
            bucket,
            lock_id: lock_id.into(),
            url: url.into(),
        }
    }

    /// This instance's lock id.
    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    /// Key of this instance's marker for `stack`.
    pub fn lock_path(&self, stack: &StackReference) -> String {
        join_key([stack.lock_dir(), format!("{}.json", self.lock_id)])
    }

    /// Fail if any marker exists for `stack`, ours included.
    pub async fn check_for_lock(&self, stack: &StackReference) -> Result<(), BackendError> {
        self.check_markers(stack, None).await
    }

    async fn check_markers(
        &self,
        stack: &StackReference,
        ignore: Option<&str>,
    ) -> Result<(), BackendError> {
        let foreign: Vec<String> = self
            .bucket
            .list(&stack.lock_dir())
            .await?
            .into_iter()
            .filter(|e| !e.is_dir && Some(e.key.as_str()) != ignore)
            .map(|e| e.key)
            .collect();
        if foreign.is_empty() {
            return Ok(());
        }

        let mut details = String::new();
        for key in &foreign {
            let holder = match self.bucket.read_all(key).await {
                Ok(bytes) => serde_json::from_slice::<LockContent>(&bytes)
                    .map(|l| {
                        format!(
                            "created by {}@{} (pid {}) at {}",
                            l.username,
                            l.hostname,
                            l.pid,
                            l.timestamp.to_rfc3339()
                        )
                    })
                    .unwrap_or_else(|_| "unreadable lock content".to_string()),
                // Released between list and read.
                Err(e) if e.is_not_found() => "released".to_string(),
                Err(e) => return Err(e.into()),
            };
            details.push_str(&format!("\n  {}/{key}: {holder}", self.url));
        }
        Err(BackendError::Locked {
            stack: stack.to_string(),
            count: foreign.len(),
            details,
        })
    }

    /// Acquire the lock for `stack`. Fails while any marker exists, even
    /// one written by this manager.
    pub async fn lock(&self, stack: &StackReference) -> Result<LockGuard, BackendError> {
        self.check_for_lock(stack).await?;

        let path = self.lock_path(stack);
        let content = serde_json::to_vec(&LockContent::current())?;
        self.bucket.write_all(&path, &content).await?;
        let guard = LockGuard {
            bucket: self.bucket.clone(),
            stack: stack.to_string(),
            path,
            url: self.url.clone(),
            released: false,
        };

        if let Err(e) = self.check_markers(stack, Some(&guard.path)).await {
            guard.release().await;
            return Err(e);
        }
        tracing::debug!(stack = %stack, lock_id = %self.lock_id, "acquired stack lock");
        Ok(guard)
    }

    /// Delete every marker for `stack`, ours or not. Idempotent.
    pub async fn cancel(&self, stack: &StackReference) -> Result<(), BackendError> {
        let entries = match self.bucket.list(&stack.lock_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries.into_iter().filter(|e| !e.is_dir) {
            match self.bucket.delete(&entry.key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!(stack = %stack, "cancelled current update");
        Ok(())
    }
}

/// A held stack lock.
#[must_use = "dropping the guard releases the lock"]
#[derive(Debug)]
pub struct LockGuard {
    bucket: Arc<dyn Bucket>,
    stack: String,
    path: String,
    url: String,
    released: bool,
}

impl LockGuard {
    /// Key of the marker this guard holds.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Delete the marker. Failures are logged, not returned.
    pub async fn release(mut self) {
        self.released = true;
        delete_marker(self.bucket.clone(), &self.stack, &self.path, &self.url).await;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let (bucket, stack, path, url) = (
            self.bucket.clone(),
            std::mem::take(&mut self.stack),
            std::mem::take(&mut self.path),
            std::mem::take(&mut self.url),
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { delete_marker(bucket, &stack, &path, &url).await });
            }
            Err(_) => tracing::warn!(
                stack = %stack,
                lock = %format!("{url}/{path}"),
                "lock dropped outside a runtime, manual clean up may be required"
            ),
        }
    }
}

async fn delete_marker(bucket: Arc<dyn Bucket>, stack: &str, path: &str, url: &str) {
    match bucket.delete(path).await {
        Ok(()) => tracing::debug!(stack = %stack, "released stack lock"),
        Err(e) => tracing::warn!(
            stack = %stack,
            lock = %format!("{url}/{path}"),
            error = %e,
            "there was a problem deleting the lock, manual clean up may be required"
        ),
    }
}
