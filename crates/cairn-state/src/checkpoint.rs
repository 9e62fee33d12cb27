//! # Checkpoint Storage
//!
//! Reads and writes a stack's versioned checkpoint document and keeps
//! timestamped backups of every version it replaces.
//!
//! ## Paths
//!
//! A checkpoint lives at `<stack base path>.json`, or `.json.gz` when
//! compressed. Both variants may exist after the gzip toggle flips; reads
//! then prefer the variant matching the current toggle. After a save, the
//! other variant is removed (its contents were already backed up).
//!
//! ## Backups
//!
//! Before a checkpoint is overwritten, the existing object is copied to
//! `<backup dir>/<name>.<unix nanos>.json[.gz]`. Saving a stack `N` times
//! therefore leaves one live checkpoint and `N - 1` backups. Backups are
//! never pruned.

use std::io::{Read, Write};
use std::sync::Arc;

use cairn_core::{
    Checkpoint, ConfigMap, Deployment, SecretsProviderState, VersionedCheckpoint,
    CHECKPOINT_VERSION,
};
use cairn_storage::{join_key, Bucket};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::reference::{StackReference, GZIP_EXT, JSON_EXT};

// ─── Encoding ───────────────────────────────────────────────────────

/// Gzip `data`.
pub fn gzip(data: &[u8]) -> Result<Vec<u8>, BackendError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Gunzip `data`.
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, BackendError> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Whether `key` names a compressed document.
pub fn is_compressed(key: &str) -> bool {
    key.ends_with(".gz")
}

/// Extension of a checkpoint key: [`GZIP_EXT`] or [`JSON_EXT`].
fn checkpoint_ext(key: &str) -> &'static str {
    if is_compressed(key) {
        GZIP_EXT
    } else {
        JSON_EXT
    }
}

/// Serialize `value` as indented JSON, compressed when `compress` is set.
pub fn encode<T: Serialize>(value: &T, compress: bool) -> Result<Vec<u8>, BackendError> {
    let json = serde_json::to_vec_pretty(value)?;
    if compress {
        gzip(&json)
    } else {
        Ok(json)
    }
}

/// Decode a document read from `key`, decompressing by extension.
pub fn decode<T: DeserializeOwned>(key: &str, data: &[u8]) -> Result<T, BackendError> {
    if is_compressed(key) {
        Ok(serde_json::from_slice(&gunzip(data)?)?)
    } else {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Current time in nanoseconds since the Unix epoch.
pub(crate) fn unix_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default)]
    version: u32,
}

// ─── Store ──────────────────────────────────────────────────────────

/// Checkpoint, backup, and history storage for one bucket.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    bucket: Arc<dyn Bucket>,
    gzip: bool,
}

impl CheckpointStore {
    /// A store over `bucket`, compressing new writes when `gzip` is set.
    pub fn new(bucket: Arc<dyn Bucket>, gzip: bool) -> Self {
        Self { bucket, gzip }
    }

    /// The underlying bucket.
    pub fn bucket(&self) -> &Arc<dyn Bucket> {
        &self.bucket
    }

    /// Whether new writes are compressed.
    pub fn gzip(&self) -> bool {
        self.gzip
    }

    pub(crate) fn ext(&self) -> &'static str {
        if self.gzip {
            GZIP_EXT
        } else {
            JSON_EXT
        }
    }

    /// Key of the stack's checkpoint.
    ///
    /// If both variants exist, the one matching the gzip toggle wins. If
    /// only one exists, it is returned. If neither exists, the toggle
    /// decides.
    pub async fn stack_path(&self, stack: &StackReference) -> Result<String, BackendError> {
        let base = stack.stack_base_path();
        let plain = format!("{base}{JSON_EXT}");
        let compressed = format!("{base}{GZIP_EXT}");
        let (preferred, other) = if self.gzip {
            (compressed, plain)
        } else {
            (plain, compressed)
        };
        if self.bucket.exists(&preferred).await? {
            return Ok(preferred);
        }
        if self.bucket.exists(&other).await? {
            return Ok(other);
        }
        Ok(preferred)
    }

    /// Whether the stack has a checkpoint.
    pub async fn exists(&self, stack: &StackReference) -> Result<bool, BackendError> {
        let path = self.stack_path(stack).await?;
        Ok(self.bucket.exists(&path).await?)
    }

    /// Load the stack's checkpoint, or `None` if it has never been saved.
    pub async fn load(&self, stack: &StackReference) -> Result<Option<Checkpoint>, BackendError> {
        let path = self.stack_path(stack).await?;
        let data = match self.bucket.read_all(&path).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let bytes = if is_compressed(&path) {
            gunzip(&data)?
        } else {
            data
        };

        let header: VersionHeader = serde_json::from_slice(&bytes)?;
        if header.version > CHECKPOINT_VERSION {
            return Err(BackendError::UnsupportedCheckpointVersion {
                stack: stack.to_string(),
                version: header.version,
            });
        }
        let versioned: VersionedCheckpoint = serde_json::from_slice(&bytes)?;
        Ok(Some(versioned.checkpoint))
    }

    /// Load the stack's checkpoint, failing with `NotFound` if absent.
    pub async fn get_checkpoint(&self, stack: &StackReference) -> Result<Checkpoint, BackendError> {
        self.load(stack)
            .await?
            .ok_or_else(|| BackendError::NotFound {
                stack: stack.to_string(),
            })
    }

    /// The stack's latest deployment. Absent stacks and never-deployed
    /// stacks both yield `None`.
    pub async fn snapshot(&self, stack: &StackReference) -> Result<Option<Deployment>, BackendError> {
        Ok(self.load(stack).await?.and_then(|c| c.latest))
    }

    /// Write `checkpoint` for `stack`, backing up whatever it replaces.
    /// Returns the key written.
    pub async fn save_checkpoint(
        &self,
        stack: &StackReference,
        checkpoint: &Checkpoint,
    ) -> Result<String, BackendError> {
        let old_path = self.stack_path(stack).await?;
        let had_old = self.bucket.exists(&old_path).await?;
        if had_old {
            self.backup_target(stack, &old_path).await?;
        }

        let new_path = format!("{}{}", stack.stack_base_path(), self.ext());
        let data = encode(&VersionedCheckpoint::new(checkpoint.clone()), self.gzip)?;
        self.bucket.write_all(&new_path, &data).await?;
        tracing::debug!(stack = %stack, key = %new_path, "saved checkpoint");

        if had_old && old_path != new_path {
            match self.bucket.delete(&old_path).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(new_path)
    }

    /// Save `snapshot` as the stack's latest deployment, recording the
    /// secrets provider it was encrypted with.
    pub async fn save_stack(
        &self,
        stack: &StackReference,
        snapshot: Option<&Deployment>,
        secrets: Option<&SecretsProviderState>,
    ) -> Result<String, BackendError> {
        let latest = snapshot.cloned().map(|mut d| {
            if let Some(state) = secrets {
                d.secrets_providers = Some(state.clone());
            }
            d
        });
        let checkpoint = Checkpoint {
            stack: stack.fully_qualified_name(),
            config: ConfigMap::new(),
            latest,
        };
        self.save_checkpoint(stack, &checkpoint).await
    }

    /// Copy the stack's current checkpoint into its backup directory.
    pub async fn backup_stack(&self, stack: &StackReference) -> Result<(), BackendError> {
        let path = self.stack_path(stack).await?;
        self.backup_target(stack, &path).await.map(|_| ())
    }

    /// Move every checkpoint variant of the stack into its backup
    /// directory. Missing variants are skipped.
    pub async fn move_to_backup(&self, stack: &StackReference) -> Result<(), BackendError> {
        let base = stack.stack_base_path();
        for ext in [JSON_EXT, GZIP_EXT] {
            let path = format!("{base}{ext}");
            if !self.bucket.exists(&path).await? {
                continue;
            }
            self.backup_target(stack, &path).await?;
            match self.bucket.delete(&path).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Copy `src` to a fresh timestamped key under the stack's backup
    /// directory. Returns the backup key.
    async fn backup_target(&self, stack: &StackReference, src: &str) -> Result<String, BackendError> {
        let dir = stack.backup_dir();
        let ext = checkpoint_ext(src);
        let mut nanos = unix_nanos();
        let dst = loop {
            let candidate = join_key([dir.clone(), format!("{}.{nanos}{ext}", stack.name())]);
            if !self.bucket.exists(&candidate).await? {
                break candidate;
            }
            nanos += 1;
        };
        self.bucket.copy(src, &dst).await?;
        tracing::debug!(stack = %stack, key = %dst, "backed up checkpoint");
        Ok(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{CurrentProject, ReferenceStore};
    use cairn_core::{ConfigValue, Manifest, Resource, Urn};
    use cairn_storage::MemoryBucket;

    fn stack() -> StackReference {
        ReferenceStore::Legacy
            .parse_reference("dev", &CurrentProject::default())
            .unwrap()
    }

    fn deployment(resources: usize) -> Deployment {
        Deployment {
            manifest: Manifest::now(),
            secrets_providers: None,
            resources: (0..resources)
                .map(|i| {
                    let urn = Urn::new("dev", "infra", "pkg:Bucket", &format!("b{i}"));
                    Resource::new(urn, "pkg:Bucket")
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn checkpoint_with_config_roundtrips_in_both_formats() {
        for compress in [false, true] {
            let store = CheckpointStore::new(Arc::new(MemoryBucket::new()), compress);
            let mut config = ConfigMap::new();
            config.insert("infra:region", ConfigValue::plain("eu-west-1"));
            config.insert("infra:token", ConfigValue::secure("v1:bm9uY2U=:Y3Q="));
            let checkpoint = Checkpoint {
                stack: "dev".into(),
                config,
                latest: Some(deployment(2)),
            };

            let path = store.save_checkpoint(&stack(), &checkpoint).await.unwrap();
            assert_eq!(is_compressed(&path), compress);
            assert_eq!(store.load(&stack()).await.unwrap(), Some(checkpoint));
        }
    }

    #[test]
    fn gzip_roundtrip() {
        let data = b"{\"version\":3}".repeat(20);
        let packed = gzip(&data).unwrap();
        assert_ne!(packed, data);
        assert_eq!(gunzip(&packed).unwrap(), data);
    }

    #[tokio::test]
    async fn missing_checkpoint_loads_as_none() {
        let store = CheckpointStore::new(Arc::new(MemoryBucket::new()), false);
        assert!(store.load(&stack()).await.unwrap().is_none());
        assert!(store.get_checkpoint(&stack()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn stack_path_prefers_toggle_when_both_exist() {
        let bucket = MemoryBucket::new();
        bucket.write_all(".cairn/stacks/dev.json", b"{}").await.unwrap();
        let plain = CheckpointStore::new(Arc::new(bucket.clone()), false);
        let zipped = CheckpointStore::new(Arc::new(bucket.clone()), true);
        assert_eq!(plain.stack_path(&stack()).await.unwrap(), ".cairn/stacks/dev.json");
        assert_eq!(zipped.stack_path(&stack()).await.unwrap(), ".cairn/stacks/dev.json");

        bucket.write_all(".cairn/stacks/dev.json.gz", b"").await.unwrap();
        assert_eq!(zipped.stack_path(&stack()).await.unwrap(), ".cairn/stacks/dev.json.gz");
        assert_eq!(plain.stack_path(&stack()).await.unwrap(), ".cairn/stacks/dev.json");
    }

    #[tokio::test]
    async fn save_stack_records_secrets_provider() {
        let store = CheckpointStore::new(Arc::new(MemoryBucket::new()), false);
        let state = SecretsProviderState {
            kind: "passphrase".into(),
            state: serde_json::json!({"salt": "v1:abc:def"}),
        };
        store
            .save_stack(&stack(), Some(&deployment(1)), Some(&state))
            .await
            .unwrap();
        let chk = store.get_checkpoint(&stack()).await.unwrap();
        assert_eq!(chk.stack, "dev");
        assert_eq!(chk.latest.unwrap().secrets_providers, Some(state));
    }

    #[tokio::test]
    async fn switching_gzip_moves_old_variant_out() {
        let bucket = MemoryBucket::new();
        let plain = CheckpointStore::new(Arc::new(bucket.clone()), false);
        plain.save_stack(&stack(), Some(&deployment(2)), None).await.unwrap();

        let zipped = CheckpointStore::new(Arc::new(bucket.clone()), true);
        let path = zipped.save_stack(&stack(), Some(&deployment(2)), None).await.unwrap();
        assert_eq!(path, ".cairn/stacks/dev.json.gz");
        assert!(!bucket.exists(".cairn/stacks/dev.json").await.unwrap());
        assert_eq!(plain.get_checkpoint(&stack()).await.unwrap().resource_count(), 2);

        let backups = bucket.list(".cairn/backups/dev").await.unwrap();
        assert_eq!(backups.len(), 1);
        assert!(backups[0].key.ends_with(".json"));
    }

    #[tokio::test]
    async fn newer_checkpoint_version_rejected() {
        let bucket = MemoryBucket::new();
        bucket
            .write_all(
                ".cairn/stacks/dev.json",
                br#"{"version": 99, "checkpoint": {"stack": "dev"}}"#,
            )
            .await
            .unwrap();
        let store = CheckpointStore::new(Arc::new(bucket), false);
        let err = store.load(&stack()).await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::UnsupportedCheckpointVersion { version: 99, .. }
        ));
    }

    #[tokio::test]
    async fn move_to_backup_removes_live_checkpoint() {
        let bucket = MemoryBucket::new();
        let store = CheckpointStore::new(Arc::new(bucket.clone()), false);
        store.save_stack(&stack(), None, None).await.unwrap();
        store.move_to_backup(&stack()).await.unwrap();
        assert!(!store.exists(&stack()).await.unwrap());
        assert_eq!(bucket.list(".cairn/backups/dev").await.unwrap().len(), 1);
    }
}
