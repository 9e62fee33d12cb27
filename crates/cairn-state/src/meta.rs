//! Layout manifest: `.cairn/meta.yaml`, a YAML document `{version: N}`.
//!
//! An absent manifest means version 0 (legacy layout) and is not created
//! implicitly; only layout migration writes it.

use cairn_storage::Bucket;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::reference::ReferenceStore;

/// Manifest key.
pub const META_PATH: &str = ".cairn/meta.yaml";

/// The layout manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutManifest {
    /// Layout version.
    #[serde(default)]
    pub version: u32,
}

impl LayoutManifest {
    /// Read the manifest; absent means version 0.
    pub async fn read(bucket: &dyn Bucket) -> Result<Self, BackendError> {
        match bucket.read_all(META_PATH).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Self::default()),
            Ok(bytes) => Ok(serde_yaml::from_slice(&bytes)?),
            Err(e) if e.is_not_found() => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the manifest.
    pub async fn write(&self, bucket: &dyn Bucket) -> Result<(), BackendError> {
        let yaml = serde_yaml::to_string(self)?;
        bucket
            .write_all(META_PATH, yaml.as_bytes())
            .await
            .map_err(|e| BackendError::from(e).context(format!("could not write '{META_PATH}'")))
    }

    /// The layout this manifest selects.
    pub fn store(&self) -> Result<ReferenceStore, BackendError> {
        ReferenceStore::for_version(self.version)
    }
}
