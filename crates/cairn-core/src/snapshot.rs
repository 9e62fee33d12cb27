//! # Checkpoint and Deployment Documents
//!
//! The persisted form of a stack's state:
//!
//! ```text
//! VersionedCheckpoint { version, checkpoint: Checkpoint }
//!   Checkpoint { stack, config, latest: Option<Deployment> }
//!     Deployment { manifest, secrets_providers, resources: [Resource] }
//! ```
//!
//! `latest` is `None` for a stack that was created but never deployed.
//! [`UntypedDeployment`] is the interchange envelope used by export and
//! import; its payload stays an opaque JSON value so that documents from
//! newer tools survive a round trip.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ConfigMap;
use crate::error::{CoreError, NameError};
use crate::tokens::Urn;

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 3;

/// Current deployment format version, used by the export envelope.
pub const DEPLOYMENT_VERSION: u32 = 3;

/// Magic string written into every deployment manifest.
pub const MANIFEST_MAGIC: &str = "cairn";

/// One resource in a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource URN.
    pub urn: Urn,
    /// Whether the resource is managed by a provider (vs. a component).
    #[serde(default)]
    pub custom: bool,
    /// Provider-assigned identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Resource type token.
    #[serde(rename = "type")]
    pub type_token: String,
    /// Input properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, Value>,
    /// Output properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Value>,
    /// Parent resource, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Urn>,
    /// Resources this one depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Urn>,
    /// Whether deletion is blocked.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub protect: bool,
}

impl Resource {
    /// A minimal custom resource.
    pub fn new(urn: Urn, type_token: impl Into<String>) -> Self {
        Self {
            urn,
            custom: true,
            id: None,
            type_token: type_token.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            parent: None,
            dependencies: Vec::new(),
            protect: false,
        }
    }
}

/// Deployment manifest header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// When the deployment was produced.
    pub time: DateTime<Utc>,
    /// Producer marker.
    pub magic: String,
    /// Producer version string.
    pub version: String,
}

impl Manifest {
    /// A manifest stamped with the current time.
    pub fn now() -> Self {
        Self {
            time: Utc::now(),
            magic: MANIFEST_MAGIC.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Persisted descriptor of the secrets manager that encrypted a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretsProviderState {
    /// Manager type (`passphrase`, `cloud`, `service`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Manager-specific state.
    #[serde(default)]
    pub state: Value,
}

/// A deployment snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Producer manifest.
    pub manifest: Manifest,
    /// Secrets manager descriptor, if any secret values were encrypted.
    #[serde(
        default,
        rename = "secrets_providers",
        skip_serializing_if = "Option::is_none"
    )]
    pub secrets_providers: Option<SecretsProviderState>,
    /// Resources in dependency order.
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Deployment {
    /// An empty deployment.
    pub fn empty() -> Self {
        Self {
            manifest: Manifest::now(),
            secrets_providers: None,
            resources: Vec::new(),
        }
    }

    /// The project that owns this deployment, inferred from the first
    /// resource URN that carries one.
    pub fn infer_project(&self) -> Option<&str> {
        self.resources
            .iter()
            .find_map(|r| r.urn.project().filter(|p| !p.is_empty()))
    }

    /// Rewrite every URN in the deployment to belong to `stack` (and
    /// `project`, when given). Parent and dependency links are rewritten
    /// along with the resources they point at.
    pub fn rename_stack(&mut self, stack: &str, project: Option<&str>) -> Result<(), NameError> {
        for resource in &mut self.resources {
            resource.urn = resource.urn.rename_stack(stack, project)?;
            if let Some(parent) = &resource.parent {
                resource.parent = Some(parent.rename_stack(stack, project)?);
            }
            for dep in &mut resource.dependencies {
                *dep = dep.rename_stack(stack, project)?;
            }
        }
        Ok(())
    }
}

/// A stack checkpoint: configuration plus the latest deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Fully qualified stack name at the time of writing.
    pub stack: String,
    /// Configuration used for the latest deployment.
    #[serde(default)]
    pub config: ConfigMap,
    /// Latest deployment; `None` for a stack that has never been deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<Deployment>,
}

impl Checkpoint {
    /// Number of resources in the latest deployment.
    pub fn resource_count(&self) -> usize {
        self.latest.as_ref().map_or(0, |d| d.resources.len())
    }
}

/// The on-disk checkpoint envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedCheckpoint {
    /// Format version.
    pub version: u32,
    /// The checkpoint.
    pub checkpoint: Checkpoint,
}

impl VersionedCheckpoint {
    /// Wrap a checkpoint at the current format version.
    pub fn new(checkpoint: Checkpoint) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            checkpoint,
        }
    }
}

/// Deployment interchange envelope used by export and import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UntypedDeployment {
    /// Deployment format version.
    pub version: u32,
    /// Deployment payload.
    pub deployment: Value,
}

impl UntypedDeployment {
    /// Wrap a typed deployment.
    pub fn from_deployment(deployment: &Deployment) -> Result<Self, CoreError> {
        Ok(Self {
            version: DEPLOYMENT_VERSION,
            deployment: serde_json::to_value(deployment)?,
        })
    }

    /// Unwrap into a checkpoint for `stack`, rejecting unknown versions.
    pub fn into_checkpoint(self, stack: &str, config: ConfigMap) -> Result<Checkpoint, CoreError> {
        if self.version == 0 || self.version > DEPLOYMENT_VERSION {
            return Err(CoreError::UnsupportedDeploymentVersion(self.version));
        }
        let deployment: Deployment = serde_json::from_value(self.deployment)?;
        Ok(Checkpoint {
            stack: stack.to_string(),
            config,
            latest: Some(deployment),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValue;

    fn sample() -> Deployment {
        let parent = Resource::new(Urn::new("dev", "infra", "pkg:Stack", "root"), "pkg:Stack");
        let mut child = Resource::new(Urn::new("dev", "infra", "pkg:Bucket", "logs"), "pkg:Bucket");
        child.parent = Some(parent.urn.clone());
        child.dependencies.push(parent.urn.clone());
        Deployment {
            manifest: Manifest::now(),
            secrets_providers: None,
            resources: vec![parent, child],
        }
    }

    #[test]
    fn infer_project_uses_first_urn() {
        assert_eq!(sample().infer_project(), Some("infra"));
        assert_eq!(Deployment::empty().infer_project(), None);
    }

    #[test]
    fn rename_rewrites_links() {
        let mut dep = sample();
        dep.rename_stack("prod", None).unwrap();
        for r in &dep.resources {
            assert_eq!(r.urn.stack(), Some("prod"));
        }
        assert_eq!(dep.resources[1].parent.as_ref().unwrap().stack(), Some("prod"));
        assert_eq!(dep.resources[1].dependencies[0].stack(), Some("prod"));
    }

    #[test]
    fn checkpoint_roundtrip() {
        let mut config = ConfigMap::new();
        config.insert("infra:size", ConfigValue::plain("large"));
        let chk = VersionedCheckpoint::new(Checkpoint {
            stack: "dev".into(),
            config,
            latest: Some(sample()),
        });
        let bytes = serde_json::to_vec(&chk).unwrap();
        let back: VersionedCheckpoint = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, chk);
        assert_eq!(back.checkpoint.resource_count(), 2);
    }

    #[test]
    fn untyped_deployment_rejects_future_version() {
        let env = UntypedDeployment {
            version: DEPLOYMENT_VERSION + 1,
            deployment: serde_json::to_value(sample()).unwrap(),
        };
        assert!(env.into_checkpoint("dev", ConfigMap::new()).is_err());
    }

    #[test]
    fn untyped_deployment_roundtrip() {
        let dep = sample();
        let env = UntypedDeployment::from_deployment(&dep).unwrap();
        let chk = env.into_checkpoint("dev", ConfigMap::new()).unwrap();
        assert_eq!(chk.latest, Some(dep));
    }
}
