//! # cairn-core — Foundational Types for Cairn
//!
//! The leaf crate of the workspace. Every other `cairn-*` crate depends on
//! it; it depends on nothing internal.
//!
//! ## Contents
//!
//! - **Names and URNs** (`tokens.rs`): validated stack/project names and
//!   resource URNs that embed their owning stack and project.
//! - **Documents** (`snapshot.rs`): the versioned checkpoint, deployment,
//!   and export envelope formats.
//! - **Configuration** (`config.rs`): plaintext/secure configuration maps.
//! - **History** (`update.rs`): update records appended after each
//!   operation.
//! - **Settings files** (`project.rs`): `Cairn.yaml` and
//!   `Cairn.<stack>.yaml`, including secrets-provider fields.
//! - **Environment** (`env.rs`): process-wide toggles.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `cairn-*` crates.
//! - No `unsafe` code.
//! - No `.unwrap()` outside tests.

pub mod config;
pub mod env;
pub mod error;
pub mod project;
pub mod snapshot;
pub mod tokens;
pub mod update;

pub use config::{ConfigMap, ConfigValue};
pub use error::{CoreError, NameError};
pub use project::{Project, ProjectStack};
pub use snapshot::{
    Checkpoint, Deployment, Manifest, Resource, SecretsProviderState, UntypedDeployment,
    VersionedCheckpoint, CHECKPOINT_VERSION, DEPLOYMENT_VERSION,
};
pub use tokens::{is_name, Name, Urn};
pub use update::{ResourceChanges, UpdateInfo, UpdateKind, UpdateResult};
