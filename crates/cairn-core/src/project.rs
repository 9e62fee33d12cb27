//! # Project and Per-Stack Settings Files
//!
//! A project directory holds `Cairn.yaml` (the [`Project`]) and one
//! `Cairn.<stack>.yaml` per stack (the [`ProjectStack`]). The per-stack
//! file records which secrets provider owns the stack's encrypted
//! configuration:
//!
//! | field             | meaning                                       |
//! |-------------------|-----------------------------------------------|
//! | `secretsprovider` | provider URL (`awskms://...`, `passphrase`)   |
//! | `encryptedkey`    | data key wrapped by a cloud KMS               |
//! | `encryptionsalt`  | passphrase salt state                         |
//!
//! At most one provider's fields may be populated at a time; see
//! [`ProjectStack::clear_secrets_provider`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ConfigMap;
use crate::error::CoreError;
use crate::tokens::Name;

/// Project settings file name.
pub const PROJECT_FILE: &str = "Cairn.yaml";

/// A project definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project name.
    pub name: Name,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Project {
    /// A project with just a name.
    pub fn new(name: Name) -> Self {
        Self {
            name,
            description: None,
        }
    }

    /// Load `Cairn.yaml` from a project directory.
    pub fn load(dir: &Path) -> Result<Self, CoreError> {
        let bytes = std::fs::read(dir.join(PROJECT_FILE))?;
        Ok(serde_yaml::from_slice(&bytes)?)
    }
}

/// Per-stack settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectStack {
    /// Secrets provider URL or kind.
    #[serde(default, rename = "secretsprovider", skip_serializing_if = "String::is_empty")]
    pub secrets_provider: String,
    /// KMS-wrapped data key, base64.
    #[serde(default, rename = "encryptedkey", skip_serializing_if = "String::is_empty")]
    pub encrypted_key: String,
    /// Passphrase salt state.
    #[serde(default, rename = "encryptionsalt", skip_serializing_if = "String::is_empty")]
    pub encryption_salt: String,
    /// Stack configuration.
    #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
    pub config: ConfigMap,
}

impl ProjectStack {
    /// Path of the settings file for `stack` inside `project_dir`.
    pub fn path_for(project_dir: &Path, stack: &str) -> PathBuf {
        project_dir.join(format!("Cairn.{stack}.yaml"))
    }

    /// Load a settings file. A missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        match std::fs::read(path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Self::default()),
            Ok(bytes) => Ok(serde_yaml::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the settings file, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Clear every field owned by the current secrets provider.
    ///
    /// Returns `true` if anything changed and the file needs saving.
    pub fn clear_secrets_provider(&mut self) -> bool {
        let mut changed = false;
        for field in [
            &mut self.secrets_provider,
            &mut self.encrypted_key,
            &mut self.encryption_salt,
        ] {
            if !field.is_empty() {
                field.clear();
                changed = true;
            }
        }
        changed
    }
}
