//! # Stack Secrets Manager Resolution
//!
//! Picks a stack's secrets manager from its settings file, in order:
//!
//! 1. `secretsprovider` set to anything other than `""`, `default` or
//!    `passphrase`: the cloud manager for that URL, using the recorded
//!    `encryptedkey`.
//! 2. `encryptionsalt` set: the passphrase manager, checking the
//!    passphrase against the salt.
//! 3. Otherwise the backend's default manager.
//!
//! The result is always wrapped in the caching decorator. When resolution
//! rewrites provider fields (a first-time key or salt), the settings file
//! is saved.

use std::path::Path;

use async_trait::async_trait;
use cairn_core::ProjectStack;

use crate::cloud::CloudManager;
use crate::error::SecretsError;
use crate::manager::SecretsManager;
use crate::passphrase::PassphraseManager;
use crate::provider::SecretsProvider;

/// Provider kinds accepted in `secretsprovider`, compared against the text
/// before the first `:`.
pub const SUPPORTED_PROVIDER_KINDS: &[&str] = &[
    "default",
    "passphrase",
    "awskms",
    "azurekeyvault",
    "gcpkms",
    "hashivault",
    "base64key",
];

/// Reject a `secretsprovider` value whose kind is not supported.
pub fn validate_secrets_provider(typ: &str) -> Result<(), SecretsError> {
    let kind = typ.split(':').next().unwrap_or_default();
    if SUPPORTED_PROVIDER_KINDS.contains(&kind) {
        return Ok(());
    }
    Err(SecretsError::UnknownProvider {
        kind: kind.to_string(),
        supported: SUPPORTED_PROVIDER_KINDS.join(","),
    })
}

/// The manager a backend uses when a stack's settings name none.
#[async_trait]
pub trait DefaultSecretsManager: Send + Sync {
    /// Build the default manager, updating `settings` with whatever it
    /// needs persisted. Returns whether `settings` changed.
    async fn default_secrets_manager(
        &self,
        settings: &mut ProjectStack,
    ) -> Result<(SecretsManager, bool), SecretsError>;
}

/// Passphrase-based default: creates a salt on first use.
#[async_trait]
impl DefaultSecretsManager for SecretsProvider {
    async fn default_secrets_manager(
        &self,
        settings: &mut ProjectStack,
    ) -> Result<(SecretsManager, bool), SecretsError> {
        let (manager, changed) =
            PassphraseManager::for_project_stack(settings, self.passphrase(), false).await?;
        Ok((SecretsManager::Passphrase(manager), changed))
    }
}

fn is_cloud_provider(provider: &str) -> bool {
    !matches!(provider, "" | "default" | "passphrase")
}

/// Resolve the secrets manager for the stack whose settings live at
/// `settings_path`.
pub async fn resolve_stack_secrets_manager(
    settings_path: &Path,
    provider: &SecretsProvider,
    default: &dyn DefaultSecretsManager,
) -> Result<SecretsManager, SecretsError> {
    let mut settings = ProjectStack::load(settings_path)?;

    let (manager, changed) = if is_cloud_provider(&settings.secrets_provider) {
        validate_secrets_provider(&settings.secrets_provider)?;
        let url = settings.secrets_provider.clone();
        let (m, changed) =
            CloudManager::for_project_stack(provider.keys(), &url, &mut settings, false).await?;
        (SecretsManager::Cloud(m), changed)
    } else if !settings.encryption_salt.is_empty() {
        let (m, changed) =
            PassphraseManager::for_project_stack(&mut settings, provider.passphrase(), false)
                .await?;
        (SecretsManager::Passphrase(m), changed)
    } else {
        default.default_secrets_manager(&mut settings).await?
    };

    if changed {
        settings.save(settings_path)?;
        tracing::debug!(
            path = %settings_path.display(),
            kind = manager.type_name(),
            "saved secrets provider settings"
        );
    }
    Ok(manager.cached())
}
