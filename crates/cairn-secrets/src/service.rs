//! # Remote-Service Secrets Manager
//!
//! Delegates encryption to a remote secrets service reached through an
//! injected [`ServiceClient`]. Ciphertexts returned by the service are raw
//! bytes and are stored base64-encoded; a value that is not valid base64 is
//! [`SecretsError::MalformedCiphertext`] and never reaches the service.
//!
//! Bulk decryption sends every ciphertext in one request and returns a map
//! keyed by the stored (base64) form of each input.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use cairn_core::ProjectStack;
use serde::{Deserialize, Serialize};

use crate::crypter::{Decrypter, Encrypter};
use crate::error::SecretsError;

/// Manager type name recorded in checkpoints.
pub const TYPE: &str = "service";

/// Identifies a stack to the secrets service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackIdentifier {
    /// Owning organization or user.
    pub owner: String,
    /// Project name.
    pub project: String,
    /// Stack name.
    pub stack: String,
}

/// Client for the remote secrets service.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Base URL of the service.
    fn url(&self) -> String;

    /// Encrypt one value.
    async fn encrypt_value(
        &self,
        stack: &StackIdentifier,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, SecretsError>;

    /// Decrypt one value.
    async fn decrypt_value(
        &self,
        stack: &StackIdentifier,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SecretsError>;

    /// Decrypt many values in one request. The result is keyed by the
    /// base64 encoding of each input ciphertext.
    async fn bulk_decrypt_value(
        &self,
        stack: &StackIdentifier,
        ciphertexts: &[Vec<u8>],
    ) -> Result<HashMap<String, Vec<u8>>, SecretsError>;
}

/// Produces authenticated clients for persisted service state.
pub trait ServiceClientFactory: Send + Sync {
    /// A client for the service at `url`, or [`SecretsError::NotLoggedIn`]
    /// when no credentials are available.
    fn client(&self, url: &str) -> Result<Arc<dyn ServiceClient>, SecretsError>;
}

// ─── Crypter ─────────────────────────────────────────────────────────

/// Encrypter/decrypter that calls the service.
pub struct ServiceCrypter {
    client: Arc<dyn ServiceClient>,
    stack: StackIdentifier,
}

impl ServiceCrypter {
    /// Crypter for `stack`.
    pub fn new(client: Arc<dyn ServiceClient>, stack: StackIdentifier) -> Self {
        Self { client, stack }
    }
}

#[async_trait]
impl Encrypter for ServiceCrypter {
    async fn encrypt_value(&self, plaintext: &str) -> Result<String, SecretsError> {
        let ct = self
            .client
            .encrypt_value(&self.stack, plaintext.as_bytes())
            .await?;
        Ok(B64.encode(ct))
    }
}

#[async_trait]
impl Decrypter for ServiceCrypter {
    async fn decrypt_value(&self, ciphertext: &str) -> Result<String, SecretsError> {
        let ct = B64.decode(ciphertext)?;
        let pt = self.client.decrypt_value(&self.stack, &ct).await?;
        String::from_utf8(pt).map_err(|e| SecretsError::DecryptFailure(e.to_string()))
    }

    async fn bulk_decrypt(
        &self,
        ciphertexts: &[String],
    ) -> Result<HashMap<String, String>, SecretsError> {
        let decoded = ciphertexts
            .iter()
            .map(|ct| B64.decode(ct))
            .collect::<Result<Vec<_>, _>>()?;
        let decrypted = self
            .client
            .bulk_decrypt_value(&self.stack, &decoded)
            .await?;

        let mut out = HashMap::with_capacity(decrypted.len());
        for (ct, pt) in decrypted {
            let pt =
                String::from_utf8(pt).map_err(|e| SecretsError::DecryptFailure(e.to_string()))?;
            out.insert(ct, pt);
        }
        Ok(out)
    }
}

// ─── Manager ─────────────────────────────────────────────────────────

/// Persisted state of a service manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    /// Service URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Owning organization or user.
    pub owner: String,
    /// Project name.
    pub project: String,
    /// Stack name.
    pub stack: String,
}

/// Remote-service secrets manager.
pub struct ServiceManager {
    state: ServiceState,
    crypter: Arc<ServiceCrypter>,
}

impl std::fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManager")
            .field("state", &self.state)
            .finish()
    }
}

impl ServiceManager {
    /// Build the manager for a stack whose settings live at `settings_path`.
    ///
    /// Any remnants of a previous provider (`secretsprovider`,
    /// `encryptedkey`, `encryptionsalt`) are cleared, and the settings file
    /// is rewritten only if one of them was set.
    pub fn for_stack(
        client: Arc<dyn ServiceClient>,
        id: StackIdentifier,
        settings_path: &Path,
    ) -> Result<Self, SecretsError> {
        let mut settings = ProjectStack::load(settings_path)?;
        if change_project_stack_secret_details(&mut settings) {
            settings.save(settings_path)?;
            tracing::info!(
                path = %settings_path.display(),
                "cleared previous secrets provider settings"
            );
        }
        Ok(Self::new(client, id))
    }

    /// Manager for `id` without touching any settings file.
    pub fn new(client: Arc<dyn ServiceClient>, id: StackIdentifier) -> Self {
        Self {
            state: ServiceState {
                url: client.url(),
                owner: id.owner.clone(),
                project: id.project.clone(),
                stack: id.stack.clone(),
            },
            crypter: Arc::new(ServiceCrypter::new(client, id)),
        }
    }

    /// Rebuild from the state persisted in a checkpoint.
    pub fn from_state(
        factory: &dyn ServiceClientFactory,
        state: &serde_json::Value,
    ) -> Result<Self, SecretsError> {
        let state: ServiceState = serde_json::from_value(state.clone())
            .map_err(|e| SecretsError::InvalidState(format!("unmarshalling state: {e}")))?;
        let client = factory.client(&state.url)?;
        let id = StackIdentifier {
            owner: state.owner.clone(),
            project: state.project.clone(),
            stack: state.stack.clone(),
        };
        Ok(Self {
            crypter: Arc::new(ServiceCrypter::new(client, id)),
            state,
        })
    }

    /// Persisted state.
    pub fn state(&self) -> &ServiceState {
        &self.state
    }

    /// The value crypter.
    pub fn crypter(&self) -> Arc<ServiceCrypter> {
        self.crypter.clone()
    }
}

/// Clear every field a previous secrets provider left in `settings`.
/// Returns whether anything changed.
pub fn change_project_stack_secret_details(settings: &mut ProjectStack) -> bool {
    settings.clear_secrets_provider()
}
