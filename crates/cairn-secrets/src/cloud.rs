//! # Cloud-KMS Secrets Manager
//!
//! Values are encrypted with a random 32-byte data key. The data key is
//! wrapped by a [`KeyService`] (a KMS) and the wrapped form is stored as
//! `encryptedkey` next to the provider URL in the stack settings.
//!
//! Key services are chosen by URL scheme through a [`KeyServiceRegistry`].
//! `base64key://<base64 master key>` is built in and wraps locally with
//! AES-256-GCM; real KMS schemes (`awskms://`, `gcpkms://`,
//! `azurekeyvault://`, `hashivault://`) are registered by the embedding
//! application.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use cairn_core::ProjectStack;
use serde::{Deserialize, Serialize};

use crate::crypter::SymmetricCrypter;
use crate::error::SecretsError;

/// Manager type name recorded in checkpoints.
pub const TYPE: &str = "cloud";

/// Scheme of the built-in local key service.
pub const BASE64_KEY_SCHEME: &str = "base64key";

/// Wraps and unwraps data keys.
#[async_trait]
pub trait KeyService: Send + Sync {
    /// Encrypt a data key.
    async fn wrap_key(&self, key: &[u8]) -> Result<Vec<u8>, SecretsError>;

    /// Decrypt a wrapped data key.
    async fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, SecretsError>;
}

/// Builds a [`KeyService`] for a provider URL.
pub trait KeyServiceOpener: Send + Sync {
    /// Open the key service named by `url`.
    fn open(&self, url: &str) -> Result<Arc<dyn KeyService>, SecretsError>;
}

// ─── base64key:// ────────────────────────────────────────────────────

/// Local key service whose master key is embedded in the URL.
pub struct Base64KeyService {
    master: SymmetricCrypter,
}

impl Base64KeyService {
    /// Parse `base64key://<base64 32-byte key>`.
    pub fn from_url(url: &str) -> Result<Self, SecretsError> {
        let encoded = url
            .strip_prefix(BASE64_KEY_SCHEME)
            .and_then(|rest| rest.strip_prefix("://"))
            .ok_or_else(|| SecretsError::UnknownKeyScheme {
                url: url.to_string(),
            })?;
        let key = B64
            .decode(encoded)
            .map_err(|e| SecretsError::KeyService(format!("invalid base64 master key: {e}")))?;
        Ok(Self {
            master: SymmetricCrypter::new(&key)?,
        })
    }
}

#[async_trait]
impl KeyService for Base64KeyService {
    async fn wrap_key(&self, key: &[u8]) -> Result<Vec<u8>, SecretsError> {
        Ok(self.master.seal(key)?.into_bytes())
    }

    async fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, SecretsError> {
        let envelope = std::str::from_utf8(wrapped)
            .map_err(|e| SecretsError::MalformedCiphertext(e.to_string()))?;
        self.master.open(envelope)
    }
}

struct Base64KeyOpener;

impl KeyServiceOpener for Base64KeyOpener {
    fn open(&self, url: &str) -> Result<Arc<dyn KeyService>, SecretsError> {
        Ok(Arc::new(Base64KeyService::from_url(url)?))
    }
}

/// Scheme-to-key-service registry.
#[derive(Clone)]
pub struct KeyServiceRegistry {
    openers: BTreeMap<String, Arc<dyn KeyServiceOpener>>,
}

impl Default for KeyServiceRegistry {
    fn default() -> Self {
        let mut openers: BTreeMap<String, Arc<dyn KeyServiceOpener>> = BTreeMap::new();
        openers.insert(BASE64_KEY_SCHEME.to_string(), Arc::new(Base64KeyOpener));
        Self { openers }
    }
}

impl std::fmt::Debug for KeyServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyServiceRegistry")
            .field("schemes", &self.openers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl KeyServiceRegistry {
    /// Registry with only `base64key://`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the opener for `scheme`.
    pub fn register(&mut self, scheme: &str, opener: Arc<dyn KeyServiceOpener>) {
        self.openers.insert(scheme.to_string(), opener);
    }

    /// Open the key service for `url`.
    pub fn open(&self, url: &str) -> Result<Arc<dyn KeyService>, SecretsError> {
        let scheme = url.split_once("://").map(|(s, _)| s).unwrap_or_default();
        self.openers
            .get(scheme)
            .ok_or_else(|| SecretsError::UnknownKeyScheme {
                url: url.to_string(),
            })?
            .open(url)
    }
}

// ─── Manager ─────────────────────────────────────────────────────────

/// Persisted state of a cloud manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudState {
    /// Secrets provider URL.
    pub url: String,
    /// Wrapped data key, base64.
    #[serde(rename = "encryptedkey")]
    pub encrypted_key: String,
}

/// KMS-backed secrets manager.
#[derive(Debug)]
pub struct CloudManager {
    state: CloudState,
    crypter: Arc<SymmetricCrypter>,
}

impl CloudManager {
    /// Generate a new data key and wrap it with the service at `url`.
    pub async fn create(keys: &KeyServiceRegistry, url: &str) -> Result<Self, SecretsError> {
        let service = keys.open(url)?;
        let data_key = SymmetricCrypter::generate_key();
        let wrapped = service.wrap_key(&data_key).await?;
        Ok(Self {
            state: CloudState {
                url: url.to_string(),
                encrypted_key: B64.encode(wrapped),
            },
            crypter: Arc::new(SymmetricCrypter::new(&data_key)?),
        })
    }

    /// Unwrap an existing data key.
    pub async fn open(keys: &KeyServiceRegistry, state: CloudState) -> Result<Self, SecretsError> {
        let service = keys.open(&state.url)?;
        let wrapped = B64.decode(&state.encrypted_key)?;
        let data_key = zeroize::Zeroizing::new(service.unwrap_key(&wrapped).await?);
        Ok(Self {
            crypter: Arc::new(SymmetricCrypter::new(&data_key)?),
            state,
        })
    }

    /// Build the manager for a stack from its settings.
    ///
    /// The recorded key is reused when the recorded provider matches `url`
    /// and no rotation is requested. Otherwise a new key is generated and
    /// every other provider field is cleared. Returns whether the settings
    /// changed and need saving.
    pub async fn for_project_stack(
        keys: &KeyServiceRegistry,
        url: &str,
        settings: &mut ProjectStack,
        rotate: bool,
    ) -> Result<(Self, bool), SecretsError> {
        if settings.secrets_provider == url && !settings.encrypted_key.is_empty() && !rotate {
            let state = CloudState {
                url: url.to_string(),
                encrypted_key: settings.encrypted_key.clone(),
            };
            return Ok((Self::open(keys, state).await?, false));
        }

        let manager = Self::create(keys, url).await?;
        settings.clear_secrets_provider();
        settings.secrets_provider = url.to_string();
        settings.encrypted_key = manager.state.encrypted_key.clone();
        tracing::debug!(provider = %url, "generated new data key");
        Ok((manager, true))
    }

    /// Rebuild from the state persisted in a checkpoint.
    pub async fn from_state(
        keys: &KeyServiceRegistry,
        state: &serde_json::Value,
    ) -> Result<Self, SecretsError> {
        let state: CloudState = serde_json::from_value(state.clone())
            .map_err(|e| SecretsError::InvalidState(e.to_string()))?;
        Self::open(keys, state).await
    }

    /// Persisted state.
    pub fn state(&self) -> &CloudState {
        &self.state
    }

    /// The value crypter.
    pub fn crypter(&self) -> Arc<SymmetricCrypter> {
        self.crypter.clone()
    }
}

/// A fresh `base64key://` URL with a random master key.
pub fn new_base64_key_url() -> String {
    format!(
        "{BASE64_KEY_SCHEME}://{}",
        B64.encode(SymmetricCrypter::generate_key().as_slice())
    )
}
