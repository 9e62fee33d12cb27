//! Rebuilds secrets managers from the descriptors persisted in checkpoints.

use std::sync::Arc;

use cairn_core::SecretsProviderState;

use crate::cloud::{self, CloudManager, KeyServiceRegistry};
use crate::error::SecretsError;
use crate::manager::SecretsManager;
use crate::passphrase::{self, EnvPassphrase, PassphraseManager, PassphraseSource};
use crate::service::{self, ServiceClientFactory, ServiceManager};

/// Everything needed to construct any secrets manager: key services,
/// a passphrase source, and optionally a secrets-service client factory.
#[derive(Clone)]
pub struct SecretsProvider {
    keys: KeyServiceRegistry,
    passphrase: Arc<dyn PassphraseSource>,
    service: Option<Arc<dyn ServiceClientFactory>>,
}

impl std::fmt::Debug for SecretsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsProvider")
            .field("keys", &self.keys)
            .field("service", &self.service.is_some())
            .finish()
    }
}

impl Default for SecretsProvider {
    fn default() -> Self {
        Self::new(
            KeyServiceRegistry::default(),
            Arc::new(EnvPassphrase { interactive: false }),
        )
    }
}

impl SecretsProvider {
    /// A provider without secrets-service support.
    pub fn new(keys: KeyServiceRegistry, passphrase: Arc<dyn PassphraseSource>) -> Self {
        Self {
            keys,
            passphrase,
            service: None,
        }
    }

    /// Enable the remote-service manager.
    pub fn with_service(mut self, factory: Arc<dyn ServiceClientFactory>) -> Self {
        self.service = Some(factory);
        self
    }

    /// Key service registry.
    pub fn keys(&self) -> &KeyServiceRegistry {
        &self.keys
    }

    /// Passphrase source.
    pub fn passphrase(&self) -> Arc<dyn PassphraseSource> {
        self.passphrase.clone()
    }

    /// Rebuild the manager described by `desc`, wrapped in the caching
    /// decorator.
    pub async fn of_state(&self, desc: &SecretsProviderState) -> Result<SecretsManager, SecretsError> {
        let manager = match desc.kind.as_str() {
            passphrase::TYPE => SecretsManager::Passphrase(PassphraseManager::from_state(
                &desc.state,
                self.passphrase(),
            )
            .await?),
            cloud::TYPE => {
                SecretsManager::Cloud(CloudManager::from_state(&self.keys, &desc.state).await?)
            }
            service::TYPE => {
                let factory = self.service.as_deref().ok_or_else(|| SecretsError::UnknownProvider {
                    kind: desc.kind.clone(),
                    supported: format!("{}, {}", passphrase::TYPE, cloud::TYPE),
                })?;
                SecretsManager::Service(ServiceManager::from_state(factory, &desc.state)?)
            }
            other => {
                return Err(SecretsError::UnknownProvider {
                    kind: other.to_string(),
                    supported: [passphrase::TYPE, cloud::TYPE, service::TYPE].join(", "),
                })
            }
        };
        Ok(manager.cached())
    }
}
