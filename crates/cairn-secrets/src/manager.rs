//! # Secrets Managers
//!
//! The closed set of encryption strategies a stack can use, plus the
//! caching decorator. Every manager exposes the same contract: an
//! encrypter, a decrypter, a type name, and the state persisted into
//! checkpoints so the manager can be rebuilt later.

use std::sync::Arc;

use cairn_core::SecretsProviderState;

use crate::caching::CachingCrypter;
use crate::cloud::{self, CloudManager};
use crate::crypter::{Decrypter, Encrypter};
use crate::passphrase::{self, PassphraseManager};
use crate::service::{self, ServiceManager};

/// A stack's secrets manager.
#[derive(Debug)]
pub enum SecretsManager {
    /// Passphrase-derived key.
    Passphrase(PassphraseManager),
    /// KMS-wrapped data key.
    Cloud(CloudManager),
    /// Remote secrets service.
    Service(ServiceManager),
    /// Caching decorator over another manager.
    Caching(Box<CachingManager>),
}

/// A manager whose crypter is wrapped in a [`CachingCrypter`].
#[derive(Debug)]
pub struct CachingManager {
    inner: SecretsManager,
    crypter: CachingCrypter,
}

impl SecretsManager {
    /// Wrap in the caching decorator. Already-cached managers are returned
    /// unchanged.
    pub fn cached(self) -> Self {
        if matches!(self, Self::Caching(_)) {
            return self;
        }
        let crypter = CachingCrypter::new(self.encrypter(), self.decrypter());
        Self::Caching(Box::new(CachingManager {
            inner: self,
            crypter,
        }))
    }

    /// Type name recorded in checkpoints. The caching decorator reports the
    /// type of the manager it wraps.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Passphrase(_) => passphrase::TYPE,
            Self::Cloud(_) => cloud::TYPE,
            Self::Service(_) => service::TYPE,
            Self::Caching(c) => c.inner.type_name(),
        }
    }

    /// State persisted into checkpoints.
    pub fn state(&self) -> serde_json::Value {
        let state = match self {
            Self::Passphrase(m) => serde_json::to_value(m.state()),
            Self::Cloud(m) => serde_json::to_value(m.state()),
            Self::Service(m) => serde_json::to_value(m.state()),
            Self::Caching(c) => return c.inner.state(),
        };
        // The state types are plain string structs; serialization cannot fail.
        state.unwrap_or(serde_json::Value::Null)
    }

    /// Descriptor embedded in a deployment.
    pub fn provider_state(&self) -> SecretsProviderState {
        SecretsProviderState {
            kind: self.type_name().to_string(),
            state: self.state(),
        }
    }

    /// The manager's encrypter.
    pub fn encrypter(&self) -> Arc<dyn Encrypter> {
        match self {
            Self::Passphrase(m) => m.crypter(),
            Self::Cloud(m) => m.crypter(),
            Self::Service(m) => m.crypter(),
            Self::Caching(c) => Arc::new(c.crypter.clone()),
        }
    }

    /// The manager's decrypter.
    pub fn decrypter(&self) -> Arc<dyn Decrypter> {
        match self {
            Self::Passphrase(m) => m.crypter(),
            Self::Cloud(m) => m.crypter(),
            Self::Service(m) => m.crypter(),
            Self::Caching(c) => Arc::new(c.crypter.clone()),
        }
    }

    /// The undecorated manager.
    pub fn inner(&self) -> &SecretsManager {
        match self {
            Self::Caching(c) => c.inner.inner(),
            other => other,
        }
    }
}
