//! # cairn-secrets — Stack Secrets Managers
//!
//! Encrypts and decrypts the secure values in a stack's configuration and
//! state. Three strategies are supported:
//!
//! - **Passphrase**: PBKDF2-derived key, salt recorded in stack settings.
//! - **Cloud**: random data key wrapped by a KMS ([`KeyService`]).
//! - **Service**: a remote secrets service behind [`ServiceClient`].
//!
//! [`resolve_stack_secrets_manager`] chooses the strategy from a stack's
//! settings file and always returns a manager wrapped in the caching
//! decorator, which also batches decrypts through
//! [`Decrypter::bulk_decrypt`].
//!
//! ## Crate Policy
//!
//! - Key material is held in `Zeroizing` buffers and never logged.
//! - Ciphertext decode failures are `MalformedCiphertext`; authentication
//!   failures are `DecryptFailure`.

pub mod caching;
pub mod cloud;
pub mod crypter;
pub mod error;
pub mod manager;
pub mod passphrase;
pub mod provider;
pub mod resolve;
pub mod service;

pub use caching::CachingCrypter;
pub use cloud::{
    new_base64_key_url, Base64KeyService, CloudManager, CloudState, KeyService,
    KeyServiceOpener, KeyServiceRegistry,
};
pub use crypter::{decrypt_config, reencrypt_config, Decrypter, Encrypter, SymmetricCrypter};
pub use error::SecretsError;
pub use manager::{CachingManager, SecretsManager};
pub use passphrase::{
    read_passphrase, EnvPassphrase, PassphraseManager, PassphraseSource, PassphraseState,
    StaticPassphrase,
};
pub use provider::SecretsProvider;
pub use resolve::{
    resolve_stack_secrets_manager, validate_secrets_provider, DefaultSecretsManager,
    SUPPORTED_PROVIDER_KINDS,
};
pub use service::{
    change_project_stack_secret_details, ServiceClient, ServiceClientFactory, ServiceCrypter,
    ServiceManager, ServiceState, StackIdentifier,
};
