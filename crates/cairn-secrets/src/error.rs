//! # Secrets Error Types
//!
//! Decoding failures (bad base64, wrong envelope shape) are reported as
//! [`SecretsError::MalformedCiphertext`] and kept apart from
//! [`SecretsError::DecryptFailure`], which means the bytes were well formed
//! but the key could not open them.

use cairn_core::CoreError;
use thiserror::Error;

/// Errors from secrets managers and their resolution.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// The stored value is not a ciphertext this manager can parse.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// The ciphertext parsed but could not be decrypted.
    #[error("failed to decrypt value: {0}")]
    DecryptFailure(String),

    /// Encryption failed.
    #[error("failed to encrypt value: {0}")]
    EncryptFailure(String),

    /// The passphrase does not match the stack's encryption salt.
    #[error("incorrect passphrase")]
    IncorrectPassphrase,

    /// No passphrase could be obtained non-interactively.
    #[error(
        "passphrase must be set with CAIRN_CONFIG_PASSPHRASE or \
         CAIRN_CONFIG_PASSPHRASE_FILE environment variables"
    )]
    PassphraseUnavailable,

    /// A `secretsprovider` kind nobody handles.
    #[error("unknown secrets provider type '{kind}' (supported values: {supported})")]
    UnknownProvider {
        /// The rejected kind.
        kind: String,
        /// Comma-separated supported kinds.
        supported: String,
    },

    /// No key service is registered for the URL scheme.
    #[error("no key service registered for {url}")]
    UnknownKeyScheme {
        /// The secrets provider URL.
        url: String,
    },

    /// A key service (KMS) call failed.
    #[error("key service error: {0}")]
    KeyService(String),

    /// A remote secrets service call failed.
    #[error("secrets service error: {0}")]
    Service(String),

    /// No credentials are available for the secrets service.
    #[error("could not find access token for {url}, have you logged in?")]
    NotLoggedIn {
        /// Service URL.
        url: String,
    },

    /// Persisted manager state could not be interpreted.
    #[error("invalid secrets manager state: {0}")]
    InvalidState(String),

    /// Reading or writing stack settings failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// I/O failure (passphrase file, prompt).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SecretsError {
    /// Whether this error concerns the ciphertext rather than the
    /// environment (keys, credentials, I/O).
    pub fn is_ciphertext_error(&self) -> bool {
        matches!(self, Self::MalformedCiphertext(_) | Self::DecryptFailure(_))
    }
}

impl From<base64::DecodeError> for SecretsError {
    fn from(err: base64::DecodeError) -> Self {
        Self::MalformedCiphertext(err.to_string())
    }
}
