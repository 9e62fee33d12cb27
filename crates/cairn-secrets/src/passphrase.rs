//! # Passphrase Secrets Manager
//!
//! Derives the data key from a user passphrase with PBKDF2-HMAC-SHA256 and
//! encrypts values with [`SymmetricCrypter`].
//!
//! ## Salt state
//!
//! The stack settings file records `encryptionsalt` as
//! `v1:<base64 salt>:<check>`, where `<check>` is a known message sealed
//! with the derived key. Opening the check with a freshly derived key is
//! how a wrong passphrase is detected before any real value is touched.
//!
//! ## Obtaining the passphrase
//!
//! [`EnvPassphrase`] reads `CAIRN_CONFIG_PASSPHRASE`, then the file named by
//! `CAIRN_CONFIG_PASSPHRASE_FILE`, and only then prompts on the terminal
//! without echo. Sources are always asked through [`read_passphrase`], which
//! runs them on the blocking pool.

use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use cairn_core::env::{PASSPHRASE_ENV_VAR, PASSPHRASE_FILE_ENV_VAR};
use cairn_core::ProjectStack;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypter::{SymmetricCrypter, KEY_LEN};
use crate::error::SecretsError;

/// Manager type name recorded in checkpoints.
pub const TYPE: &str = "passphrase";

/// PBKDF2 iteration count.
pub const KDF_ROUNDS: u32 = 100_000;

const SALT_LEN: usize = 8;
const CHECK_MESSAGE: &str = "cairn";

// ─── Passphrase sources ──────────────────────────────────────────────

/// Supplies the passphrase for a stack.
pub trait PassphraseSource: Send + Sync {
    /// Obtain a passphrase. `confirm` is set when a new salt is about to be
    /// created, so an interactive source should ask twice.
    fn passphrase(&self, confirm: bool) -> Result<Zeroizing<String>, SecretsError>;
}

/// Ask `source` for a passphrase on the blocking thread pool.
pub async fn read_passphrase(
    source: Arc<dyn PassphraseSource>,
    confirm: bool,
) -> Result<Zeroizing<String>, SecretsError> {
    tokio::task::spawn_blocking(move || source.passphrase(confirm))
        .await
        .map_err(|e| SecretsError::Io(std::io::Error::other(e.to_string())))?
}

/// A fixed passphrase.
pub struct StaticPassphrase(Zeroizing<String>);

impl StaticPassphrase {
    /// Wrap a passphrase.
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(Zeroizing::new(passphrase.into()))
    }
}

impl PassphraseSource for StaticPassphrase {
    fn passphrase(&self, _confirm: bool) -> Result<Zeroizing<String>, SecretsError> {
        Ok(self.0.clone())
    }
}

/// Environment-first passphrase source with an optional terminal prompt.
#[derive(Debug, Clone, Copy)]
pub struct EnvPassphrase {
    /// Whether prompting on the terminal is allowed.
    pub interactive: bool,
}

impl EnvPassphrase {
    fn from_file(path: &Path) -> Result<Zeroizing<String>, SecretsError> {
        let contents = Zeroizing::new(std::fs::read_to_string(path)?);
        Ok(Zeroizing::new(
            contents.trim_end_matches(['\r', '\n']).to_string(),
        ))
    }

    fn prompt(label: &str) -> Result<Zeroizing<String>, SecretsError> {
        Ok(Zeroizing::new(rpassword::prompt_password(format!("{label}: "))?))
    }
}

impl PassphraseSource for EnvPassphrase {
    fn passphrase(&self, confirm: bool) -> Result<Zeroizing<String>, SecretsError> {
        if let Ok(value) = std::env::var(PASSPHRASE_ENV_VAR) {
            return Ok(Zeroizing::new(value));
        }
        if let Ok(path) = std::env::var(PASSPHRASE_FILE_ENV_VAR) {
            return Self::from_file(Path::new(&path));
        }
        if !self.interactive {
            return Err(SecretsError::PassphraseUnavailable);
        }

        if !confirm {
            return Self::prompt("Enter your passphrase to unlock config/secrets");
        }
        loop {
            let first = Self::prompt("Enter your passphrase to protect config/secrets")?;
            let second = Self::prompt("Re-enter your passphrase to confirm")?;
            if *first == *second {
                return Ok(first);
            }
            eprintln!("error: passphrases do not match");
        }
    }
}

// ─── Manager ─────────────────────────────────────────────────────────

/// Persisted state of a passphrase manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassphraseState {
    /// Salt state, `v1:<salt>:<check>`.
    pub salt: String,
}

/// Passphrase-derived secrets manager.
#[derive(Debug)]
pub struct PassphraseManager {
    state: PassphraseState,
    crypter: std::sync::Arc<SymmetricCrypter>,
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, KDF_ROUNDS, &mut key);
    key
}

impl PassphraseManager {
    /// Create a manager with a fresh random salt.
    pub fn create(passphrase: &str) -> Result<Self, SecretsError> {
        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let crypter = SymmetricCrypter::new(&derive_key(passphrase, &salt))?;
        let check = crypter.seal(CHECK_MESSAGE.as_bytes())?;
        Ok(Self {
            state: PassphraseState {
                salt: format!("v1:{}:{check}", B64.encode(salt)),
            },
            crypter: std::sync::Arc::new(crypter),
        })
    }

    /// Open an existing salt state, verifying the passphrase.
    pub fn open(passphrase: &str, salt_state: &str) -> Result<Self, SecretsError> {
        let mut parts = salt_state.splitn(3, ':');
        let (Some("v1"), Some(salt), Some(check)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(SecretsError::InvalidState(
                "encryption salt must be v1:<salt>:<check>".to_string(),
            ));
        };
        let salt = B64
            .decode(salt)
            .map_err(|e| SecretsError::InvalidState(format!("encryption salt: {e}")))?;
        let crypter = SymmetricCrypter::new(&derive_key(passphrase, &salt))?;
        match crypter.open(check) {
            Ok(msg) if msg == CHECK_MESSAGE.as_bytes() => {}
            Ok(_) | Err(SecretsError::DecryptFailure(_)) => {
                return Err(SecretsError::IncorrectPassphrase)
            }
            Err(e) => return Err(e),
        }
        Ok(Self {
            state: PassphraseState {
                salt: salt_state.to_string(),
            },
            crypter: std::sync::Arc::new(crypter),
        })
    }

    /// Build the manager for a stack from its settings.
    ///
    /// With an existing salt (and no rotation) the passphrase is checked
    /// against it. Otherwise a new salt is generated, every other provider
    /// field is cleared, and the salt is recorded. Returns whether the
    /// settings changed and need saving.
    pub async fn for_project_stack(
        settings: &mut ProjectStack,
        source: Arc<dyn PassphraseSource>,
        rotate: bool,
    ) -> Result<(Self, bool), SecretsError> {
        if !settings.encryption_salt.is_empty() && !rotate {
            let passphrase = read_passphrase(source, false).await?;
            return Ok((Self::open(&passphrase, &settings.encryption_salt)?, false));
        }

        let passphrase = read_passphrase(source, true).await?;
        let manager = Self::create(&passphrase)?;
        settings.clear_secrets_provider();
        settings.encryption_salt = manager.state.salt.clone();
        tracing::debug!("generated new passphrase salt");
        Ok((manager, true))
    }

    /// Rebuild from the state persisted in a checkpoint.
    pub async fn from_state(
        state: &serde_json::Value,
        source: Arc<dyn PassphraseSource>,
    ) -> Result<Self, SecretsError> {
        let state: PassphraseState = serde_json::from_value(state.clone())
            .map_err(|e| SecretsError::InvalidState(e.to_string()))?;
        let passphrase = read_passphrase(source, false).await?;
        Self::open(&passphrase, &state.salt)
    }

    /// Persisted state.
    pub fn state(&self) -> &PassphraseState {
        &self.state
    }

    /// The value crypter.
    pub fn crypter(&self) -> std::sync::Arc<SymmetricCrypter> {
        self.crypter.clone()
    }
}
