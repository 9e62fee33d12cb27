//! # Encrypters and Decrypters
//!
//! The value-level contract every secrets manager exposes, plus the
//! AES-256-GCM [`SymmetricCrypter`] that the passphrase and cloud managers
//! share once they hold a data key.
//!
//! ## Ciphertext format
//!
//! `v1:<base64 nonce>:<base64 ciphertext>`, with a fresh 96-bit nonce per
//! value. Anything else is [`SecretsError::MalformedCiphertext`].

use std::collections::{BTreeMap, HashMap};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use cairn_core::{ConfigMap, ConfigValue};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::SecretsError;

/// Length of a data key in bytes.
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const VERSION_PREFIX: &str = "v1";

/// Turns plaintext into a persisted ciphertext string.
#[async_trait]
pub trait Encrypter: Send + Sync {
    /// Encrypt one value.
    async fn encrypt_value(&self, plaintext: &str) -> Result<String, SecretsError>;
}

/// Turns persisted ciphertext strings back into plaintext.
#[async_trait]
pub trait Decrypter: Send + Sync {
    /// Decrypt one value.
    async fn decrypt_value(&self, ciphertext: &str) -> Result<String, SecretsError>;

    /// Decrypt many values, keyed by input ciphertext.
    ///
    /// The default decrypts one at a time; managers backed by a remote
    /// service override it with a single round trip.
    async fn bulk_decrypt(
        &self,
        ciphertexts: &[String],
    ) -> Result<HashMap<String, String>, SecretsError> {
        let mut out = HashMap::with_capacity(ciphertexts.len());
        for ct in ciphertexts {
            if out.contains_key(ct) {
                continue;
            }
            let pt = self.decrypt_value(ct).await?;
            out.insert(ct.clone(), pt);
        }
        Ok(out)
    }
}

// ─── Symmetric crypter ───────────────────────────────────────────────

/// AES-256-GCM crypter over a 32-byte data key.
pub struct SymmetricCrypter {
    key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for SymmetricCrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricCrypter(..)")
    }
}

impl SymmetricCrypter {
    /// Build a crypter from a data key, which must be [`KEY_LEN`] bytes.
    pub fn new(key: &[u8]) -> Result<Self, SecretsError> {
        if key.len() != KEY_LEN {
            return Err(SecretsError::InvalidState(format!(
                "data key must be {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
        })
    }

    /// Generate a random data key.
    pub fn generate_key() -> Zeroizing<Vec<u8>> {
        let mut key = Zeroizing::new(vec![0u8; KEY_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut key);
        key
    }

    fn cipher(&self) -> Result<Aes256Gcm, SecretsError> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| SecretsError::InvalidState(format!("invalid data key: {e}")))
    }

    /// Encrypt raw bytes into the `v1:` envelope.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, SecretsError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ct = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| SecretsError::EncryptFailure(e.to_string()))?;
        Ok(format!(
            "{VERSION_PREFIX}:{}:{}",
            B64.encode(nonce),
            B64.encode(ct)
        ))
    }

    /// Open a `v1:` envelope into raw bytes.
    pub fn open(&self, ciphertext: &str) -> Result<Vec<u8>, SecretsError> {
        let mut parts = ciphertext.splitn(3, ':');
        let (Some(VERSION_PREFIX), Some(nonce), Some(ct)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(SecretsError::MalformedCiphertext(
                "expected v1:<nonce>:<ciphertext>".to_string(),
            ));
        };
        let nonce = B64.decode(nonce)?;
        if nonce.len() != NONCE_LEN {
            return Err(SecretsError::MalformedCiphertext(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                nonce.len()
            )));
        }
        let ct = B64.decode(ct)?;
        self.cipher()?
            .decrypt(Nonce::from_slice(&nonce), ct.as_slice())
            .map_err(|_| SecretsError::DecryptFailure("message authentication failed".to_string()))
    }
}

#[async_trait]
impl Encrypter for SymmetricCrypter {
    async fn encrypt_value(&self, plaintext: &str) -> Result<String, SecretsError> {
        self.seal(plaintext.as_bytes())
    }
}

#[async_trait]
impl Decrypter for SymmetricCrypter {
    async fn decrypt_value(&self, ciphertext: &str) -> Result<String, SecretsError> {
        let bytes = self.open(ciphertext)?;
        String::from_utf8(bytes).map_err(|e| SecretsError::DecryptFailure(e.to_string()))
    }
}

// ─── Configuration helpers ───────────────────────────────────────────

/// Decrypt every secure value in `config` with a single bulk call and
/// return the full plaintext map.
pub async fn decrypt_config(
    config: &ConfigMap,
    decrypter: &dyn Decrypter,
) -> Result<BTreeMap<String, String>, SecretsError> {
    let ciphertexts: Vec<String> = config
        .secure_values()
        .map(|(_, ct)| ct.to_string())
        .collect();
    let plaintexts = if ciphertexts.is_empty() {
        HashMap::new()
    } else {
        decrypter.bulk_decrypt(&ciphertexts).await?
    };

    let mut out = BTreeMap::new();
    for (key, value) in config.iter() {
        let plain = match value {
            ConfigValue::Plain(v) => v.clone(),
            ConfigValue::Secure { secure } => plaintexts
                .get(secure)
                .cloned()
                .ok_or_else(|| {
                    SecretsError::DecryptFailure(format!("no plaintext returned for {key}"))
                })?,
        };
        out.insert(key.clone(), plain);
    }
    Ok(out)
}

/// Re-encrypt every secure value in `config` from one manager to another.
/// Used when a stack's secrets provider changes.
pub async fn reencrypt_config(
    config: &ConfigMap,
    from: &dyn Decrypter,
    to: &dyn Encrypter,
) -> Result<ConfigMap, SecretsError> {
    let ciphertexts: Vec<String> = config
        .secure_values()
        .map(|(_, ct)| ct.to_string())
        .collect();
    let plaintexts = from.bulk_decrypt(&ciphertexts).await?;

    let mut out = ConfigMap::new();
    for (key, value) in config.iter() {
        let next = match value {
            ConfigValue::Plain(_) => value.clone(),
            ConfigValue::Secure { secure } => {
                let pt = plaintexts.get(secure).ok_or_else(|| {
                    SecretsError::DecryptFailure(format!("no plaintext returned for {key}"))
                })?;
                ConfigValue::secure(to.encrypt_value(pt).await?)
            }
        };
        out.insert(key.clone(), next);
    }
    Ok(out)
}
