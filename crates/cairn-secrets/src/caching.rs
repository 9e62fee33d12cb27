//! # Caching Crypter
//!
//! Decorates any encrypter/decrypter pair with two caches:
//!
//! - ciphertext → plaintext, filled by every decrypt and encrypt;
//! - plaintext → ciphertext, so re-encrypting an unchanged value returns
//!   the ciphertext already on disk and settings files do not churn.
//!
//! [`CachingCrypter::bulk_decrypt`] forwards only the cache misses, in a
//! single call to the inner decrypter.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::crypter::{Decrypter, Encrypter};
use crate::error::SecretsError;

#[derive(Default)]
struct Cache {
    plaintexts: HashMap<String, String>,
    ciphertexts: HashMap<String, String>,
}

impl Cache {
    fn record(&mut self, plaintext: &str, ciphertext: &str) {
        self.plaintexts
            .insert(ciphertext.to_string(), plaintext.to_string());
        self.ciphertexts
            .insert(plaintext.to_string(), ciphertext.to_string());
    }
}

/// Caching decorator over an inner crypter.
#[derive(Clone)]
pub struct CachingCrypter {
    encrypter: Arc<dyn Encrypter>,
    decrypter: Arc<dyn Decrypter>,
    cache: Arc<Mutex<Cache>>,
}

impl std::fmt::Debug for CachingCrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.lock();
        f.debug_struct("CachingCrypter")
            .field("cached", &cache.plaintexts.len())
            .finish()
    }
}

impl CachingCrypter {
    /// Wrap an encrypter and decrypter (usually the same object).
    pub fn new(encrypter: Arc<dyn Encrypter>, decrypter: Arc<dyn Decrypter>) -> Self {
        Self {
            encrypter,
            decrypter,
            cache: Arc::new(Mutex::new(Cache::default())),
        }
    }

    /// Number of cached ciphertexts.
    pub fn cached(&self) -> usize {
        self.cache.lock().plaintexts.len()
    }
}

#[async_trait]
impl Encrypter for CachingCrypter {
    async fn encrypt_value(&self, plaintext: &str) -> Result<String, SecretsError> {
        let cached = self.cache.lock().ciphertexts.get(plaintext).cloned();
        if let Some(ct) = cached {
            return Ok(ct);
        }
        let ct = self.encrypter.encrypt_value(plaintext).await?;
        self.cache.lock().record(plaintext, &ct);
        Ok(ct)
    }
}

#[async_trait]
impl Decrypter for CachingCrypter {
    async fn decrypt_value(&self, ciphertext: &str) -> Result<String, SecretsError> {
        let cached = self.cache.lock().plaintexts.get(ciphertext).cloned();
        if let Some(pt) = cached {
            return Ok(pt);
        }
        let pt = self.decrypter.decrypt_value(ciphertext).await?;
        self.cache.lock().record(&pt, ciphertext);
        Ok(pt)
    }

    async fn bulk_decrypt(
        &self,
        ciphertexts: &[String],
    ) -> Result<HashMap<String, String>, SecretsError> {
        let mut out = HashMap::with_capacity(ciphertexts.len());
        let mut misses = Vec::new();
        {
            let cache = self.cache.lock();
            for ct in ciphertexts {
                match cache.plaintexts.get(ct) {
                    Some(pt) => {
                        out.insert(ct.clone(), pt.clone());
                    }
                    None if !misses.contains(ct) => misses.push(ct.clone()),
                    None => {}
                }
            }
        }

        if !misses.is_empty() {
            let decrypted = self.decrypter.bulk_decrypt(&misses).await?;
            let mut cache = self.cache.lock();
            for (ct, pt) in decrypted {
                cache.record(&pt, &ct);
                out.insert(ct, pt);
            }
        }
        Ok(out)
    }
}
