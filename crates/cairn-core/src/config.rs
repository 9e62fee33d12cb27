//! # Stack Configuration Map
//!
//! A stack's configuration is a map from key to value where each value is
//! either plaintext or a secure (encrypted) ciphertext. Secure values are
//! persisted as `{"secure": "<ciphertext>"}` so that readers can tell them
//! apart without consulting a secrets manager.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// An encrypted value. The string is the ciphertext as produced by the
    /// stack's encrypter.
    Secure {
        /// Ciphertext.
        secure: String,
    },
    /// A plaintext value.
    Plain(String),
}

impl ConfigValue {
    /// Construct a plaintext value.
    pub fn plain(value: impl Into<String>) -> Self {
        Self::Plain(value.into())
    }

    /// Construct a secure value from ciphertext.
    pub fn secure(ciphertext: impl Into<String>) -> Self {
        Self::Secure {
            secure: ciphertext.into(),
        }
    }

    /// Whether this value is encrypted.
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Secure { .. })
    }
}

/// Ordered configuration map. `BTreeMap` keeps serialized output stable
/// across saves so unchanged configuration produces identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigMap(BTreeMap<String, ConfigValue>);

impl ConfigMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: impl Into<String>, value: ConfigValue) -> Option<ConfigValue> {
        self.0.insert(key.into(), value)
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.0.iter()
    }

    /// Iterate `(key, ciphertext)` for every secure entry, in key order.
    pub fn secure_values(&self) -> impl Iterator<Item = (&String, &str)> {
        self.0.iter().filter_map(|(k, v)| match v {
            ConfigValue::Secure { secure } => Some((k, secure.as_str())),
            ConfigValue::Plain(_) => None,
        })
    }

    /// Whether any entry is secure.
    pub fn has_secure_values(&self) -> bool {
        self.0.values().any(ConfigValue::is_secure)
    }
}

impl FromIterator<(String, ConfigValue)> for ConfigMap {
    fn from_iter<T: IntoIterator<Item = (String, ConfigValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
