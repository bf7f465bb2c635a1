//! Identity types for chain values

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque key naming one logical chain value.
///
/// The same identifier is used as the cache key and as the provider
/// registry key, so it must be stable across the lifetime of the process.
/// Typical values are a feed name (`"price.dot-usd"`) or a hex-encoded
/// storage key (`"0x26aa394e..."`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Create an identifier from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derive an identifier from a raw storage key.
    ///
    /// The key is rendered as lowercase hex with a `0x` prefix.
    pub fn from_storage_key(key: &[u8]) -> Self {
        Self(format!("0x{}", hex::encode(key)))
    }

    /// Decode the storage key bytes back out of a `0x`-prefixed identifier.
    ///
    /// Returns `None` for identifiers that are not hex storage keys.
    pub fn storage_key(&self) -> Option<Vec<u8>> {
        let stripped = self.0.strip_prefix("0x")?;
        hex::decode(stripped).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&Identifier> for Identifier {
    fn from(value: &Identifier) -> Self {
        value.clone()
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Values that carry a stable identifier field.
///
/// The keyed cache store is generic over this trait: the identifier is the
/// only thing it needs to know about a value to upsert or delete it.
pub trait Identifiable {
    fn identifier(&self) -> &Identifier;
}
