// BLAKE3 digest of storage configurations
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a storage configuration.
///
/// Two configurations with the same semantic content always produce the same
/// digest, so it can key the client cache across requests. See
/// [`StorageConfig::hash`](crate::storage::StorageConfig::hash).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigHash([u8; 32]);

impl ConfigHash {
    /// Hash bytes in memory
    pub fn from_bytes(data: &[u8]) -> Self {
        ConfigHash(*blake3::hash(data).as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<blake3::Hash> for ConfigHash {
    fn from(hash: blake3::Hash) -> Self {
        ConfigHash(*hash.as_bytes())
    }
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ConfigHash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let hex = s.strip_prefix("blake3:").unwrap_or(s);

        if hex.len() != 64 {
            anyhow::bail!(
                "Invalid BLAKE3 hash length: expected 64 hex chars, got {}",
                hex.len()
            );
        }

        let bytes = hex::decode(hex).with_context(|| format!("Failed to decode hex hash: {}", hex))?;

        let mut hash_bytes = [0u8; 32];
        hash_bytes.copy_from_slice(&bytes);

        Ok(ConfigHash(hash_bytes))
    }
}

impl Serialize for ConfigHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ConfigHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ConfigHash::from_str(&s).map_err(serde::de::Error::custom)
    }
}
