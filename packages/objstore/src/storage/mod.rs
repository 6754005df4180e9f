// Backend capability traits and bundled drivers
//
// A driver dials a location from `BackendParams`; a location hands out
// containers (buckets); a container reads, lists, writes and removes items.

pub mod config;
pub mod local;
pub mod memory;
pub mod params;

pub use config::{StorageConfig, StorageKind, StorageSettings};
pub use params::BackendParams;

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Byte stream of an item's content, or of a request body being stored
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Flat metadata map as stored by a backend
pub type Metadata = BTreeMap<String, MetaValue>;

/// Scalar metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Flag(bool),
    Number(serde_json::Number),
    Text(String),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Flag(b) => write!(f, "{}", b),
            MetaValue::Number(n) => write!(f, "{}", n),
            MetaValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Flag(value)
    }
}

/// Connects to one backend technology
#[async_trait]
pub trait Driver: Send + Sync {
    async fn dial(&self, params: &BackendParams) -> Result<Arc<dyn Location>, StorageError>;
}

/// A dialed backend, able to resolve containers
#[async_trait]
pub trait Location: Send + Sync {
    /// Fails with `NotFound` when the container does not exist
    async fn container(&self, name: &str) -> Result<Arc<dyn Container>, StorageError>;

    /// Must be idempotent: creating an existing container returns it
    async fn create_container(&self, name: &str) -> Result<Arc<dyn Container>, StorageError>;
}

/// Handle bound to one bucket
#[async_trait]
pub trait Container: Send + Sync {
    fn name(&self) -> &str;

    async fn item(&self, key: &str) -> Result<Box<dyn Item>, StorageError>;

    /// Items whose id starts with `prefix`, ordered by id, strictly after
    /// `marker`, at most `limit`. The second value is the marker to continue
    /// from, empty when the listing is exhausted.
    async fn items(
        &self,
        prefix: &str,
        marker: &str,
        limit: usize,
    ) -> Result<(Vec<Box<dyn Item>>, String), StorageError>;

    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        length: u64,
        metadata: Metadata,
    ) -> Result<Box<dyn Item>, StorageError>;

    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// One stored object as seen through a backend
#[async_trait]
pub trait Item: Send + Sync {
    /// Full native key
    fn id(&self) -> &str;

    /// Last path segment of the key
    fn name(&self) -> &str;

    fn size(&self) -> u64;

    fn etag(&self) -> &str;

    fn last_modified(&self) -> DateTime<Utc>;

    fn metadata(&self) -> Result<Metadata, StorageError>;

    async fn open(&self) -> Result<ByteStream, StorageError>;
}

/// Last non-empty segment of a slash separated key
pub(crate) fn base_name(key: &str) -> &str {
    key.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_value_untagged() {
        let meta: Metadata =
            serde_json::from_str(r#"{"is_dir":true,"size":12,"content-type":"text/plain"}"#)
                .unwrap();

        assert_eq!(meta["is_dir"].as_bool(), Some(true));
        assert!(matches!(meta["size"], MetaValue::Number(_)));
        assert_eq!(meta["content-type"].as_str(), Some("text/plain"));
        assert_eq!(meta["size"].to_string(), "12");
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("a/b/c.jpg"), "c.jpg");
        assert_eq!(base_name("a/d/"), "d");
        assert_eq!(base_name("top"), "top");
    }
}
