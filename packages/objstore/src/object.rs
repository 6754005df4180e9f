// Logical object reference consumed by every storage operation
use crate::storage::{StorageConfig, StorageKind};
use std::sync::Arc;

/// One object addressed by bucket and key, bound to the storage
/// configuration that serves it.
#[derive(Debug, Clone)]
pub struct FileObjectRef {
    pub bucket: String,
    pub key: String,
    /// Request path, used to guess a content type from its extension
    pub uri_path: String,
    pub storage: Arc<StorageConfig>,
}

impl FileObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, storage: Arc<StorageConfig>) -> Self {
        let key = key.into();
        Self {
            bucket: bucket.into(),
            uri_path: key.clone(),
            key,
            storage,
        }
    }

    pub fn with_uri_path(mut self, uri_path: impl Into<String>) -> Self {
        self.uri_path = uri_path.into();
        self
    }

    pub fn kind(&self) -> StorageKind {
        self.storage.kind
    }

    /// Bucket the backend container is resolved from
    pub fn container_name(&self) -> &str {
        if self.storage.bucket.is_empty() {
            &self.bucket
        } else {
            &self.storage.bucket
        }
    }
}
