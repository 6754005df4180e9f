// Cache of live backend containers, one per distinct storage configuration
use crate::error::StorageError;
use crate::hash::ConfigHash;
use crate::object::FileObjectRef;
use crate::storage::local::LocalDriver;
use crate::storage::{BackendParams, Container, Driver, StorageKind};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Cache key: a storage configuration plus the container it resolves to.
/// References sharing a configuration but naming different buckets get
/// distinct containers.
type CacheKey = (ConfigHash, String);

/// Resolves object references to backend containers.
///
/// Containers are dialed lazily on first use of a configuration and bucket
/// and kept for the lifetime of the registry; entries are never evicted. The lock is held
/// only for map access, never across a dial, so concurrent misses for the
/// same configuration may each dial. The first container stored wins and
/// every caller gets that one back.
pub struct ClientRegistry {
    drivers: HashMap<StorageKind, Arc<dyn Driver>>,
    cache: RwLock<HashMap<CacheKey, Arc<dyn Container>>>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        let local: Arc<dyn Driver> = Arc::new(LocalDriver::new());
        Self::empty()
            .with_driver(StorageKind::Local, local.clone())
            .with_driver(StorageKind::LocalMeta, local)
    }
}

impl ClientRegistry {
    /// Registry with the bundled local drivers
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with no drivers at all
    pub fn empty() -> Self {
        Self {
            drivers: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the driver serving `kind`
    pub fn with_driver(mut self, kind: StorageKind, driver: Arc<dyn Driver>) -> Self {
        self.drivers.insert(kind, driver);
        self
    }

    /// Number of cached containers
    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, key: &CacheKey) -> Option<Arc<dyn Container>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Container serving `obj`, dialing its backend on a cache miss.
    ///
    /// Dial failures are `Unavailable`. A missing bucket is created for local
    /// kinds and is a `NotFound` error for every other kind.
    pub async fn resolve(&self, obj: &FileObjectRef) -> Result<Arc<dyn Container>, StorageError> {
        let config = obj.storage.as_ref();
        let bucket = obj.container_name();
        let cache_key = (config.hash(), bucket.to_string());

        if let Some(container) = self.cached(&cache_key) {
            return Ok(container);
        }

        tracing::debug!(kind = %config.kind, hash = %cache_key.0, bucket, "client cache miss");

        let driver = self.drivers.get(&config.kind).ok_or_else(|| {
            StorageError::Unavailable(format!("no driver registered for {} backend", config.kind))
        })?;

        let params = BackendParams::from(config);
        let location = driver.dial(&params).await.map_err(|err| {
            tracing::info!(kind = %config.kind, error = %err, "Storage/getClient dial failed");
            match err {
                StorageError::Unavailable(_) => err,
                other => StorageError::Unavailable(other.to_string()),
            }
        })?;

        let container = match location.container(bucket).await {
            Ok(container) => container,
            Err(err) if err.is_not_found() && config.kind.is_local() => {
                location.create_container(bucket).await.map_err(|err| {
                    tracing::warn!(kind = %config.kind, bucket, error = %err, "Storage/getClient create container failed");
                    StorageError::Backend(err.to_string())
                })?
            }
            Err(err) => {
                tracing::info!(kind = %config.kind, bucket, error = %err, "Storage/getClient container get error");
                return Err(match err {
                    StorageError::NotFound(_) => err,
                    other => StorageError::Backend(other.to_string()),
                });
            }
        };

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Ok(cache.entry(cache_key).or_insert(container).clone())
    }
}
