// In-process storage backend
use super::{base_name, BackendParams, ByteStream, Container, Driver, Item, Location, Metadata};
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::io::AsyncReadExt;

/// Driver keeping every object in memory.
///
/// All dials share one location, so containers created through one dial are
/// visible through every other. Usable for any kind, which makes it the
/// stand-in for remote backends in tests and ephemeral deployments.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    location: Arc<MemoryLocation>,
    dials: Arc<AtomicUsize>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver with the given containers already present
    pub fn with_containers<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let driver = Self::new();
        for name in names {
            driver.location.get_or_create(name);
        }
        driver
    }

    /// Number of times `dial` has been called
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn dial(&self, params: &BackendParams) -> Result<Arc<dyn Location>, StorageError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(kind = %params.kind(), "dialing memory backend");
        Ok(self.location.clone())
    }
}

/// Upper bound on the buffer reserved up front for a put
const PREALLOC_LIMIT: u64 = 64 * 1024;

#[derive(Default)]
struct MemoryLocation {
    containers: RwLock<HashMap<String, Arc<MemoryContainer>>>,
}

impl MemoryLocation {
    fn get_or_create(&self, name: &str) -> Arc<MemoryContainer> {
        let mut containers = self.containers.write().unwrap_or_else(PoisonError::into_inner);
        containers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryContainer {
                    name: name.to_string(),
                    objects: RwLock::new(BTreeMap::new()),
                })
            })
            .clone()
    }
}

#[async_trait]
impl Location for MemoryLocation {
    async fn container(&self, name: &str) -> Result<Arc<dyn Container>, StorageError> {
        let containers = self.containers.read().unwrap_or_else(PoisonError::into_inner);
        match containers.get(name) {
            Some(container) => Ok(container.clone()),
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }

    async fn create_container(&self, name: &str) -> Result<Arc<dyn Container>, StorageError> {
        Ok(self.get_or_create(name))
    }
}

#[derive(Clone)]
struct MemoryObject {
    data: Bytes,
    metadata: Metadata,
    etag: String,
    modified: DateTime<Utc>,
}

struct MemoryContainer {
    name: String,
    objects: RwLock<BTreeMap<String, MemoryObject>>,
}

fn normalize(key: &str) -> &str {
    key.trim_start_matches('/')
}

fn to_item(id: &str, object: &MemoryObject) -> Box<dyn Item> {
    Box::new(MemoryItem {
        id: id.to_string(),
        name: base_name(id).to_string(),
        object: object.clone(),
    })
}

#[async_trait]
impl Container for MemoryContainer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn item(&self, key: &str) -> Result<Box<dyn Item>, StorageError> {
        let key = normalize(key);
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects
            .get(key)
            .map(|object| to_item(key, object))
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn items(
        &self,
        prefix: &str,
        marker: &str,
        limit: usize,
    ) -> Result<(Vec<Box<dyn Item>>, String), StorageError> {
        let prefix = normalize(prefix);
        let lower = if marker.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(marker.to_string())
        };

        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let mut matching = objects
            .range((lower, Bound::Unbounded))
            .filter(|(id, _)| id.starts_with(prefix));

        let items: Vec<Box<dyn Item>> = matching
            .by_ref()
            .take(limit)
            .map(|(id, object)| to_item(id, object))
            .collect();

        let next_marker = match (matching.next(), items.last()) {
            (Some(_), Some(last)) => last.id().to_string(),
            _ => String::new(),
        };

        Ok((items, next_marker))
    }

    async fn put(
        &self,
        key: &str,
        mut body: ByteStream,
        length: u64,
        metadata: Metadata,
    ) -> Result<Box<dyn Item>, StorageError> {
        let key = normalize(key);
        // declared length is a hint only
        let mut data = Vec::with_capacity(length.min(PREALLOC_LIMIT) as usize);
        body.read_to_end(&mut data).await?;

        let object = MemoryObject {
            etag: format!("\"{}\"", blake3::hash(&data).to_hex()),
            data: Bytes::from(data),
            metadata,
            modified: Utc::now(),
        };

        let item = to_item(key, &object);
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), object);

        Ok(item)
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let key = normalize(key);
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

struct MemoryItem {
    id: String,
    name: String,
    object: MemoryObject,
}

#[async_trait]
impl Item for MemoryItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.object.data.len() as u64
    }

    fn etag(&self) -> &str {
        &self.object.etag
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.object.modified
    }

    fn metadata(&self) -> Result<Metadata, StorageError> {
        Ok(self.object.metadata.clone())
    }

    async fn open(&self) -> Result<ByteStream, StorageError> {
        Ok(Box::new(Cursor::new(self.object.data.clone())))
    }
}
