// Local filesystem storage backend
use super::{
    base_name, BackendParams, ByteStream, Container, Driver, Item, Location, MetaValue, Metadata,
};
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use path_clean::PathClean;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Directory inside every container holding metadata sidecars
const META_DIR: &str = ".meta";

/// Driver for the `local` and `local-meta` kinds.
///
/// A container is a directory under the configured root; keys map to paths
/// below it. Metadata is kept in JSON sidecars under `<container>/.meta/`:
///
/// `<container>/.meta/{key}.json`
///
/// `local-meta` always keeps sidecars and records a content digest as etag;
/// `local` keeps them only when metadata is allowed and derives a weak etag
/// from size and mtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDriver;

impl LocalDriver {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Plain { allow_metadata: bool },
    Sidecar,
}

impl Flavor {
    fn keeps_metadata(&self) -> bool {
        match self {
            Flavor::Plain { allow_metadata } => *allow_metadata,
            Flavor::Sidecar => true,
        }
    }
}

#[async_trait]
impl Driver for LocalDriver {
    async fn dial(&self, params: &BackendParams) -> Result<Arc<dyn Location>, StorageError> {
        let (root, flavor) = match params {
            BackendParams::Local { root, allow_metadata } => (
                root,
                Flavor::Plain {
                    allow_metadata: *allow_metadata,
                },
            ),
            BackendParams::LocalMeta { root } => (root, Flavor::Sidecar),
            other => {
                return Err(StorageError::Unavailable(format!(
                    "local driver cannot dial {} backend",
                    other.kind()
                )))
            }
        };

        if root.as_os_str().is_empty() {
            return Err(StorageError::Unavailable("missing root path".to_string()));
        }

        match fs::metadata(root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(StorageError::Unavailable(format!(
                    "root path is not a directory: {}",
                    root.display()
                )))
            }
            Err(err) => {
                return Err(StorageError::Unavailable(format!(
                    "root path {}: {}",
                    root.display(),
                    err
                )))
            }
        }

        Ok(Arc::new(LocalLocation {
            root: root.clone(),
            flavor,
        }))
    }
}

struct LocalLocation {
    root: PathBuf,
    flavor: Flavor,
}

impl LocalLocation {
    fn container_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(StorageError::InvalidKey(format!("container name: {:?}", name)));
        }
        Ok(self.root.join(name).clean())
    }

    fn open(&self, name: &str, path: PathBuf) -> Arc<dyn Container> {
        Arc::new(LocalContainer {
            name: name.to_string(),
            path,
            flavor: self.flavor,
        })
    }
}

#[async_trait]
impl Location for LocalLocation {
    async fn container(&self, name: &str) -> Result<Arc<dyn Container>, StorageError> {
        let path = self.container_path(name)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(self.open(name, path)),
            Ok(_) => Err(StorageError::NotFound(name.to_string())),
            Err(err) => Err(StorageError::from_io(err, name)),
        }
    }

    async fn create_container(&self, name: &str) -> Result<Arc<dyn Container>, StorageError> {
        let path = self.container_path(name)?;
        fs::create_dir_all(&path).await?;
        tracing::info!(container = name, path = %path.display(), "created local container");
        Ok(self.open(name, path))
    }
}

struct LocalContainer {
    name: String,
    path: PathBuf,
    flavor: Flavor,
}

impl LocalContainer {
    /// Normalized id and filesystem path of a key.
    ///
    /// Keys may not resolve outside the container or into the sidecar
    /// directory.
    fn locate(&self, key: &str) -> Result<(String, PathBuf), StorageError> {
        let path = self.path.join(key.trim_start_matches('/')).clean();
        if !path.starts_with(&self.path) || path.starts_with(self.path.join(META_DIR)) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        let relative = path
            .strip_prefix(&self.path)
            .map_err(|_| StorageError::InvalidKey(key.to_string()))?;
        let mut id = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if key.ends_with('/') && !id.is_empty() {
            id.push('/');
        }
        Ok((id, path))
    }

    fn sidecar_path(&self, id: &str) -> PathBuf {
        self.path
            .join(META_DIR)
            .join(format!("{}.json", id.trim_end_matches('/')))
    }

    async fn read_sidecar(&self, id: &str) -> Result<Metadata, String> {
        if !self.flavor.keeps_metadata() {
            return Ok(Metadata::new());
        }

        match fs::read(self.sidecar_path(id)).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|err| format!("corrupt metadata for {}: {}", id, err)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Metadata::new()),
            Err(err) => Err(format!("cannot read metadata for {}: {}", id, err)),
        }
    }

    /// Store `metadata` as the sidecar of `id`, dropping any previous one.
    /// Empty metadata leaves no sidecar behind.
    async fn replace_sidecar(&self, id: &str, metadata: &Metadata) -> Result<(), StorageError> {
        if !self.flavor.keeps_metadata() {
            return Ok(());
        }

        let path = self.sidecar_path(id);
        if metadata.is_empty() {
            return match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            };
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec_pretty(metadata)
            .map_err(|err| StorageError::Backend(format!("cannot encode metadata: {}", err)))?;
        fs::write(&path, raw).await?;
        Ok(())
    }

    async fn stat(&self, id: String, path: PathBuf) -> Result<Box<dyn Item>, StorageError> {
        let meta = fs::metadata(&path)
            .await
            .map_err(|err| StorageError::from_io(err, &id))?;
        let is_dir = meta.is_dir();
        let size = if is_dir { 0 } else { meta.len() };
        let modified: DateTime<Utc> = meta.modified()?.into();

        let metadata = self.read_sidecar(&id).await.map(|mut metadata| {
            metadata.insert("is_dir".to_string(), MetaValue::Flag(is_dir));
            metadata
        });

        let stored_etag = match (&self.flavor, &metadata) {
            (Flavor::Sidecar, Ok(metadata)) => metadata
                .get("etag")
                .and_then(MetaValue::as_str)
                .map(str::to_string),
            _ => None,
        };
        let etag = stored_etag
            .unwrap_or_else(|| format!("W/\"{:x}-{:x}\"", size, modified.timestamp_micros()));

        Ok(Box::new(LocalItem {
            name: base_name(&id).to_string(),
            id,
            path,
            size,
            modified,
            etag,
            metadata,
            is_dir,
        }))
    }

    /// Every file and directory below the container, directories with a
    /// trailing slash, sorted by id
    async fn walk(&self) -> Result<Vec<String>, StorageError> {
        let mut ids = Vec::new();
        let mut pending = vec![(self.path.clone(), String::new())];

        while let Some((dir, rel)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if rel.is_empty() && name == META_DIR {
                    continue;
                }

                if entry.file_type().await?.is_dir() {
                    let id = format!("{}{}/", rel, name);
                    ids.push(id.clone());
                    pending.push((entry.path(), id));
                } else {
                    ids.push(format!("{}{}", rel, name));
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn write_file(
        &self,
        path: &Path,
        body: &mut ByteStream,
    ) -> Result<(u64, blake3::Hash), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(path).await?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; 16384];
        let mut written = 0u64;

        loop {
            let bytes_read = body.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
            file.write_all(&buffer[..bytes_read]).await?;
            written += bytes_read as u64;
        }

        file.sync_all().await?;
        Ok((written, hasher.finalize()))
    }
}

#[async_trait]
impl Container for LocalContainer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn item(&self, key: &str) -> Result<Box<dyn Item>, StorageError> {
        let (id, path) = self.locate(key)?;
        self.stat(id, path).await
    }

    async fn items(
        &self,
        prefix: &str,
        marker: &str,
        limit: usize,
    ) -> Result<(Vec<Box<dyn Item>>, String), StorageError> {
        let prefix = prefix.trim_start_matches('/');
        let ids = self.walk().await?;
        let mut matching = ids
            .into_iter()
            .filter(|id| id.starts_with(prefix) && (marker.is_empty() || id.as_str() > marker));

        let mut items = Vec::new();
        for id in matching.by_ref().take(limit) {
            let path = self.path.join(&id);
            match self.stat(id, path).await {
                Ok(item) => items.push(item),
                // removed between walk and stat
                Err(StorageError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }

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
        mut metadata: Metadata,
    ) -> Result<Box<dyn Item>, StorageError> {
        let (id, path) = self.locate(key)?;

        let is_dir = id.is_empty() || id.ends_with('/');
        if is_dir {
            fs::create_dir_all(&path).await?;
        } else {
            let (written, digest) = self.write_file(&path, &mut body).await?;
            if length > 0 && written != length {
                let _ = fs::remove_file(&path).await;
                return Err(StorageError::Backend(format!(
                    "short body for {}: expected {} bytes, got {}",
                    id, length, written
                )));
            }

            if self.flavor == Flavor::Sidecar {
                metadata.insert(
                    "etag".to_string(),
                    MetaValue::Text(format!("\"{}\"", digest.to_hex())),
                );
            }
            tracing::debug!(container = %self.name, key = %id, bytes = written, "stored file");
        }

        if let Err(err) = self.replace_sidecar(&id, &metadata).await {
            if !is_dir {
                let _ = fs::remove_file(&path).await;
            }
            return Err(err);
        }

        self.stat(id, path).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let (id, path) = self.locate(key)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|err| StorageError::from_io(err, &id))?;

        if meta.is_dir() {
            fs::remove_dir(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }

        if self.flavor.keeps_metadata() {
            match fs::remove_file(self.sidecar_path(&id)).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        tracing::debug!(container = %self.name, key = %id, "removed item");
        Ok(())
    }
}

struct LocalItem {
    id: String,
    name: String,
    path: PathBuf,
    size: u64,
    modified: DateTime<Utc>,
    etag: String,
    metadata: Result<Metadata, String>,
    is_dir: bool,
}

#[async_trait]
impl Item for LocalItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn etag(&self) -> &str {
        &self.etag
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.modified
    }

    fn metadata(&self) -> Result<Metadata, StorageError> {
        self.metadata.clone().map_err(StorageError::Backend)
    }

    async fn open(&self) -> Result<ByteStream, StorageError> {
        if self.is_dir {
            return Err(StorageError::Backend(format!("{} is a directory", self.id)));
        }
        let file = fs::File::open(&self.path)
            .await
            .map_err(|err| StorageError::from_io(err, &self.id))?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn sidecar_container() -> (Arc<dyn Container>, TempDir) {
        let temp = TempDir::new().unwrap();
        let params = BackendParams::LocalMeta {
            root: temp.path().to_path_buf(),
        };
        let location = LocalDriver::new().dial(&params).await.unwrap();
        (location.create_container("bucket").await.unwrap(), temp)
    }

    async fn plain_container(allow_metadata: bool) -> (Arc<dyn Container>, TempDir) {
        let temp = TempDir::new().unwrap();
        let params = BackendParams::Local {
            root: temp.path().to_path_buf(),
            allow_metadata,
        };
        let location = LocalDriver::new().dial(&params).await.unwrap();
        (location.create_container("bucket").await.unwrap(), temp)
    }

    async fn put_str(container: &Arc<dyn Container>, key: &str, body: &'static str, metadata: Metadata) {
        container
            .put(key, Box::new(body.as_bytes()), body.len() as u64, metadata)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dial_rejects_bad_params() {
        let driver = LocalDriver::new();

        let err = driver
            .dial(&BackendParams::Local {
                root: PathBuf::new(),
                allow_metadata: true,
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::Unavailable(_)));

        let err = driver
            .dial(&BackendParams::LocalMeta {
                root: PathBuf::from("/definitely/not/here"),
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::Unavailable(_)));

        let err = driver
            .dial(&BackendParams::B2 {
                account_id: "a".into(),
                application_key: "k".into(),
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_container_missing_then_created() {
        let temp = TempDir::new().unwrap();
        let params = BackendParams::Local {
            root: temp.path().to_path_buf(),
            allow_metadata: true,
        };
        let location = LocalDriver::new().dial(&params).await.unwrap();

        assert!(location.container("media").await.err().unwrap().is_not_found());
        location.create_container("media").await.unwrap();
        location.create_container("media").await.unwrap();
        assert_eq!(location.container("media").await.unwrap().name(), "media");
    }

    #[tokio::test]
    async fn test_put_and_read_back() {
        let (container, _temp) = plain_container(true).await;
        let mut metadata = Metadata::new();
        metadata.insert("content-type".into(), "text/plain".into());
        put_str(&container, "/docs/readme.txt", "hello world", metadata).await;

        let item = container.item("docs/readme.txt").await.unwrap();
        assert_eq!(item.id(), "docs/readme.txt");
        assert_eq!(item.name(), "readme.txt");
        assert_eq!(item.size(), 11);
        assert!(item.etag().starts_with("W/"));

        let metadata = item.metadata().unwrap();
        assert_eq!(metadata["content-type"].as_str(), Some("text/plain"));
        assert_eq!(metadata["is_dir"].as_bool(), Some(false));

        let mut content = String::new();
        item.open().await.unwrap().read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "hello world");
    }

    #[tokio::test]
    async fn test_sidecar_etag_is_content_digest() {
        let (container, _temp) = sidecar_container().await;
        put_str(&container, "a.bin", "payload", Metadata::new()).await;

        let item = container.item("a.bin").await.unwrap();
        assert_eq!(
            item.etag(),
            format!("\"{}\"", blake3::hash(b"payload").to_hex())
        );
    }

    #[tokio::test]
    async fn test_metadata_disabled() {
        let (container, temp) = plain_container(false).await;
        let mut metadata = Metadata::new();
        metadata.insert("x-amz-meta-a".into(), "1".into());
        put_str(&container, "f", "x", metadata).await;

        let metadata = container.item("f").await.unwrap().metadata().unwrap();
        assert!(!metadata.contains_key("x-amz-meta-a"));
        assert!(!temp.path().join("bucket").join(META_DIR).exists());
    }

    #[tokio::test]
    async fn test_corrupt_sidecar_surfaces_on_metadata() {
        let (container, temp) = sidecar_container().await;
        put_str(&container, "f", "x", Metadata::new()).await;
        std::fs::write(temp.path().join("bucket").join(META_DIR).join("f.json"), b"{oops").unwrap();

        let item = container.item("f").await.unwrap();
        assert!(matches!(item.metadata(), Err(StorageError::Backend(_))));
    }

    #[tokio::test]
    async fn test_directory_marker() {
        let (container, _temp) = sidecar_container().await;
        container
            .put("photos/", Box::new(&b""[..]), 0, Metadata::new())
            .await
            .unwrap();

        let item = container.item("photos/").await.unwrap();
        assert_eq!(item.size(), 0);
        assert_eq!(item.metadata().unwrap()["is_dir"].as_bool(), Some(true));
        assert!(item.open().await.is_err());
    }

    #[tokio::test]
    async fn test_items_walks_tree_and_skips_sidecars() {
        let (container, _temp) = sidecar_container().await;
        for key in ["a/b", "a/c", "a/d/e", "z"] {
            put_str(&container, key, "data", Metadata::new()).await;
        }

        let (items, marker) = container.items("a/", "", 100).await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec!["a/b", "a/c", "a/d/", "a/d/e"]);
        assert_eq!(marker, "");

        let (items, marker) = container.items("", "", 2).await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec!["a/", "a/b"]);
        assert_eq!(marker, "a/b");

        let (items, _) = container.items("", &marker, 100).await.unwrap();
        assert_eq!(items.last().unwrap().id(), "z");
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (container, _temp) = plain_container(true).await;

        assert!(matches!(
            container.item("../etc/passwd").await.err().unwrap(),
            StorageError::InvalidKey(_)
        ));
        assert!(matches!(
            container.item(".meta/f.json").await.err().unwrap(),
            StorageError::InvalidKey(_)
        ));
    }

    #[tokio::test]
    async fn test_keys_are_cleaned_inside_container() {
        let (container, temp) = plain_container(true).await;
        put_str(&container, "a/../b//c.txt", "x", Metadata::new()).await;

        let item = container.item("b/c.txt").await.unwrap();
        assert_eq!(item.id(), "b/c.txt");
        assert!(temp.path().join("bucket/b/c.txt").is_file());

        put_str(&container, ".metadata", "x", Metadata::new()).await;
        assert_eq!(container.item(".metadata").await.unwrap().id(), ".metadata");

        assert!(matches!(
            container.item("a/../../bucket2/f").await.err().unwrap(),
            StorageError::InvalidKey(_)
        ));
    }

    #[tokio::test]
    async fn test_overwrite_without_metadata_drops_sidecar() {
        let (container, temp) = plain_container(true).await;
        let mut metadata = Metadata::new();
        metadata.insert("x-amz-meta-owner".into(), "alice".into());
        metadata.insert("content-type".into(), "image/jpeg".into());
        put_str(&container, "f.bin", "one", metadata).await;
        let sidecar = temp.path().join("bucket").join(META_DIR).join("f.bin.json");
        assert!(sidecar.exists());

        put_str(&container, "f.bin", "two", Metadata::new()).await;

        assert!(!sidecar.exists());
        let metadata = container.item("f.bin").await.unwrap().metadata().unwrap();
        assert!(!metadata.contains_key("x-amz-meta-owner"));
        assert!(!metadata.contains_key("content-type"));
    }

    #[tokio::test]
    async fn test_sidecar_failure_removes_written_file() {
        let (container, temp) = sidecar_container().await;
        std::fs::write(temp.path().join("bucket").join(META_DIR), b"not a dir").unwrap();

        let err = container
            .put("f", Box::new(&b"abc"[..]), 3, Metadata::new())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, StorageError::Io(_)));
        assert!(!temp.path().join("bucket/f").exists());
    }

    #[tokio::test]
    async fn test_remove_item_and_sidecar() {
        let (container, temp) = sidecar_container().await;
        put_str(&container, "dir/f", "x", Metadata::new()).await;
        let sidecar = temp.path().join("bucket").join(META_DIR).join("dir").join("f.json");
        assert!(sidecar.exists());

        container.remove_item("dir/f").await.unwrap();
        assert!(!sidecar.exists());
        assert!(container.item("dir/f").await.err().unwrap().is_not_found());
        assert!(container.remove_item("dir/f").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_short_body_rejected() {
        let (container, _temp) = plain_container(true).await;
        let err = container
            .put("f", Box::new(&b"abc"[..]), 10, Metadata::new())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, StorageError::Backend(_)));
        assert!(container.item("f").await.err().unwrap().is_not_found());
    }
}
