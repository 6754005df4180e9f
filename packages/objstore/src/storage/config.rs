// Storage configuration management
use crate::hash::ConfigHash;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tokio::fs;

/// Backend technology behind a storage configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum StorageKind {
    /// Plain local filesystem
    #[default]
    #[serde(rename = "local")]
    Local,
    /// Local filesystem with a metadata sidecar per object
    #[serde(rename = "local-meta")]
    LocalMeta,
    /// Read-only HTTP source
    #[serde(rename = "http")]
    Http,
    /// S3-compatible object store
    #[serde(rename = "s3")]
    S3,
    /// Cloud blob store
    #[serde(rename = "b2")]
    B2,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::LocalMeta => "local-meta",
            StorageKind::Http => "http",
            StorageKind::S3 => "s3",
            StorageKind::B2 => "b2",
        }
    }

    /// Local kinds create missing containers on demand
    pub fn is_local(&self) -> bool {
        matches!(self, StorageKind::Local | StorageKind::LocalMeta)
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage configuration for one logical backend.
///
/// Only the fields relevant to `kind` are read when dialing; the rest stay
/// empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StorageKind,

    /// Root directory (local kinds)
    pub root_path: PathBuf,

    /// Bucket override; when empty the bucket of the object reference is used
    pub bucket: String,

    /// Prefix joined in front of every logical key
    pub path_prefix: String,

    /// Source URL (http)
    pub url: String,

    // s3
    pub access_key: String,
    pub secret_access_key: String,
    pub region: String,
    pub endpoint: String,

    // b2
    pub account_id: String,
    pub application_key: String,

    /// Request headers forwarded to the http source
    pub headers: BTreeMap<String, String>,
}

impl StorageConfig {
    /// Configuration for a local backend rooted at `root`
    pub fn local<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            kind: StorageKind::Local,
            root_path: root.into(),
            ..Default::default()
        }
    }

    /// Stable digest over every field, used as the client cache key.
    ///
    /// Each field is written with a length prefix so adjacent values cannot
    /// run into each other.
    pub fn hash(&self) -> ConfigHash {
        let mut hasher = blake3::Hasher::new();
        let mut field = |value: &[u8]| {
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value);
        };

        field(self.kind.as_str().as_bytes());
        field(self.root_path.to_string_lossy().as_bytes());
        field(self.bucket.as_bytes());
        field(self.path_prefix.as_bytes());
        field(self.url.as_bytes());
        field(&(self.headers.len() as u64).to_le_bytes());
        for (name, value) in &self.headers {
            field(name.as_bytes());
            field(value.as_bytes());
        }
        field(self.access_key.as_bytes());
        field(self.secret_access_key.as_bytes());
        field(self.region.as_bytes());
        field(self.endpoint.as_bytes());
        field(self.account_id.as_bytes());
        field(self.application_key.as_bytes());

        ConfigHash::from(hasher.finalize())
    }
}

/// Named storage configurations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub storages: BTreeMap<String, StorageConfig>,
}

impl StorageSettings {
    /// Load settings with the following priority:
    /// 1. OBJSTORE_CONFIG environment variable (path to a toml file)
    /// 2. config.toml file
    /// 3. Default: one local storage under ~/.cache/objstore
    pub async fn load() -> Result<Self> {
        if let Ok(env_path) = std::env::var("OBJSTORE_CONFIG") {
            return Self::load_from(PathBuf::from(env_path)).await;
        }

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                return Self::load_from(config_path).await;
            }
        }

        Ok(Self::default())
    }

    /// Read and parse a toml settings file
    pub async fn load_from(config_path: PathBuf) -> Result<Self> {
        let content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let settings: StorageSettings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::debug!(
            path = %config_path.display(),
            storages = settings.storages.len(),
            "loaded storage settings"
        );

        Ok(settings)
    }

    /// Get the config file path (~/.config/objstore/config.toml)
    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("objstore").join("config.toml"))
    }

    /// Save settings to the config file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path().context("Failed to determine config directory")?;
        self.save_to(config_path).await
    }

    pub async fn save_to(&self, config_path: PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;

        fs::write(&config_path, content)
            .await
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&StorageConfig> {
        self.storages.get(name)
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        let root = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("objstore");

        let mut storages = BTreeMap::new();
        storages.insert("default".to_string(), StorageConfig::local(root));

        Self { storages }
    }
}
