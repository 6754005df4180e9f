// Translation of a logical storage configuration into driver parameters
use super::config::{StorageConfig, StorageKind};
use std::path::PathBuf;

/// Parameter set a driver needs to dial its backend.
///
/// Each variant carries only the fields its backend reads. Missing values are
/// not rejected here; the driver reports them when dialing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendParams {
    Local {
        root: PathBuf,
        allow_metadata: bool,
    },
    LocalMeta {
        root: PathBuf,
    },
    Http {
        url: String,
        /// Custom request headers serialized as a JSON object
        headers: String,
    },
    S3 {
        access_key: String,
        secret_key: String,
        region: String,
        endpoint: String,
    },
    B2 {
        account_id: String,
        application_key: String,
    },
}

impl BackendParams {
    pub fn kind(&self) -> StorageKind {
        match self {
            BackendParams::Local { .. } => StorageKind::Local,
            BackendParams::LocalMeta { .. } => StorageKind::LocalMeta,
            BackendParams::Http { .. } => StorageKind::Http,
            BackendParams::S3 { .. } => StorageKind::S3,
            BackendParams::B2 { .. } => StorageKind::B2,
        }
    }
}

impl From<&StorageConfig> for BackendParams {
    fn from(config: &StorageConfig) -> Self {
        match config.kind {
            StorageKind::Local => BackendParams::Local {
                root: config.root_path.clone(),
                allow_metadata: true,
            },
            StorageKind::LocalMeta => BackendParams::LocalMeta {
                root: config.root_path.clone(),
            },
            StorageKind::Http => BackendParams::Http {
                url: config.url.clone(),
                // a string map always serializes
                headers: serde_json::to_string(&config.headers).unwrap_or_default(),
            },
            StorageKind::S3 => BackendParams::S3 {
                access_key: config.access_key.clone(),
                secret_key: config.secret_access_key.clone(),
                region: config.region.clone(),
                endpoint: config.endpoint.clone(),
            },
            StorageKind::B2 => BackendParams::B2 {
                account_id: config.account_id.clone(),
                application_key: config.application_key.clone(),
            },
        }
    }
}
