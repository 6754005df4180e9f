//! Unified object storage layer.
//!
//! Objects are addressed by bucket and key plus the [`StorageConfig`] of the
//! backend serving them. [`Storage`] performs get, head, set, delete and
//! S3-style listing over any registered backend and answers with an
//! HTTP-shaped [`Response`].
//!
//! ```no_run
//! # async fn demo() {
//! use objstore::{FileObjectRef, Storage, StorageConfig};
//! use std::sync::Arc;
//!
//! let storage = Storage::default();
//! let config = Arc::new(StorageConfig::local("/var/lib/objects"));
//! let res = storage.get(&FileObjectRef::new("media", "cat.jpg", config)).await;
//! println!("{}", res.status);
//! # }
//! ```

pub mod error;
pub mod hash;
pub mod key;
pub mod listing;
pub mod metadata;
pub mod object;
pub mod ops;
pub mod registry;
pub mod response;
pub mod storage;

pub use error::StorageError;
pub use hash::ConfigHash;
pub use listing::ListBucketResult;
pub use object::FileObjectRef;
pub use ops::Storage;
pub use registry::ClientRegistry;
pub use response::{Body, Response};
pub use storage::{StorageConfig, StorageKind, StorageSettings};
