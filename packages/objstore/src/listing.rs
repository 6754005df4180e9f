// S3 style hierarchical listing over a flat key space
use crate::error::StorageError;
use crate::key::join;
use crate::metadata::is_dir;
use crate::object::FileObjectRef;
use crate::ops::Storage;
use crate::response::Response;
use crate::storage::{Item, StorageKind};
use chrono::SecondsFormat;
use http::StatusCode;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename = "ListBucketResult", rename_all = "PascalCase")]
pub struct ListBucketResult {
    pub name: String,
    pub prefix: String,
    pub marker: String,
    pub max_keys: usize,
    pub is_truncated: bool,
    pub contents: Vec<ListContent>,
    pub common_prefixes: Vec<CommonPrefix>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ListContent {
    pub key: String,
    pub last_modified: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    pub size: u64,
    pub storage_class: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CommonPrefix {
    pub prefix: String,
}

impl ListBucketResult {
    /// Group a flat page of items into contents and common prefixes.
    ///
    /// `prefix` is the backend-native prefix the items were listed under. An
    /// item with more path segments than the prefix lies below a sub path and
    /// only contributes that sub path as a common prefix. A direct child that
    /// is a directory becomes a common prefix; a key ending in `/` that is
    /// still a direct child is the marker of the prefix itself and is listed
    /// as an empty entry.
    pub fn build(name: &str, prefix: &str, marker: String, max_keys: usize, items: &[Box<dyn Item>]) -> Self {
        let prefix_depth = prefix.split('/').count();
        let mut seen = HashSet::new();
        let mut contents = Vec::new();
        let mut common_prefixes = Vec::new();

        for item in items {
            let id = item.id();
            let segments: Vec<&str> = id.split('/').collect();

            if segments.len() > prefix_depth {
                let common = segments[..prefix_depth].join("/");
                if seen.insert(common.clone()) {
                    common_prefixes.push(CommonPrefix {
                        prefix: format!("{}/", common),
                    });
                }
                continue;
            }

            let (key, size) = if id.ends_with('/') {
                (id.to_string(), 0)
            } else if is_dir(item.as_ref()) {
                if seen.insert(id.to_string()) {
                    common_prefixes.push(CommonPrefix {
                        prefix: format!("{}/", id),
                    });
                }
                continue;
            } else {
                (id.to_string(), item.size())
            };

            if key.is_empty() {
                continue;
            }

            contents.push(ListContent {
                key,
                last_modified: item
                    .last_modified()
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
                etag: item.etag().to_string(),
                size,
                storage_class: "STANDARD".to_string(),
            });
        }

        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            is_truncated: !marker.is_empty(),
            marker,
            max_keys,
            contents,
            common_prefixes,
        }
    }

    pub fn to_xml(&self) -> Result<String, StorageError> {
        quick_xml::se::to_string(self)
            .map_err(|err| StorageError::Backend(format!("cannot encode listing: {}", err)))
    }
}

impl Storage {
    /// List a bucket in the S3 `ListBucketResult` XML format.
    ///
    /// `prefix` is logical and gets the configuration's path prefix in front;
    /// `marker` continues a previous page.
    pub async fn list(&self, obj: &FileObjectRef, max_keys: usize, prefix: &str, marker: &str) -> Response {
        let container = match self.client(obj, "List").await {
            Ok(container) => container,
            Err(res) => return res,
        };

        let joined = join(&[&obj.storage.path_prefix, prefix]);
        let prefix = joined.trim_start_matches('/');

        // local-meta tracks directories explicitly; listing one that was
        // never created is a miss
        if obj.kind() == StorageKind::LocalMeta && !prefix.is_empty() {
            if let Err(err) = container.item(prefix).await {
                if err.is_not_found() {
                    tracing::info!(bucket = %obj.bucket, prefix, sc = 404, "Storage/List prefix not found");
                    return Response::from_buf(StatusCode::NOT_FOUND, obj.key.clone());
                }
                tracing::warn!(bucket = %obj.bucket, prefix, sc = 500, error = %err, "Storage/List prefix lookup");
                return Response::from_error(StatusCode::INTERNAL_SERVER_ERROR, &err);
            }
        }

        let (items, next_marker) = match container.items(prefix, marker, max_keys).await {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(bucket = %obj.bucket, prefix, sc = 500, error = %err, "Storage/List");
                return Response::from_error(StatusCode::INTERNAL_SERVER_ERROR, &err);
            }
        };

        let result = ListBucketResult::build(&obj.bucket, prefix, next_marker, max_keys, &items);
        match result.to_xml() {
            Ok(xml) => {
                let mut res = Response::from_buf(StatusCode::OK, xml);
                res.set_content_type("application/xml");
                res
            }
            Err(err) => {
                tracing::warn!(bucket = %obj.bucket, prefix, sc = 500, error = %err, "Storage/List xml encode");
                Response::from_error(StatusCode::INTERNAL_SERVER_ERROR, &err)
            }
        }
    }
}
