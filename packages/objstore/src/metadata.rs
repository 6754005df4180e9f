// Translation between HTTP header conventions and backend metadata maps
use crate::object::FileObjectRef;
use crate::response::Response;
use crate::storage::{Item, MetaValue, Metadata, StorageKind};
use http::HeaderMap;

/// Prefix of user supplied metadata headers
pub const META_PREFIX: &str = "x-amz-meta-";

/// Content type reported for directories
pub const DIRECTORY_CONTENT_TYPE: &str = "application/directory";

/// Metadata to store for a write, filtered from the request headers.
///
/// Keeps `content-type`, `x-amz-meta-*` and, except for s3, `etag`. The s3
/// kind stores user metadata without its prefix since the backend adds it
/// back itself. Only the first value of a repeated header is kept.
pub fn from_request_headers(kind: StorageKind, headers: &HeaderMap) -> Metadata {
    let mut metadata = Metadata::new();

    for name in headers.keys() {
        // header names are already lowercase
        let key = name.as_str();
        let keep = key.starts_with("x-amz-meta")
            || key == "content-type"
            || (kind != StorageKind::S3 && key == "etag");
        if !keep {
            continue;
        }

        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };

        let stored = match kind {
            StorageKind::S3 => key.strip_prefix(META_PREFIX).unwrap_or(key),
            _ => key,
        };
        metadata.insert(stored.to_string(), MetaValue::from(value));
    }

    metadata
}

/// Copy stored metadata onto response headers.
///
/// `x-*` keys and `cache-control` always pass through. For s3 every stored
/// key is emitted: `cache-control` and `content-type` as is, anything else
/// under the `x-amz-meta-` prefix.
pub fn apply_to_response(kind: StorageKind, metadata: &Metadata, res: &mut Response) {
    for (key, value) in metadata {
        let key = key.to_lowercase();
        if key == "cache-control" || key.starts_with("x-") {
            res.set(&key, &value.to_string());
        }
    }

    if kind == StorageKind::S3 {
        for (key, value) in metadata {
            match key.as_str() {
                "cache-control" | "content-type" => res.set(key, &value.to_string()),
                _ => res.set(&format!("{}{}", META_PREFIX, key), &value.to_string()),
            }
        }
    }
}

/// Content type for a response: stored metadata first, then the extension
/// of the request path, then the directory sentinel for directories.
pub fn resolve_content_type(obj: &FileObjectRef, metadata: &Metadata, is_dir: bool) -> Option<String> {
    let stored = metadata
        .get("content-type")
        .or_else(|| metadata.get("Content-Type"));
    if let Some(value) = stored {
        return Some(value.to_string());
    }

    if let Some(guess) = mime_guess::from_path(&obj.uri_path).first() {
        return Some(guess.to_string());
    }

    is_dir.then(|| DIRECTORY_CONTENT_TYPE.to_string())
}

/// Whether an item is a directory.
///
/// An explicit `is_dir` flag wins, then a stored content type (directory only
/// if it is the sentinel), then an empty size. Items whose metadata cannot be
/// read are treated as regular files.
pub fn is_dir(item: &dyn Item) -> bool {
    match item.metadata() {
        Ok(metadata) => classify(&metadata, item.size()),
        Err(_) => false,
    }
}

fn classify(metadata: &Metadata, size: u64) -> bool {
    if let Some(flag) = metadata.get("is_dir") {
        match flag {
            MetaValue::Flag(b) => return *b,
            MetaValue::Text(s) if s.eq_ignore_ascii_case("true") => return true,
            MetaValue::Text(s) if s.eq_ignore_ascii_case("false") => return false,
            _ => {}
        }
    }

    let content_type = metadata
        .get("content-type")
        .or_else(|| metadata.get("Content-Type"));
    if let Some(content_type) = content_type {
        return content_type.as_str() == Some(DIRECTORY_CONTENT_TYPE);
    }

    size == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::{ByteStream, StorageConfig};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use http::header::HeaderName;
    use http::{HeaderValue, StatusCode};
    use std::sync::Arc;

    struct FakeItem {
        size: u64,
        metadata: Result<Metadata, ()>,
    }

    #[async_trait]
    impl Item for FakeItem {
        fn id(&self) -> &str {
            "fake"
        }
        fn name(&self) -> &str {
            "fake"
        }
        fn size(&self) -> u64 {
            self.size
        }
        fn etag(&self) -> &str {
            ""
        }
        fn last_modified(&self) -> DateTime<Utc> {
            Utc::now()
        }
        fn metadata(&self) -> Result<Metadata, StorageError> {
            self.metadata
                .clone()
                .map_err(|_| StorageError::Backend("unreadable".into()))
        }
        async fn open(&self) -> Result<ByteStream, StorageError> {
            Ok(Box::new(&b""[..]))
        }
    }

    fn item(size: u64, pairs: &[(&str, MetaValue)]) -> FakeItem {
        FakeItem {
            size,
            metadata: Ok(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()),
        }
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            let name = HeaderName::from_bytes(name.as_bytes()).unwrap();
            map.append(name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn test_is_dir_precedence() {
        assert!(is_dir(&item(10, &[("is_dir", true.into())])));
        assert!(is_dir(&item(10, &[("content-type", DIRECTORY_CONTENT_TYPE.into())])));
        assert!(is_dir(&item(0, &[])));
        assert!(!is_dir(&item(10, &[])));

        assert!(!is_dir(&item(0, &[("is_dir", false.into())])));
        assert!(!is_dir(&item(0, &[("content-type", "text/plain".into())])));
        assert!(is_dir(&item(10, &[("is_dir", "true".into())])));
        assert!(!is_dir(&item(0, &[("Content-Type", "image/png".into())])));
    }

    #[test]
    fn test_unreadable_metadata_is_not_dir() {
        let unreadable = FakeItem { size: 0, metadata: Err(()) };
        assert!(!is_dir(&unreadable));
    }

    #[test]
    fn test_inbound_s3_strips_prefix() {
        let map = headers(&[
            ("x-amz-meta-color", "red"),
            ("content-type", "text/plain"),
            ("etag", "\"abc\""),
            ("authorization", "secret"),
        ]);

        let metadata = from_request_headers(StorageKind::S3, &map);
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata["color"].as_str(), Some("red"));
        assert_eq!(metadata["content-type"].as_str(), Some("text/plain"));
    }

    #[test]
    fn test_inbound_other_kinds_keep_names_and_etag() {
        let mut map = headers(&[("X-Amz-Meta-Color", "red"), ("ETag", "\"abc\"")]);
        map.append("x-amz-meta-color", HeaderValue::from_static("blue"));

        let metadata = from_request_headers(StorageKind::Local, &map);
        assert_eq!(metadata["x-amz-meta-color"].as_str(), Some("red"));
        assert_eq!(metadata["etag"].as_str(), Some("\"abc\""));
    }

    #[test]
    fn test_outbound_passthrough() {
        let mut metadata = Metadata::new();
        metadata.insert("X-Amz-Meta-Color".into(), "red".into());
        metadata.insert("cache-control".into(), "max-age=60".into());
        metadata.insert("secret".into(), "hidden".into());

        let mut res = Response::no_content(StatusCode::OK);
        apply_to_response(StorageKind::Local, &metadata, &mut res);

        assert_eq!(res.header("x-amz-meta-color"), Some("red"));
        assert_eq!(res.header("cache-control"), Some("max-age=60"));
        assert_eq!(res.header("secret"), None);
    }

    #[test]
    fn test_outbound_s3_reprefixes() {
        let map = headers(&[("x-amz-meta-color", "red"), ("content-type", "text/plain")]);
        let stored = from_request_headers(StorageKind::S3, &map);

        let mut res = Response::no_content(StatusCode::OK);
        apply_to_response(StorageKind::S3, &stored, &mut res);

        assert_eq!(res.header("x-amz-meta-color"), Some("red"));
        assert_eq!(res.header("content-type"), Some("text/plain"));
        assert_eq!(res.header("x-amz-meta-content-type"), None);
    }

    #[test]
    fn test_content_type_resolution_order() {
        let config = Arc::new(StorageConfig::local("/srv"));
        let obj = FileObjectRef::new("b", "photo.png", config.clone());

        let mut metadata = Metadata::new();
        metadata.insert("Content-Type".into(), "image/webp".into());
        assert_eq!(resolve_content_type(&obj, &metadata, false).as_deref(), Some("image/webp"));

        assert_eq!(resolve_content_type(&obj, &Metadata::new(), false).as_deref(), Some("image/png"));

        let dir = FileObjectRef::new("b", "albums/", config);
        assert_eq!(
            resolve_content_type(&dir, &Metadata::new(), true).as_deref(),
            Some(DIRECTORY_CONTENT_TYPE)
        );
        assert_eq!(resolve_content_type(&dir, &Metadata::new(), false), None);
    }
}
