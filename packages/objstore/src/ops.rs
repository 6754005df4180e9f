// Get / Head / Set / Delete over any configured backend
use crate::key::native_key;
use crate::metadata::{apply_to_response, from_request_headers, is_dir, resolve_content_type};
use crate::object::FileObjectRef;
use crate::registry::ClientRegistry;
use crate::response::{Body, Response};
use crate::storage::{ByteStream, Container, Item, StorageKind};
use chrono::{DateTime, Utc};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use std::time::Instant;

/// Body of a 404 for Get and Head
pub const NOT_FOUND_BODY: &str = "{\"error\":\"item not found\"}";

/// Uniform object operations on top of a [`ClientRegistry`].
///
/// Every operation returns a [`Response`]; backend errors are logged and
/// mapped to a status code, never returned.
pub struct Storage {
    pub(crate) registry: ClientRegistry,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new(ClientRegistry::default())
    }
}

impl Storage {
    pub fn new(registry: ClientRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Container for `obj`, or the 503 to return instead
    pub(crate) async fn client(&self, obj: &FileObjectRef, op: &str) -> Result<Arc<dyn Container>, Response> {
        self.registry.resolve(obj).await.map_err(|err| {
            tracing::info!(
                bucket = %obj.bucket,
                key = %obj.key,
                kind = %obj.kind(),
                sc = 503,
                error = %err,
                "Storage/{} get client",
                op
            );
            Response::from_error(StatusCode::SERVICE_UNAVAILABLE, &err)
        })
    }

    /// Fetch an object with its content stream
    pub async fn get(&self, obj: &FileObjectRef) -> Response {
        let started = Instant::now();
        let res = self.fetch(obj, true).await;
        log_timing("get", obj, &res, started);
        res
    }

    /// Like [`Storage::get`] without opening the content
    pub async fn head(&self, obj: &FileObjectRef) -> Response {
        let started = Instant::now();
        let res = self.fetch(obj, false).await;
        log_timing("head", obj, &res, started);
        res
    }

    async fn fetch(&self, obj: &FileObjectRef, with_content: bool) -> Response {
        let op = if with_content { "Get" } else { "Head" };
        let container = match self.client(obj, op).await {
            Ok(container) => container,
            Err(res) => return res,
        };
        let key = native_key(&obj.storage, &obj.key);

        let item = match container.item(&key).await {
            Ok(item) => item,
            Err(err) if err.is_not_found() => {
                tracing::info!(bucket = %obj.bucket, key = %obj.key, native_key = %key, sc = 404, "Storage/{} item response", op);
                return Response::from_json_str(StatusCode::NOT_FOUND, NOT_FOUND_BODY);
            }
            Err(err) => {
                tracing::info!(bucket = %obj.bucket, key = %obj.key, kind = %obj.kind(), sc = 500, error = %err, "Storage/{} item response", op);
                return Response::from_error(StatusCode::INTERNAL_SERVER_ERROR, &err);
            }
        };

        if !with_content {
            return prepare_response(obj, None, item.as_ref());
        }

        // directories exist but have no content to serve
        if is_dir(item.as_ref()) {
            let mut res = Response::no_content(StatusCode::NOT_FOUND);
            res.set_content_type("application/xml");
            return res;
        }

        match item.open().await {
            Ok(stream) => prepare_response(obj, Some(stream), item.as_ref()),
            Err(err) => {
                tracing::warn!(bucket = %obj.bucket, key = %obj.key, kind = %obj.kind(), sc = 500, error = %err, "Storage/Get open item");
                Response::from_error(StatusCode::INTERNAL_SERVER_ERROR, &err)
            }
        }
    }

    /// Store an object. Request headers supply its metadata.
    pub async fn set(
        &self,
        obj: &FileObjectRef,
        headers: &HeaderMap,
        content_length: u64,
        body: ByteStream,
    ) -> Response {
        let started = Instant::now();
        let res = self.store(obj, headers, content_length, body).await;
        log_timing("set", obj, &res, started);
        res
    }

    async fn store(
        &self,
        obj: &FileObjectRef,
        headers: &HeaderMap,
        content_length: u64,
        body: ByteStream,
    ) -> Response {
        let container = match self.client(obj, "Set").await {
            Ok(container) => container,
            Err(res) => return res,
        };
        let key = native_key(&obj.storage, &obj.key);

        // s3 has no directories; an empty write to a key ending in a
        // separator only asks for one
        if obj.kind() == StorageKind::S3 && content_length == 0 && key.ends_with('/') {
            return Response::no_content(StatusCode::OK);
        }

        let metadata = from_request_headers(obj.kind(), headers);
        if let Err(err) = container.put(&key, body, content_length, metadata).await {
            tracing::warn!(bucket = %obj.bucket, key = %obj.key, kind = %obj.kind(), sc = 500, error = %err, "Storage/Set cannot set");
            return Response::from_error(StatusCode::INTERNAL_SERVER_ERROR, &err);
        }

        let mut res = Response::no_content(StatusCode::OK);
        if let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
            res.set_content_type(content_type);
        }
        res
    }

    /// Remove an object. Removing an absent object succeeds.
    pub async fn delete(&self, obj: &FileObjectRef) -> Response {
        let started = Instant::now();
        let res = self.remove(obj).await;
        log_timing("delete", obj, &res, started);
        res
    }

    async fn remove(&self, obj: &FileObjectRef) -> Response {
        let container = match self.client(obj, "Delete").await {
            Ok(container) => container,
            Err(res) => return res,
        };

        let head = self.fetch(obj, false).await;
        match head.status {
            StatusCode::OK => {
                let key = native_key(&obj.storage, &obj.key);
                match container.remove_item(&key).await {
                    Ok(()) => Response::no_content(StatusCode::OK),
                    // raced with another delete
                    Err(err) if err.is_not_found() => Response::no_content(StatusCode::OK),
                    Err(err) => {
                        tracing::warn!(bucket = %obj.bucket, key = %obj.key, kind = %obj.kind(), sc = 500, error = %err, "Storage/Delete cannot delete");
                        Response::from_error(StatusCode::INTERNAL_SERVER_ERROR, &err)
                    }
                }
            }
            StatusCode::NOT_FOUND => Response::no_content(StatusCode::OK),
            _ => head,
        }
    }
}

/// Headers and body for a found item
fn prepare_response(obj: &FileObjectRef, stream: Option<ByteStream>, item: &dyn Item) -> Response {
    let metadata = match item.metadata() {
        Ok(metadata) => metadata,
        Err(err) => {
            tracing::warn!(bucket = %obj.bucket, key = %obj.key, kind = %obj.kind(), sc = 500, error = %err, "Storage/prepareResponse read metadata error");
            return Response::from_error(StatusCode::INTERNAL_SERVER_ERROR, &err);
        }
    };

    let body = match stream {
        Some(stream) => Body::Stream(stream),
        None => Body::Empty,
    };
    let mut res = Response::new(StatusCode::OK, body);
    apply_to_response(obj.kind(), &metadata, &mut res);

    res.content_length = Some(item.size());
    if !item.etag().is_empty() {
        res.set("etag", item.etag());
    }
    res.set("last-modified", &http_date(item.last_modified()));

    if let Some(content_type) = resolve_content_type(obj, &metadata, is_dir(item)) {
        res.set_content_type(&content_type);
    }

    res
}

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn log_timing(method: &str, obj: &FileObjectRef, res: &Response, started: Instant) {
    tracing::debug!(
        method,
        storage = %obj.kind(),
        sc = res.status.as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "storage_time"
    );
}
