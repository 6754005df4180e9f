// Outbound representation returned by every storage operation
use crate::storage::ByteStream;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use std::fmt;
use tokio::io::AsyncReadExt;

pub enum Body {
    Empty,
    Buffer(Bytes),
    Stream(ByteStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Buffer(buf) => write!(f, "Buffer({} bytes)", buf.len()),
            Body::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Status, headers and body of one operation's result. Owned by the caller.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// `None` when the length is unknown
    pub content_length: Option<u64>,
    body: Body,
}

impl Response {
    pub fn new(status: StatusCode, body: Body) -> Self {
        let content_length = match &body {
            Body::Empty => Some(0),
            Body::Buffer(buf) => Some(buf.len() as u64),
            Body::Stream(_) => None,
        };
        Self {
            status,
            headers: HeaderMap::new(),
            content_length,
            body,
        }
    }

    pub fn no_content(status: StatusCode) -> Self {
        Self::new(status, Body::Empty)
    }

    pub fn from_buf(status: StatusCode, buf: impl Into<Bytes>) -> Self {
        Self::new(status, Body::Buffer(buf.into()))
    }

    /// JSON text body
    pub fn from_json_str(status: StatusCode, body: &'static str) -> Self {
        let mut res = Self::from_buf(status, Bytes::from_static(body.as_bytes()));
        res.set_content_type("application/json");
        res
    }

    /// Error response with a `{"error": ...}` body
    pub fn from_error(status: StatusCode, err: &dyn std::error::Error) -> Self {
        let body = serde_json::json!({ "error": err.to_string() }).to_string();
        let mut res = Self::from_buf(status, body);
        res.set_content_type("application/json");
        res
    }

    /// Set a header, ignoring names or values that are not valid in HTTP
    pub fn set(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::debug!(header = name, "skipping invalid header"),
        }
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        if content_type.is_empty() {
            return;
        }
        if let Ok(value) = HeaderValue::from_str(content_type) {
            self.headers.insert(CONTENT_TYPE, value);
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Drain the body into memory
    pub async fn read_body(self) -> std::io::Result<Bytes> {
        match self.body {
            Body::Empty => Ok(Bytes::new()),
            Body::Buffer(buf) => Ok(buf),
            Body::Stream(mut stream) => {
                let mut buf = Vec::new();
                stream.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn test_error_body() {
        let res = Response::from_error(
            StatusCode::SERVICE_UNAVAILABLE,
            &StorageError::Unavailable("dial".into()),
        );
        assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(res.content_type(), Some("application/json"));
        match res.body() {
            Body::Buffer(buf) => {
                let json: serde_json::Value = serde_json::from_slice(buf).unwrap();
                assert_eq!(json["error"], "backend unavailable: dial");
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_set_skips_invalid_headers() {
        let mut res = Response::no_content(StatusCode::OK);
        res.set("x-amz-meta-ok", "yes");
        res.set("bad header", "x");
        res.set("x-newline", "a\nb");

        assert_eq!(res.header("x-amz-meta-ok"), Some("yes"));
        assert_eq!(res.headers.len(), 1);
        assert_eq!(res.content_length, Some(0));
    }

    #[tokio::test]
    async fn test_read_stream_body() {
        let res = Response::new(StatusCode::OK, Body::Stream(Box::new(&b"streamed"[..])));
        assert_eq!(res.content_length, None);
        assert_eq!(res.read_body().await.unwrap(), Bytes::from_static(b"streamed"));
    }
}
