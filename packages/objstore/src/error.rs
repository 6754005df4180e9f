// Error taxonomy shared by drivers, the registry and object operations
use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend reports the key (or container) does not exist
    #[error("item not found: {0}")]
    NotFound(String),

    /// Dial or configuration failure; the backend cannot be reached at all
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Any other failure reported by a backend
    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// HTTP status this error surfaces as at the operation boundary
    pub fn status(&self) -> StatusCode {
        match self {
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            StorageError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            StorageError::Backend(_) | StorageError::InvalidKey(_) | StorageError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Map an IO error, turning a missing path into `NotFound` for `key`
    pub fn from_io(err: std::io::Error, key: &str) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(StorageError::NotFound("k".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            StorageError::Unavailable("dial".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            StorageError::Backend("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_from_io_not_found() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(StorageError::from_io(err, "a/b").is_not_found());

        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(StorageError::from_io(err, "a/b"), StorageError::Io(_)));
    }
}
