//! Error types for the attic attachment store.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias using attic's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for attachment store operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O failure on a specific storage file
    #[error("Storage error on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored archive, metadata, or index could not be parsed
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The ambient transaction could not be committed
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an I/O error with the path it happened on.
    pub fn file_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// True for `NotFound`, and for storage errors whose cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Storage { source, .. } | Error::Io(source) => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("test resource".to_string());
        assert_eq!(err.to_string(), "Not found: test resource");
    }

    #[test]
    fn test_error_display_storage() {
        let err = Error::file_io(
            "/data/storage/wiki/file",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(
            err.to_string(),
            "Storage error on /data/storage/wiki/file: denied"
        );
    }

    #[test]
    fn test_error_display_corrupt() {
        let err = Error::Corrupt("bad archive".to_string());
        assert_eq!(err.to_string(), "Corrupt data: bad archive");
    }

    #[test]
    fn test_error_display_transaction() {
        let err = Error::Transaction("rollback only".to_string());
        assert_eq!(err.to_string(), "Transaction error: rollback only");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing work dir".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing work dir");
    }

    #[test]
    fn test_error_display_invalid_input() {
        let err = Error::InvalidInput("empty filename".to_string());
        assert_eq!(err.to_string(), "Invalid input: empty filename");
    }

    #[test]
    fn test_error_display_internal() {
        let err = Error::Internal("unexpected state".to_string());
        assert_eq!(err.to_string(), "Internal error: unexpected state");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::NotFound("x".to_string()).is_not_found());
        assert!(Error::file_io("/x", io::Error::from(io::ErrorKind::NotFound)).is_not_found());
        assert!(!Error::file_io("/x", io::Error::from(io::ErrorKind::PermissionDenied))
            .is_not_found());
        assert!(!Error::Corrupt("x".to_string()).is_not_found());
    }

    #[test]
    fn test_storage_error_source() {
        use std::error::Error as _;
        let err = Error::file_io("/x", io::Error::new(io::ErrorKind::Other, "disk full"));
        let source = err.source().expect("storage error carries a source");
        assert_eq!(source.to_string(), "disk full");
    }
}
