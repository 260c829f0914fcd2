//! Index error types.

use std::path::PathBuf;

/// Errors that can occur while loading, saving or mutating the index.
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// Persisted index exists but cannot be parsed.
    #[error("Corrupt index file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Persistence directory cannot be written.
    #[error("Index location not writable {path}: {source}")]
    Unwritable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Path is not in the index.
    #[error("File not indexed: {0}")]
    FileNotIndexed(PathBuf),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_not_indexed_display() {
        let err = IndexError::FileNotIndexed(PathBuf::from("/var/log/app.log"));
        assert_eq!(err.to_string(), "File not indexed: /var/log/app.log");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: IndexError = io_err.into();
        assert!(matches!(err, IndexError::Io(_)));
    }
}
