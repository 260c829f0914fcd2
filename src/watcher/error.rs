//! Watcher error types.

use std::path::PathBuf;

use crate::discovery::DiscoveryError;
use crate::index::IndexError;
use crate::matcher::PatternError;

/// Errors that can occur while reading or watching a file.
#[derive(thiserror::Error, Debug)]
pub enum WatcherError {
    /// Permission denied accessing file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Notify watcher error.
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by engine commands.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Pattern or filter rejected.
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// Index mutation or persistence failed.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Scan could not start.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// File read or watch failed.
    #[error(transparent)]
    Watcher(#[from] WatcherError),

    /// Path given to a command does not exist.
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Background task panicked or was aborted.
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_display() {
        let err = WatcherError::PermissionDenied(PathBuf::from("/root/secret.log"));
        assert_eq!(err.to_string(), "Permission denied: /root/secret.log");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let watcher_err: WatcherError = io_err.into();
        assert!(matches!(watcher_err, WatcherError::Io(_)));
        assert!(watcher_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_from_notify_error() {
        let notify_err = notify::Error::generic("test error");
        let watcher_err: WatcherError = notify_err.into();
        assert!(matches!(watcher_err, WatcherError::Notify(_)));
        assert!(watcher_err.to_string().contains("File watcher error"));
    }

    #[test]
    fn test_engine_error_is_transparent() {
        let err: EngineError = PatternError::Empty.into();
        assert_eq!(err.to_string(), "Pattern text is empty");
    }
}
