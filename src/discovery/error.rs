//! Discovery error types.

use std::path::PathBuf;

/// Errors that can occur while discovering log files.
#[derive(thiserror::Error, Debug)]
pub enum DiscoveryError {
    /// Scan root is missing or unreadable.
    #[error("Cannot read directory {path}: {source}")]
    RootNotFound {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Scan root is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}
