//! Events emitted by the engine to the presentation layer.

use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::discovery::{ScanOutcome, ScanProgress};
use crate::index::FileOrigin;

/// Category of a surfaced error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// File could not be read this cycle; retried next cycle.
    FileUnreadable,
    /// Persisted index could not be parsed; started empty.
    CorruptPersistedState,
    /// Writing the index failed.
    PersistenceFailed,
    /// Filesystem notifications unavailable or failing.
    WatchFailed,
    /// A scan could not run.
    ScanFailed,
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A line matched and was counted.
    Match {
        path: PathBuf,
        line_number: u64,
        text: String,
        patterns: Vec<String>,
        timestamp: Option<NaiveDateTime>,
        /// Match count for the file after this match.
        count: u64,
    },
    /// A file entered the index.
    FileAdded { path: PathBuf, origin: FileOrigin },
    /// A file left the index.
    FileRemoved(PathBuf),
    /// A file shrank and is being read from the start.
    FileRotated(PathBuf),
    /// Scan progress report.
    ScanProgress {
        root: PathBuf,
        progress: ScanProgress,
    },
    /// Scan finished or was cancelled.
    ScanComplete { root: PathBuf, outcome: ScanOutcome },
    /// Full recount progress: `done` of `total` files.
    ReindexProgress { done: usize, total: usize },
    /// Something failed; `path` names the file when there is one.
    Error {
        path: Option<PathBuf>,
        kind: ErrorKind,
        message: String,
    },
    /// Degraded but running.
    Warning(String),
}

impl EngineEvent {
    pub(crate) fn error(path: Option<PathBuf>, kind: ErrorKind, message: impl ToString) -> Self {
        Self::Error {
            path,
            kind,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructor() {
        let event = EngineEvent::error(
            Some(PathBuf::from("/var/log/app.log")),
            ErrorKind::FileUnreadable,
            "Permission denied",
        );
        assert!(matches!(
            event,
            EngineEvent::Error { kind: ErrorKind::FileUnreadable, ref message, .. } if message == "Permission denied"
        ));
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::CorruptPersistedState).unwrap();
        assert_eq!(json, "\"corrupt_persisted_state\"");
    }
}
