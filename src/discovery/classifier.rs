//! Heuristic log file classification.
//!
//! Rules, first match wins:
//! 1. `.log` / `.logs` extension.
//! 2. File name contains "log" and a bounded content prefix contains a
//!    recognized timestamp.
//! 3. Anything else is not a log file.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::matcher::contains_timestamp;

/// Default number of leading bytes inspected for timestamps.
pub const DEFAULT_PREFIX_BYTES: usize = 64 * 1024;

const LOG_EXTENSIONS: [&str; 2] = ["log", "logs"];

/// Why a path was or was not classified as a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyReason {
    /// Has a `.log` or `.logs` extension.
    Extension,
    /// Name contains "log" and the prefix contains a timestamp.
    NameAndTimestamp,
    /// Name contains "log" but no timestamp was found in the prefix.
    NoTimestamp,
    /// Name does not contain "log".
    NameMismatch,
    /// Prefix contains NUL bytes or invalid UTF-8.
    Binary,
    /// The file could not be read.
    Unreadable(String),
}

impl fmt::Display for ClassifyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extension => write!(f, "log extension"),
            Self::NameAndTimestamp => write!(f, "name contains 'log' and content has timestamps"),
            Self::NoTimestamp => write!(f, "name contains 'log' but no timestamp found"),
            Self::NameMismatch => write!(f, "name does not look like a log"),
            Self::Binary => write!(f, "binary or non-UTF-8 content"),
            Self::Unreadable(e) => write!(f, "unreadable: {e}"),
        }
    }
}

/// Result of classifying one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub is_log_file: bool,
    pub reason: ClassifyReason,
}

impl Classification {
    fn log(reason: ClassifyReason) -> Self {
        Self {
            is_log_file: true,
            reason,
        }
    }

    fn not_log(reason: ClassifyReason) -> Self {
        Self {
            is_log_file: false,
            reason,
        }
    }
}

/// Decides whether a path is a log file. Read-only.
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    prefix_bytes: usize,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            prefix_bytes: DEFAULT_PREFIX_BYTES,
        }
    }
}

impl Classifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect at most `prefix_bytes` of content for rule 2.
    #[must_use]
    pub fn with_prefix_bytes(prefix_bytes: usize) -> Self {
        Self {
            prefix_bytes: prefix_bytes.max(1),
        }
    }

    #[must_use]
    pub fn prefix_bytes(&self) -> usize {
        self.prefix_bytes
    }

    /// Classify a path. Never fails; I/O problems yield "not a log file".
    #[must_use]
    pub fn classify(&self, path: &Path) -> Classification {
        if has_log_extension(path) {
            return Classification::log(ClassifyReason::Extension);
        }

        let name_has_log = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().to_lowercase().contains("log"));
        if !name_has_log {
            return Classification::not_log(ClassifyReason::NameMismatch);
        }

        let prefix = match self.read_prefix(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Cannot read file for classification");
                return Classification::not_log(ClassifyReason::Unreadable(e.to_string()));
            }
        };

        let Some(text) = prefix_text(&prefix) else {
            return Classification::not_log(ClassifyReason::Binary);
        };

        if contains_timestamp(text) {
            Classification::log(ClassifyReason::NameAndTimestamp)
        } else {
            Classification::not_log(ClassifyReason::NoTimestamp)
        }
    }

    /// Shorthand for `classify(path).is_log_file`.
    #[must_use]
    pub fn is_log_file(&self, path: &Path) -> bool {
        self.classify(path).is_log_file
    }

    fn read_prefix(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let file = File::open(path)?;
        let mut buf = Vec::with_capacity(self.prefix_bytes.min(8192));
        file.take(self.prefix_bytes as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

fn has_log_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| LOG_EXTENSIONS.contains(&ext.as_str()))
}

/// Decode the prefix as UTF-8, tolerating a code point cut at the boundary.
fn prefix_text(bytes: &[u8]) -> Option<&str> {
    if bytes.contains(&0) {
        return None;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(text),
        // error_len() == None means the input ended mid-sequence
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&bytes[..e.valid_up_to()]).ok(),
        Err(_) => None,
    }
}
