//! Pattern error types.

use chrono::NaiveDateTime;

/// Errors raised when building patterns or filters.
#[derive(thiserror::Error, Debug)]
pub enum PatternError {
    /// Pattern text is empty after trimming.
    #[error("Pattern text is empty")]
    Empty,

    /// Regex source failed to compile.
    #[error("Invalid regex pattern {source_text:?}: {error}")]
    InvalidRegex {
        source_text: String,
        #[source]
        error: regex::Error,
    },

    /// No pattern with the given text exists.
    #[error("Pattern not found: {0}")]
    NotFound(String),

    /// Another pattern already has the same normalized text.
    #[error("Pattern already exists: {0}")]
    Duplicate(String),

    /// Datetime filter start is after its end.
    #[error("Invalid datetime range: start {start} is after end {end}")]
    InvalidRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}
