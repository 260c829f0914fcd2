//! Line matching: patterns, datetime filtering and timestamp recognition.

mod error;
mod filter;
mod pattern;
mod timestamp;

pub use error::PatternError;
pub use filter::DatetimeFilter;
pub use pattern::{default_patterns, MatchResult, Pattern, PatternSet, REGEX_MARKER};
pub use timestamp::{contains_timestamp, extract_timestamp, parse_datetime, DATETIME_FORMAT};
