//! Timestamp recognition for log lines.
//!
//! Two related jobs live here. Detection answers "does this text contain
//! something that looks like a log timestamp", which the classifier uses.
//! Extraction turns the first date-bearing timestamp in a line into a
//! [`NaiveDateTime`], which the datetime filter uses.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};

/// Storage and display format for datetime filter bounds.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Detection regexes, tried in this order. Any hit qualifies.
static DETECTORS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // ISO date, optionally with time: 2024-01-15 / 2024-01-15T12:30:45
        r"\d{4}[-/]\d{2}[-/]\d{2}(?:T\d{2}:\d{2}:\d{2})?",
        // US date-time: 01-15-2024 12:30:45
        r"\d{2}[-/]\d{2}[-/]\d{4}\s+\d{2}:\d{2}:\d{2}",
        // Bracketed: [2024-01-15 12:30:45]
        r"\[\d{4}[-/]\d{2}[-/]\d{2}[T\s]\d{2}:\d{2}:\d{2}\]",
        // Bare time: 12:30:45
        r"\b\d{2}:\d{2}:\d{2}\b",
        // Syslog: Jan 15 12:30
        r"\b[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}",
    ]
    .into_iter()
    .filter_map(|source| match Regex::new(source) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to compile timestamp detector");
            None
        }
    })
    .collect()
});

type Converter = fn(&Captures<'_>) -> Option<NaiveDateTime>;

/// Extraction regexes paired with their converters, tried in this order.
///
/// Only date-bearing formats are extractable; a bare time or a syslog stamp
/// without a year never excludes a line from counting.
static EXTRACTORS: LazyLock<Vec<(Regex, Converter)>> = LazyLock::new(|| {
    let table: [(&str, Converter); 4] = [
        (
            r"(\d{4})[-/](\d{2})[-/](\d{2})[T\s](\d{2}):(\d{2}):(\d{2})",
            |c| datetime(field(c, 1)?, field(c, 2)?, field(c, 3)?, field(c, 4)?, field(c, 5)?, field(c, 6)?),
        ),
        (r"(\d{4})[-/](\d{2})[-/](\d{2})", |c| {
            datetime(field(c, 1)?, field(c, 2)?, field(c, 3)?, 0, 0, 0)
        }),
        (
            r"(\d{2})[-/](\d{2})[-/](\d{4})\s+(\d{2}):(\d{2}):(\d{2})",
            |c| datetime(field(c, 3)?, field(c, 1)?, field(c, 2)?, field(c, 4)?, field(c, 5)?, field(c, 6)?),
        ),
        (
            r"\[(\d{4})[-/](\d{2})[-/](\d{2})[T\s](\d{2}):(\d{2}):(\d{2})",
            |c| datetime(field(c, 1)?, field(c, 2)?, field(c, 3)?, field(c, 4)?, field(c, 5)?, field(c, 6)?),
        ),
    ];
    table
        .into_iter()
        .filter_map(|(source, convert)| Regex::new(source).ok().map(|re| (re, convert)))
        .collect()
});

fn field(caps: &Captures<'_>, index: usize) -> Option<u32> {
    caps.get(index)?.as_str().parse().ok()
}

fn datetime(year: u32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<NaiveDateTime> {
    let year = i32::try_from(year).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, min, sec)
}

/// Returns `true` if `text` contains at least one recognized timestamp.
#[must_use]
pub fn contains_timestamp(text: &str) -> bool {
    DETECTORS.iter().any(|re| re.is_match(text))
}

/// Extract the first recognizable date-bearing timestamp from a line.
///
/// Formats are tried in a fixed order; a match that does not form a valid
/// calendar date (month 13, February 30) falls through to the next format.
#[must_use]
pub fn extract_timestamp(line: &str) -> Option<NaiveDateTime> {
    EXTRACTORS
        .iter()
        .find_map(|(re, convert)| re.captures(line).and_then(|caps| convert(&caps)))
}

/// Parse a datetime in [`DATETIME_FORMAT`] or ISO `T`-separated form.
#[must_use]
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
