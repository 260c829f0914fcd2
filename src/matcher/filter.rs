//! Datetime range filter applied after pattern matching.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::error::PatternError;

/// Optional `[start, end]` bounds on line timestamps. Both ends inclusive.
///
/// The filter only ever excludes: a line with no extractable timestamp is
/// always eligible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatetimeFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end: Option<NaiveDateTime>,
}

impl DatetimeFilter {
    /// Create a filter.
    ///
    /// # Errors
    ///
    /// Returns `PatternError::InvalidRange` if both bounds are set and
    /// `start > end`.
    pub fn new(
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Self, PatternError> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(PatternError::InvalidRange { start: s, end: e });
            }
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn start(&self) -> Option<NaiveDateTime> {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> Option<NaiveDateTime> {
        self.end
    }

    /// A filter with neither bound set excludes nothing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    /// Check whether a line with the given timestamp may be counted.
    #[must_use]
    pub fn admits(&self, timestamp: Option<NaiveDateTime>) -> bool {
        let Some(ts) = timestamp else {
            return true;
        };
        if self.start.is_some_and(|s| ts < s) {
            return false;
        }
        if self.end.is_some_and(|e| ts > e) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::timestamp::parse_datetime;

    fn day_filter() -> DatetimeFilter {
        DatetimeFilter::new(
            parse_datetime("2024-01-01 00:00:00"),
            parse_datetime("2024-01-01 23:59:59"),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_inverted_range() {
        let result = DatetimeFilter::new(
            parse_datetime("2024-02-01 00:00:00"),
            parse_datetime("2024-01-01 00:00:00"),
        );
        assert!(matches!(result, Err(PatternError::InvalidRange { .. })));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let filter = day_filter();
        assert!(filter.admits(parse_datetime("2024-01-01 00:00:00")));
        assert!(filter.admits(parse_datetime("2024-01-01 23:59:59")));
        assert!(!filter.admits(parse_datetime("2024-01-02 00:00:01")));
        assert!(!filter.admits(parse_datetime("2023-12-31 23:59:59")));
    }

    #[test]
    fn test_missing_timestamp_is_admitted() {
        assert!(day_filter().admits(None));
    }

    #[test]
    fn test_open_ended() {
        let filter = DatetimeFilter::new(parse_datetime("2024-01-01 00:00:00"), None).unwrap();
        assert!(filter.is_active());
        assert!(filter.admits(parse_datetime("2030-01-01 00:00:00")));
        assert!(!filter.admits(parse_datetime("2020-01-01 00:00:00")));
        assert!(!DatetimeFilter::default().is_active());
    }
}
