//! Index record types.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::matcher::MatchResult;

/// Default bound on recent matches kept per file.
pub const DEFAULT_MAX_RECENT_MATCHES: usize = 50;

/// How a file entered the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "dir", rename_all = "snake_case")]
pub enum FileOrigin {
    /// Found in a watched directory; removed with it.
    Directory(PathBuf),
    /// Found by a tree scan.
    Scan,
    /// Added explicitly.
    #[default]
    Manual,
}

/// Resume point for incremental reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorState {
    /// Byte position after the last consumed line.
    pub offset: u64,
    /// Modification time observed at the last read.
    pub modified: Option<DateTime<Utc>>,
    /// Lines before `offset`, if known.
    pub lines_read: Option<u64>,
}

impl CursorState {
    /// Cursor at the start of a file.
    #[must_use]
    pub fn start() -> Self {
        Self {
            offset: 0,
            modified: None,
            lines_read: Some(0),
        }
    }

    /// Cursor at `offset` with an unknown line count.
    #[must_use]
    pub fn at(offset: u64, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            offset,
            modified,
            lines_read: if offset == 0 { Some(0) } else { None },
        }
    }
}

/// One remembered match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentMatch {
    pub line_number: u64,
    pub text: String,
    /// Timestamp found in the line itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,
    /// Patterns that matched.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// When the engine saw the match.
    pub detected_at: DateTime<Utc>,
}

/// State of one monitored log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WatchedFile {
    #[serde(default, alias = "position")]
    pub offset: u64,
    #[serde(default, alias = "mtime", deserialize_with = "deserialize_modified")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default, alias = "error_count")]
    pub match_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_read: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_match_at: Option<DateTime<Utc>>,
    /// A match arrived since the last acknowledgment.
    #[serde(default)]
    pub unacknowledged: bool,
    #[serde(default)]
    pub origin: FileOrigin,
    #[serde(default)]
    pub recent_matches: VecDeque<RecentMatch>,
}

impl WatchedFile {
    /// A new entry positioned at `cursor`.
    #[must_use]
    pub fn new(cursor: CursorState, origin: FileOrigin) -> Self {
        Self {
            offset: cursor.offset,
            modified: cursor.modified,
            lines_read: cursor.lines_read,
            origin,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn cursor(&self) -> CursorState {
        CursorState {
            offset: self.offset,
            modified: self.modified,
            lines_read: self.lines_read,
        }
    }

    pub fn set_cursor(&mut self, cursor: CursorState) {
        self.offset = cursor.offset;
        self.modified = cursor.modified;
        self.lines_read = cursor.lines_read;
    }

    /// Count a match and remember it, evicting the oldest beyond `max_recent`.
    pub fn record_match(&mut self, result: MatchResult, max_recent: usize, now: DateTime<Utc>) {
        self.match_count += 1;
        self.last_match_at = Some(now);
        self.unacknowledged = true;
        self.recent_matches.push_back(RecentMatch {
            line_number: result.line_number,
            text: result.text,
            timestamp: result.timestamp,
            patterns: result.patterns,
            detected_at: now,
        });
        while self.recent_matches.len() > max_recent {
            self.recent_matches.pop_front();
        }
    }

    /// Zero the count and forget recent matches.
    pub fn reset_count(&mut self) {
        self.match_count = 0;
        self.recent_matches.clear();
        self.last_match_at = None;
        self.unacknowledged = false;
    }

    pub fn clear_recent(&mut self) {
        self.recent_matches.clear();
    }

    pub fn acknowledge(&mut self) {
        self.unacknowledged = false;
    }
}

/// Display status the presentation layer derives per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    /// Normal.
    Watching,
    /// A match occurred since the last acknowledgment.
    MatchedRecently,
    /// No directories/files or no patterns are configured.
    Unconfigured,
}

/// Accept RFC 3339 strings, or float epoch seconds written by older versions.
fn deserialize_modified<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Time(DateTime<Utc>),
        Epoch(f64),
    }

    Ok(match Option::<Repr>::deserialize(deserializer)? {
        Some(Repr::Time(t)) => Some(t),
        #[allow(clippy::cast_possible_truncation)]
        Some(Repr::Epoch(secs)) if secs > 0.0 => {
            let whole = secs.trunc() as i64;
            let nanos = ((secs - secs.trunc()) * 1e9) as u32;
            DateTime::from_timestamp(whole, nanos)
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(line: u64) -> MatchResult {
        MatchResult {
            line_number: line,
            text: format!("error {line}"),
            patterns: vec!["error".to_string()],
            timestamp: None,
        }
    }

    #[test]
    fn test_record_match_bounds_history() {
        let mut file = WatchedFile::new(CursorState::start(), FileOrigin::Manual);
        for line in 1..=5 {
            file.record_match(result(line), 3, Utc::now());
        }
        assert_eq!(file.match_count, 5);
        assert_eq!(file.recent_matches.len(), 3);
        assert_eq!(file.recent_matches.front().unwrap().line_number, 3);
        assert!(file.unacknowledged);
    }

    #[test]
    fn test_reset_count() {
        let mut file = WatchedFile::new(CursorState::at(100, None), FileOrigin::Scan);
        file.record_match(result(1), 10, Utc::now());
        file.reset_count();
        assert_eq!(file.match_count, 0);
        assert!(file.recent_matches.is_empty());
        assert!(!file.unacknowledged);
        assert!(file.last_match_at.is_none());
        assert_eq!(file.offset, 100);
    }

    #[test]
    fn test_cursor_at_unknown_lines() {
        assert_eq!(CursorState::at(0, None).lines_read, Some(0));
        assert_eq!(CursorState::at(10, None).lines_read, None);
    }

    #[test]
    fn test_legacy_record_fields() {
        let json = r#"{"position": 42, "mtime": 1704067200.5, "error_count": 3}"#;
        let file: WatchedFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.offset, 42);
        assert_eq!(file.match_count, 3);
        assert_eq!(file.modified.unwrap().timestamp(), 1_704_067_200);
        assert_eq!(file.origin, FileOrigin::Manual);
    }

    #[test]
    fn test_zero_mtime_is_none() {
        let file: WatchedFile = serde_json::from_str(r#"{"position": 0, "mtime": 0}"#).unwrap();
        assert!(file.modified.is_none());
    }

    #[test]
    fn test_origin_serialization() {
        let origin = FileOrigin::Directory(PathBuf::from("/var/log"));
        let json = serde_json::to_string(&origin).unwrap();
        assert_eq!(json, r#"{"kind":"directory","dir":"/var/log"}"#);
        let scan: FileOrigin = serde_json::from_str(r#"{"kind":"scan"}"#).unwrap();
        assert_eq!(scan, FileOrigin::Scan);
    }
}
