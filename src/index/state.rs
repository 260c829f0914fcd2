//! In-memory index state and its persisted snapshot form.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::error::IndexError;
use super::types::{CursorState, FileOrigin, WatchStatus, WatchedFile};
use crate::matcher::{DatetimeFilter, MatchResult, Pattern, PatternError, PatternSet};

/// Current snapshot format version.
pub const INDEX_VERSION: u32 = 1;

/// Serialized form of the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub directories: Vec<PathBuf>,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime_filter: Option<DatetimeFilter>,
    #[serde(default, deserialize_with = "deserialize_files")]
    pub files: BTreeMap<PathBuf, WatchedFile>,
    /// Files removed by hand that directory rechecks must not re-add.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub excluded: BTreeSet<PathBuf>,
    /// Configured values already merged in, so later starts do not undo
    /// commands that removed them.
    #[serde(default, skip_serializing_if = "SeedLedger::is_empty")]
    pub seeded: SeedLedger,
}

/// Configured directories, patterns and filter the index has absorbed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedLedger {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub directories: BTreeSet<PathBuf>,
    /// Normalized pattern keys.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub patterns: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime_filter: Option<DatetimeFilter>,
}

impl SeedLedger {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.patterns.is_empty() && self.datetime_filter.is_none()
    }
}

fn default_version() -> u32 {
    INDEX_VERSION
}

impl Default for IndexSnapshot {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            directories: Vec::new(),
            patterns: Vec::new(),
            datetime_filter: None,
            files: BTreeMap::new(),
            excluded: BTreeSet::new(),
            seeded: SeedLedger::default(),
        }
    }
}

/// Older indexes stored a bare list of paths.
fn deserialize_files<'de, D>(deserializer: D) -> Result<BTreeMap<PathBuf, WatchedFile>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Map(BTreeMap<PathBuf, WatchedFile>),
        List(Vec<PathBuf>),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Map(map) => map,
        Repr::List(paths) => paths
            .into_iter()
            .map(|p| (p, WatchedFile::new(CursorState::start(), FileOrigin::Manual)))
            .collect(),
    })
}

/// Result of applying a pull to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullApplied {
    /// Cursor advanced; `counts` holds the running match count after each
    /// counted match, in line order.
    Applied { counts: Vec<u64> },
    /// The entry was removed or its cursor changed during the read.
    Stale,
}

/// The registry of watched files, directories, patterns and filter.
#[derive(Debug, Clone)]
pub struct IndexState {
    files: BTreeMap<PathBuf, WatchedFile>,
    excluded: BTreeSet<PathBuf>,
    seeded: SeedLedger,
    directories: Vec<PathBuf>,
    patterns: PatternSet,
    filter: DatetimeFilter,
    max_recent: usize,
}

impl IndexState {
    /// Empty state keeping at most `max_recent` matches per file.
    #[must_use]
    pub fn new(max_recent: usize) -> Self {
        Self {
            files: BTreeMap::new(),
            excluded: BTreeSet::new(),
            seeded: SeedLedger::default(),
            directories: Vec::new(),
            patterns: PatternSet::new(),
            filter: DatetimeFilter::default(),
            max_recent: max_recent.max(1),
        }
    }

    /// Rebuild state from a snapshot, recompiling patterns.
    ///
    /// Patterns that no longer compile are dropped with a warning.
    #[must_use]
    pub fn from_snapshot(snapshot: IndexSnapshot, max_recent: usize) -> Self {
        let mut state = Self::new(max_recent);
        state.files = snapshot.files;
        state.excluded = snapshot.excluded;
        state.seeded = snapshot.seeded;
        for dir in snapshot.directories {
            state.add_directory(dir);
        }
        for pattern in snapshot.patterns {
            if let Err(e) = state.patterns.add(pattern) {
                tracing::warn!(error = %e, "Dropping persisted pattern");
            }
        }
        state.filter = snapshot.datetime_filter.unwrap_or_default();
        for file in state.files.values_mut() {
            while file.recent_matches.len() > state.max_recent {
                file.recent_matches.pop_front();
            }
        }
        state
    }

    #[must_use]
    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            version: INDEX_VERSION,
            directories: self.directories.clone(),
            patterns: self.patterns.patterns(),
            datetime_filter: self.filter.is_active().then_some(self.filter),
            files: self.files.clone(),
            excluded: self.excluded.clone(),
            seeded: self.seeded.clone(),
        }
    }

    // Files

    #[must_use]
    pub fn file(&self, path: &Path) -> Option<&WatchedFile> {
        self.files.get(path)
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }

    pub fn files(&self) -> impl Iterator<Item = (&PathBuf, &WatchedFile)> {
        self.files.iter()
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Register a file. Returns `false` if it was already indexed.
    pub fn register(&mut self, path: PathBuf, cursor: CursorState, origin: FileOrigin) -> bool {
        if self.files.contains_key(&path) {
            return false;
        }
        self.files.insert(path, WatchedFile::new(cursor, origin));
        true
    }

    /// Remove a file from the index.
    pub fn remove_file(&mut self, path: &Path) -> Option<WatchedFile> {
        self.files.remove(path)
    }

    /// Keep `path` out of directory rechecks until it is added again.
    pub fn exclude(&mut self, path: PathBuf) {
        self.excluded.insert(path);
    }

    /// Lift an exclusion. Returns `true` if `path` was excluded.
    pub fn include(&mut self, path: &Path) -> bool {
        self.excluded.remove(path)
    }

    #[must_use]
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.contains(path)
    }

    /// Move a file's cursor, keeping its counters.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::FileNotIndexed` for unknown paths.
    pub fn reposition(&mut self, path: &Path, cursor: CursorState) -> Result<(), IndexError> {
        let file = self.file_mut(path)?;
        file.set_cursor(cursor);
        Ok(())
    }

    /// Apply the outcome of reading `path` from cursor `from` to `to`.
    ///
    /// Nothing changes unless the stored cursor still equals `from`.
    pub fn apply_pull(
        &mut self,
        path: &Path,
        from: CursorState,
        to: CursorState,
        matches: Vec<MatchResult>,
        now: DateTime<Utc>,
    ) -> PullApplied {
        let max_recent = self.max_recent;
        let Some(file) = self.files.get_mut(path) else {
            return PullApplied::Stale;
        };
        if file.cursor() != from {
            return PullApplied::Stale;
        }
        file.set_cursor(to);
        let counts = matches
            .into_iter()
            .map(|m| {
                file.record_match(m, max_recent, now);
                file.match_count
            })
            .collect();
        PullApplied::Applied { counts }
    }

    /// Replace a file's counters with a full recount.
    ///
    /// Skipped (returns `false`) if the cursor moved since `from`.
    pub fn apply_recount(
        &mut self,
        path: &Path,
        from: CursorState,
        to: CursorState,
        matches: Vec<MatchResult>,
        now: DateTime<Utc>,
    ) -> bool {
        let max_recent = self.max_recent;
        let Some(file) = self.files.get_mut(path) else {
            return false;
        };
        if file.cursor() != from {
            return false;
        }
        file.reset_count();
        file.set_cursor(to);
        for m in matches {
            file.record_match(m, max_recent, now);
        }
        true
    }

    /// Zero one file's count and history.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::FileNotIndexed` for unknown paths.
    pub fn reset_count(&mut self, path: &Path) -> Result<(), IndexError> {
        self.file_mut(path)?.reset_count();
        Ok(())
    }

    pub fn reset_all_counts(&mut self) {
        for file in self.files.values_mut() {
            file.reset_count();
        }
    }

    /// Clear recent-match history for one file, or all when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::FileNotIndexed` for unknown paths.
    pub fn clear_recent(&mut self, path: Option<&Path>) -> Result<(), IndexError> {
        match path {
            Some(path) => self.file_mut(path)?.clear_recent(),
            None => self.files.values_mut().for_each(WatchedFile::clear_recent),
        }
        Ok(())
    }

    /// Mark matches as seen for one file, or all when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::FileNotIndexed` for unknown paths.
    pub fn acknowledge(&mut self, path: Option<&Path>) -> Result<(), IndexError> {
        match path {
            Some(path) => self.file_mut(path)?.acknowledge(),
            None => self.files.values_mut().for_each(WatchedFile::acknowledge),
        }
        Ok(())
    }

    fn file_mut(&mut self, path: &Path) -> Result<&mut WatchedFile, IndexError> {
        self.files
            .get_mut(path)
            .ok_or_else(|| IndexError::FileNotIndexed(path.to_path_buf()))
    }

    #[must_use]
    pub fn total_match_count(&self) -> u64 {
        self.files.values().map(|f| f.match_count).sum()
    }

    /// Files whose recent matches include `pattern_text`.
    #[must_use]
    pub fn files_for_pattern(&self, pattern_text: &str) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|(_, f)| {
                f.recent_matches
                    .iter()
                    .any(|m| m.patterns.iter().any(|p| p == pattern_text))
            })
            .map(|(p, _)| p.clone())
            .collect()
    }

    // Directories

    #[must_use]
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Add a watched directory. Returns `false` if already present.
    pub fn add_directory(&mut self, dir: PathBuf) -> bool {
        if self.directories.contains(&dir) {
            return false;
        }
        self.directories.push(dir);
        true
    }

    /// Remove a watched directory and the files it contributed.
    ///
    /// Returns the removed file paths, or `None` if the directory was not
    /// watched.
    pub fn remove_directory(&mut self, dir: &Path) -> Option<Vec<PathBuf>> {
        let position = self.directories.iter().position(|d| d == dir)?;
        self.directories.remove(position);
        let removed: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|(_, f)| matches!(&f.origin, FileOrigin::Directory(d) if d == dir))
            .map(|(p, _)| p.clone())
            .collect();
        for path in &removed {
            self.files.remove(path);
        }
        self.excluded.retain(|p| p.parent() != Some(dir));
        Some(removed)
    }

    // Patterns and filter

    #[must_use]
    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    /// # Errors
    ///
    /// Returns a `PatternError` if the pattern is empty or fails to compile.
    pub fn add_pattern(&mut self, pattern: Pattern) -> Result<bool, PatternError> {
        self.patterns.add(pattern)
    }

    pub fn remove_pattern(&mut self, text: &str) -> Option<Pattern> {
        self.patterns.remove(text)
    }

    /// # Errors
    ///
    /// See [`PatternSet::edit`].
    pub fn edit_pattern(&mut self, old_text: &str, pattern: Pattern) -> Result<(), PatternError> {
        self.patterns.edit(old_text, pattern)
    }

    #[must_use]
    pub fn filter(&self) -> DatetimeFilter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: DatetimeFilter) {
        self.filter = filter;
    }

    // Configured seeds

    /// Whether the configured directory `dir` was already merged in.
    #[must_use]
    pub fn is_seeded_directory(&self, dir: &Path) -> bool {
        self.seeded.directories.contains(dir)
    }

    /// Remember that the configured directory `dir` has been merged in.
    pub fn record_seeded_directory(&mut self, dir: PathBuf) {
        self.seeded.directories.insert(dir);
    }

    /// Merge a configured pattern unless it was merged on an earlier start.
    ///
    /// Returns `true` if the pattern was added to the active set.
    ///
    /// # Errors
    ///
    /// Returns a `PatternError` if the pattern is empty or fails to compile;
    /// nothing is recorded.
    pub fn seed_pattern(&mut self, pattern: Pattern) -> Result<bool, PatternError> {
        let key = pattern.normalized();
        if self.seeded.patterns.contains(&key) {
            return Ok(false);
        }
        let added = self.patterns.add(pattern)?;
        self.seeded.patterns.insert(key);
        Ok(added)
    }

    /// Apply the configured filter when it differs from the one last applied.
    ///
    /// Returns `true` if the active filter was replaced.
    pub fn seed_filter(&mut self, configured: Option<DatetimeFilter>) -> bool {
        if configured == self.seeded.datetime_filter {
            return false;
        }
        self.seeded.datetime_filter = configured;
        match configured {
            Some(filter) => {
                self.filter = filter;
                true
            }
            None => false,
        }
    }

    // Status

    /// Whether any source and any pattern are configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        (!self.directories.is_empty() || !self.files.is_empty()) && !self.patterns.is_empty()
    }

    /// Derived display status for one file, or for the whole index.
    #[must_use]
    pub fn status(&self, path: Option<&Path>) -> WatchStatus {
        if !self.is_configured() {
            return WatchStatus::Unconfigured;
        }
        let matched = match path {
            Some(path) => self.files.get(path).is_some_and(|f| f.unacknowledged),
            None => self.files.values().any(|f| f.unacknowledged),
        };
        if matched {
            WatchStatus::MatchedRecently
        } else {
            WatchStatus::Watching
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(line: u64) -> MatchResult {
        MatchResult {
            line_number: line,
            text: "boom error".to_string(),
            patterns: vec!["error".to_string()],
            timestamp: None,
        }
    }

    fn state_with(path: &str) -> IndexState {
        let mut state = IndexState::new(10);
        state.register(PathBuf::from(path), CursorState::start(), FileOrigin::Manual);
        state
    }

    #[test]
    fn test_register_is_unique() {
        let mut state = state_with("/var/log/a.log");
        assert!(!state.register(
            PathBuf::from("/var/log/a.log"),
            CursorState::at(5, None),
            FileOrigin::Scan
        ));
        assert_eq!(state.file(Path::new("/var/log/a.log")).unwrap().offset, 0);
    }

    #[test]
    fn test_apply_pull_advances_and_counts() {
        let mut state = state_with("/a.log");
        let path = Path::new("/a.log");
        let from = state.file(path).unwrap().cursor();
        let to = CursorState {
            offset: 30,
            modified: None,
            lines_read: Some(3),
        };
        let applied = state.apply_pull(path, from, to, vec![matched(1), matched(3)], Utc::now());
        assert_eq!(applied, PullApplied::Applied { counts: vec![1, 2] });
        assert_eq!(state.file(path).unwrap().offset, 30);
        assert_eq!(state.total_match_count(), 2);
    }

    #[test]
    fn test_apply_pull_is_stale_after_reposition() {
        let mut state = state_with("/a.log");
        let path = Path::new("/a.log");
        let from = state.file(path).unwrap().cursor();
        state.reposition(path, CursorState::at(99, None)).unwrap();
        let applied = state.apply_pull(path, from, CursorState::at(10, None), vec![matched(1)], Utc::now());
        assert_eq!(applied, PullApplied::Stale);
        assert_eq!(state.file(path).unwrap().match_count, 0);
    }

    #[test]
    fn test_reset_between_pulls_is_not_undone() {
        let mut state = state_with("/a.log");
        let path = Path::new("/a.log");
        let from = state.file(path).unwrap().cursor();
        let to = CursorState::at(10, None);
        state.apply_pull(path, from, to, vec![matched(1)], Utc::now());
        state.reset_count(path).unwrap();
        state.apply_pull(path, to, CursorState::at(20, None), vec![matched(2)], Utc::now());
        assert_eq!(state.file(path).unwrap().match_count, 1);
    }

    #[test]
    fn test_remove_directory_drops_its_files() {
        let mut state = IndexState::new(10);
        let dir = PathBuf::from("/logs");
        state.add_directory(dir.clone());
        state.register(
            dir.join("a.log"),
            CursorState::start(),
            FileOrigin::Directory(dir.clone()),
        );
        state.register(PathBuf::from("/elsewhere/b.log"), CursorState::start(), FileOrigin::Manual);

        let removed = state.remove_directory(&dir).unwrap();
        assert_eq!(removed, vec![dir.join("a.log")]);
        assert_eq!(state.file_count(), 1);
        assert!(state.remove_directory(&dir).is_none());
    }

    #[test]
    fn test_exclusions_survive_snapshot() {
        let mut state = state_with("/logs/a.log");
        state.add_directory(PathBuf::from("/logs"));
        state.remove_file(Path::new("/logs/a.log"));
        state.exclude(PathBuf::from("/logs/a.log"));

        let restored = IndexState::from_snapshot(state.snapshot(), 10);
        assert!(restored.is_excluded(Path::new("/logs/a.log")));

        state.remove_directory(Path::new("/logs"));
        assert!(!state.is_excluded(Path::new("/logs/a.log")));
    }

    #[test]
    fn test_seeded_pattern_is_not_merged_twice() {
        let mut state = IndexState::new(10);
        assert!(state.seed_pattern(Pattern::parse("error")).unwrap());
        assert!(state.remove_pattern("error").is_some());

        let mut restored = IndexState::from_snapshot(state.snapshot(), 10);
        assert!(!restored.seed_pattern(Pattern::parse("Error")).unwrap());
        assert!(restored.patterns().is_empty());
        assert!(restored.seed_pattern(Pattern::parse("^fatal")).unwrap());
        assert!(restored.seed_pattern(Pattern::parse("^(bad")).is_err());
        assert_eq!(restored.snapshot().seeded.patterns.len(), 2);
    }

    #[test]
    fn test_seeded_filter_applies_only_when_changed() {
        let day = |d| {
            chrono::NaiveDate::from_ymd_opt(2024, 1, d)
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        };
        let configured = DatetimeFilter::new(day(1), day(2)).unwrap();
        let mut state = IndexState::new(10);
        assert!(state.seed_filter(Some(configured)));
        state.set_filter(DatetimeFilter::default());

        let mut restored = IndexState::from_snapshot(state.snapshot(), 10);
        assert!(!restored.seed_filter(Some(configured)));
        assert!(!restored.filter().is_active());

        let changed = DatetimeFilter::new(day(3), None).unwrap();
        assert!(restored.seed_filter(Some(changed)));
        assert_eq!(restored.filter(), changed);
        assert!(!restored.seed_filter(None));
        assert_eq!(restored.filter(), changed);
    }

    #[test]
    fn test_status_derivation() {
        let mut state = IndexState::new(10);
        assert_eq!(state.status(None), WatchStatus::Unconfigured);

        state.register(PathBuf::from("/a.log"), CursorState::start(), FileOrigin::Manual);
        state.add_pattern(Pattern::parse("error")).unwrap();
        assert_eq!(state.status(None), WatchStatus::Watching);

        let path = Path::new("/a.log");
        let from = state.file(path).unwrap().cursor();
        state.apply_pull(path, from, CursorState::at(5, None), vec![matched(1)], Utc::now());
        assert_eq!(state.status(Some(path)), WatchStatus::MatchedRecently);

        state.acknowledge(Some(path)).unwrap();
        assert_eq!(state.status(Some(path)), WatchStatus::Watching);
    }

    #[test]
    fn test_files_for_pattern() {
        let mut state = state_with("/a.log");
        state.register(PathBuf::from("/b.log"), CursorState::start(), FileOrigin::Manual);
        let path = Path::new("/a.log");
        let from = state.file(path).unwrap().cursor();
        state.apply_pull(path, from, CursorState::at(5, None), vec![matched(1)], Utc::now());
        assert_eq!(state.files_for_pattern("error"), vec![PathBuf::from("/a.log")]);
        assert!(state.files_for_pattern("failed").is_empty());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut state = state_with("/a.log");
        state.add_directory(PathBuf::from("/logs"));
        state.add_pattern(Pattern::parse("^fatal")).unwrap();
        state.reposition(Path::new("/a.log"), CursorState::at(77, None)).unwrap();

        let json = serde_json::to_string(&state.snapshot()).unwrap();
        let restored = IndexState::from_snapshot(serde_json::from_str(&json).unwrap(), 10);
        assert_eq!(restored.file(Path::new("/a.log")).unwrap().offset, 77);
        assert_eq!(restored.directories(), &[PathBuf::from("/logs")]);
        assert_eq!(restored.patterns().len(), 1);
    }

    #[test]
    fn test_legacy_file_list() {
        let snapshot: IndexSnapshot =
            serde_json::from_str(r#"{"files": ["/var/log/x.log", "/var/log/y.log"]}"#).unwrap();
        assert_eq!(snapshot.files.len(), 2);
        assert_eq!(snapshot.version, INDEX_VERSION);
    }

    #[test]
    fn test_unknown_file_errors() {
        let mut state = IndexState::new(10);
        assert!(matches!(
            state.reset_count(Path::new("/missing.log")),
            Err(IndexError::FileNotIndexed(_))
        ));
    }
}
