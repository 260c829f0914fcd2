//! Configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::discovery::{Classifier, DEFAULT_PREFIX_BYTES};
use crate::index::DEFAULT_MAX_RECENT_MATCHES;
use crate::matcher::{default_patterns, parse_datetime, DatetimeFilter, Pattern};
use crate::watcher::{EngineSettings, Seeds};

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogwatchConfig {
    /// Watched directories, in order.
    #[serde(default)]
    pub directories: Vec<PathBuf>,
    /// Play a sound on new matches.
    #[serde(default = "default_sound_enabled")]
    pub sound_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound_path: Option<PathBuf>,
    #[serde(default = "default_pattern_configs")]
    pub patterns: Vec<PatternConfig>,
    #[serde(default)]
    pub datetime_filter: DatetimeFilterConfig,
    #[serde(default)]
    pub editor: EditorConfig,
    /// Where the index is kept. Defaults to the user data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_path: Option<PathBuf>,
    #[serde(default)]
    pub watch: WatchSettings,

    // Older single-directory and flat datetime keys, folded in on load.
    #[serde(default, skip_serializing)]
    log_dir: Option<PathBuf>,
    #[serde(default, skip_serializing)]
    start_datetime: Option<String>,
    #[serde(default, skip_serializing)]
    end_datetime: Option<String>,
}

fn default_sound_enabled() -> bool {
    true
}

fn default_pattern_configs() -> Vec<PatternConfig> {
    default_patterns().into_iter().map(PatternConfig::from).collect()
}

impl Default for LogwatchConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            sound_enabled: default_sound_enabled(),
            sound_path: None,
            patterns: default_pattern_configs(),
            datetime_filter: DatetimeFilterConfig::default(),
            editor: EditorConfig::default(),
            index_path: None,
            watch: WatchSettings::default(),
            log_dir: None,
            start_datetime: None,
            end_datetime: None,
        }
    }
}

impl LogwatchConfig {
    /// Fold legacy keys into their current form.
    pub fn migrate_legacy(&mut self) {
        if let Some(dir) = self.log_dir.take() {
            if !self.directories.contains(&dir) {
                tracing::info!(dir = %dir.display(), "Migrating log_dir to directories");
                self.directories.insert(0, dir);
            }
        }
        if self.datetime_filter.start.is_none() {
            self.datetime_filter.start = self.start_datetime.take();
        }
        if self.datetime_filter.end.is_none() {
            self.datetime_filter.end = self.end_datetime.take();
        }
    }

    /// Directories, patterns and filter to merge into the index at startup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidDatetime` or `ConfigError::InvalidFilter`
    /// if the datetime filter is malformed.
    pub fn seeds(&self) -> Result<Seeds, ConfigError> {
        Ok(Seeds {
            directories: self.directories.clone(),
            patterns: self.patterns.iter().map(PatternConfig::to_pattern).collect(),
            datetime_filter: self.datetime_filter.to_filter()?,
        })
    }

    /// Resolved index location.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(crate::index::default_index_path)
    }
}

/// One configured pattern.
///
/// Older files list bare strings; a leading `^` marks a regex there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PatternEntry")]
pub struct PatternConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub text: String,
    pub is_regex: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PatternEntry {
    Bare(String),
    Full {
        #[serde(default)]
        title: Option<String>,
        text: String,
        #[serde(default)]
        is_regex: bool,
    },
}

impl From<PatternEntry> for PatternConfig {
    fn from(entry: PatternEntry) -> Self {
        match entry {
            PatternEntry::Bare(text) => Pattern::parse(&text).into(),
            PatternEntry::Full {
                title,
                text,
                is_regex,
            } => Self {
                title,
                text,
                is_regex,
            },
        }
    }
}

impl From<Pattern> for PatternConfig {
    fn from(pattern: Pattern) -> Self {
        Self {
            title: Some(pattern.title),
            text: pattern.text,
            is_regex: pattern.is_regex,
        }
    }
}

impl PatternConfig {
    #[must_use]
    pub fn to_pattern(&self) -> Pattern {
        let pattern = if self.is_regex {
            Pattern::regex(&self.text)
        } else {
            Pattern::literal(&self.text)
        };
        match &self.title {
            Some(title) => pattern.with_title(title.clone()),
            None => pattern,
        }
    }
}

/// Datetime bounds as `YYYY-MM-DD HH:MM:SS` strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatetimeFilterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl DatetimeFilterConfig {
    /// Parse into a filter; `None` when neither bound is set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidDatetime` for unparsable bounds and
    /// `ConfigError::InvalidFilter` when start is after end.
    pub fn to_filter(&self) -> Result<Option<DatetimeFilter>, ConfigError> {
        let parse = |field: &'static str, value: &Option<String>| {
            value
                .as_deref()
                .map(|v| {
                    parse_datetime(v).ok_or_else(|| ConfigError::InvalidDatetime {
                        field,
                        value: v.to_string(),
                    })
                })
                .transpose()
        };
        let start = parse("datetime_filter.start", &self.start)?;
        let end = parse("datetime_filter.end", &self.end)?;
        if start.is_none() && end.is_none() {
            return Ok(None);
        }
        Ok(Some(DatetimeFilter::new(start, end)?))
    }
}

/// How the presentation layer opens a file at a line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditorConfig {
    #[default]
    Vscode,
    Sublime,
    /// The platform's default opener; no line positioning.
    System,
    /// `{path}` and `{line}` are substituted.
    Custom { command_template: String },
}

impl EditorConfig {
    /// The command template for this editor.
    #[must_use]
    pub fn command_template(&self) -> &str {
        match self {
            Self::Vscode => "code --goto {path}:{line}",
            Self::Sublime => "subl {path}:{line}",
            Self::System => "open {path}",
            Self::Custom { command_template } => command_template,
        }
    }

    /// Render the command for `path` at `line`.
    #[must_use]
    pub fn command_for(&self, path: &Path, line: u64) -> String {
        self.command_template()
            .replace("{path}", &path.display().to_string())
            .replace("{line}", &line.to_string())
    }
}

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_max_recent_matches")]
    pub max_recent_matches: usize,
    /// Bytes read from a file's start when looking for timestamps.
    #[serde(default = "default_classify_prefix_bytes")]
    pub classify_prefix_bytes: usize,
    /// Scan progress cadence in walked entries.
    #[serde(default = "default_scan_progress_every")]
    pub scan_progress_every: usize,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_max_recent_matches() -> usize {
    DEFAULT_MAX_RECENT_MATCHES
}

fn default_classify_prefix_bytes() -> usize {
    DEFAULT_PREFIX_BYTES
}

fn default_scan_progress_every() -> usize {
    256
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
            max_recent_matches: default_max_recent_matches(),
            classify_prefix_bytes: default_classify_prefix_bytes(),
            scan_progress_every: default_scan_progress_every(),
        }
    }
}

impl WatchSettings {
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(10)),
            debounce: Duration::from_millis(self.debounce_ms),
            max_recent_matches: self.max_recent_matches,
            classifier: Classifier::with_prefix_bytes(self.classify_prefix_bytes),
            progress_every: self.scan_progress_every.max(1),
        }
    }
}
