//! Match patterns and the active pattern set.
//!
//! A pattern is either a case-insensitive substring or a regular expression.
//! Regex patterns are recognized by a leading `^` in their text (the marker
//! stays part of the expression) or by an explicit `is_regex` flag.

use chrono::NaiveDateTime;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::error::PatternError;
use super::filter::DatetimeFilter;
use super::timestamp::extract_timestamp;

/// Leading marker that flags pattern text as a regular expression.
pub const REGEX_MARKER: char = '^';

/// A single match rule as configured and persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    /// Display name.
    #[serde(default)]
    pub title: String,
    /// Literal text or regex source.
    pub text: String,
    /// Whether `text` is a regular expression.
    #[serde(default)]
    pub is_regex: bool,
}

impl Pattern {
    /// Build a pattern from raw text, detecting the regex marker.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        Self {
            title: default_title(text),
            text: text.to_string(),
            is_regex: text.starts_with(REGEX_MARKER),
        }
    }

    /// A literal (case-insensitive substring) pattern.
    #[must_use]
    pub fn literal(text: &str) -> Self {
        Self {
            title: default_title(text),
            text: text.trim().to_string(),
            is_regex: false,
        }
    }

    /// A regex pattern.
    #[must_use]
    pub fn regex(text: &str) -> Self {
        Self {
            title: default_title(text),
            text: text.trim().to_string(),
            is_regex: true,
        }
    }

    /// Set the display title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Key used to de-duplicate the pattern set.
    ///
    /// Literal patterns compare case-insensitively, regex sources exactly.
    #[must_use]
    pub fn normalized(&self) -> String {
        let text = self.text.trim();
        if self.is_regex {
            format!("re:{text}")
        } else {
            format!("lit:{}", text.to_lowercase())
        }
    }
}

/// Capitalize the first character, like "error" -> "Error".
fn default_title(text: &str) -> String {
    let text = text.trim();
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    /// Lowercased needle.
    Literal(String),
    Regex(Regex),
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    pattern: Pattern,
    key: String,
    matcher: Matcher,
}

impl CompiledPattern {
    fn compile(pattern: Pattern) -> Result<Self, PatternError> {
        if pattern.text.trim().is_empty() {
            return Err(PatternError::Empty);
        }
        let matcher = if pattern.is_regex {
            let regex = RegexBuilder::new(&pattern.text)
                .case_insensitive(true)
                .build()
                .map_err(|error| PatternError::InvalidRegex {
                    source_text: pattern.text.clone(),
                    error,
                })?;
            Matcher::Regex(regex)
        } else {
            Matcher::Literal(pattern.text.trim().to_lowercase())
        };
        Ok(Self {
            key: pattern.normalized(),
            pattern,
            matcher,
        })
    }

    fn is_match(&self, line: &str, lowered: &str) -> bool {
        match &self.matcher {
            Matcher::Literal(needle) => lowered.contains(needle.as_str()),
            Matcher::Regex(regex) => regex.is_match(line),
        }
    }
}

/// Outcome of evaluating one line that matched at least one pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// 1-based line number within the file.
    pub line_number: u64,
    /// Line text, trimmed.
    pub text: String,
    /// Text of every pattern that matched, in pattern order.
    pub patterns: Vec<String>,
    /// First date-bearing timestamp found in the line.
    pub timestamp: Option<NaiveDateTime>,
}

/// The active set of compiled patterns, in insertion order.
///
/// Compiled forms are built once per pattern when it enters the set and are
/// never persisted.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    entries: Vec<CompiledPattern>,
}

impl PatternSet {
    /// Create an empty pattern set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from patterns, skipping duplicates.
    ///
    /// # Errors
    ///
    /// Returns the first compilation error encountered.
    pub fn from_patterns(patterns: impl IntoIterator<Item = Pattern>) -> Result<Self, PatternError> {
        let mut set = Self::new();
        for pattern in patterns {
            set.add(pattern)?;
        }
        Ok(set)
    }

    /// Add a pattern. Returns `false` if an equivalent pattern already exists.
    ///
    /// # Errors
    ///
    /// Returns `PatternError::Empty` or `PatternError::InvalidRegex`; the set
    /// is left unchanged.
    pub fn add(&mut self, pattern: Pattern) -> Result<bool, PatternError> {
        let compiled = CompiledPattern::compile(pattern)?;
        if self.position(&compiled.key).is_some() {
            return Ok(false);
        }
        self.entries.push(compiled);
        Ok(true)
    }

    /// Remove the pattern whose text equals `text` (normalized).
    pub fn remove(&mut self, text: &str) -> Option<Pattern> {
        let index = self.find_text(text)?;
        Some(self.entries.remove(index).pattern)
    }

    /// Replace the pattern with text `old_text` by `replacement`, in place.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `old_text` is not in the set, `Duplicate` if the
    /// replacement collides with a different existing pattern, or a
    /// compilation error. The set is unchanged on error.
    pub fn edit(&mut self, old_text: &str, replacement: Pattern) -> Result<(), PatternError> {
        let index = self
            .find_text(old_text)
            .ok_or_else(|| PatternError::NotFound(old_text.to_string()))?;
        let compiled = CompiledPattern::compile(replacement)?;
        if let Some(other) = self.position(&compiled.key) {
            if other != index {
                return Err(PatternError::Duplicate(compiled.pattern.text));
            }
        }
        self.entries[index] = compiled;
        Ok(())
    }

    /// Patterns in insertion order.
    #[must_use]
    pub fn patterns(&self) -> Vec<Pattern> {
        self.entries.iter().map(|e| e.pattern.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Texts of every pattern matching `line`.
    #[must_use]
    pub fn matching(&self, line: &str) -> Vec<String> {
        let lowered = line.to_lowercase();
        self.entries
            .iter()
            .filter(|e| e.is_match(line, &lowered))
            .map(|e| e.pattern.text.clone())
            .collect()
    }

    /// Evaluate a line against the set and the datetime filter.
    ///
    /// Patterns are tested first; the filter then decides whether a match
    /// counts. Returns `None` when nothing matched or the line's timestamp
    /// falls outside the filter.
    #[must_use]
    pub fn evaluate(
        &self,
        line_number: u64,
        line: &str,
        filter: &DatetimeFilter,
    ) -> Option<MatchResult> {
        let patterns = self.matching(line);
        if patterns.is_empty() {
            return None;
        }
        let timestamp = extract_timestamp(line);
        if filter.is_active() && !filter.admits(timestamp) {
            tracing::trace!(line_number, "Match outside datetime filter");
            return None;
        }
        Some(MatchResult {
            line_number,
            text: line.trim().to_string(),
            patterns,
            timestamp,
        })
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    fn find_text(&self, text: &str) -> Option<usize> {
        let text = text.trim();
        self.entries.iter().position(|e| {
            let own = e.pattern.text.trim();
            if e.pattern.is_regex {
                own == text
            } else {
                own.to_lowercase() == text.to_lowercase()
            }
        })
    }
}

/// The built-in patterns used when nothing is configured.
#[must_use]
pub fn default_patterns() -> Vec<Pattern> {
    vec![
        Pattern::literal("exception").with_title("Exceptions"),
        Pattern::literal("error").with_title("Errors"),
        Pattern::literal("traceback").with_title("Tracebacks"),
        Pattern::literal("failed").with_title("Failures"),
        Pattern::literal("critical").with_title("Critical"),
    ]
}
