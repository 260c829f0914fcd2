//! Colored terminal output for engine events.
//!
//! The CLI stands in for a presentation layer: it prints each event as it
//! arrives and renders status tables on demand.

use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::config::EditorConfig;
use crate::discovery::Classification;
use crate::index::{WatchStatus, WatchedFile};
use crate::watcher::EngineEvent;

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Maximum length for truncated display strings.
const DEFAULT_MAX_LEN: usize = 160;

/// Truncate a string to at most `max_len` characters, adding an ellipsis.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

/// Print one engine event.
///
/// With an editor configured, match lines are followed by the command that
/// opens the file at the matched line.
pub fn print_event(event: &EngineEvent, editor: Option<&EditorConfig>) {
    let ts = timestamp();
    match event {
        EngineEvent::Match {
            path,
            line_number,
            text,
            patterns,
            count,
            ..
        } => {
            println!(
                "{} {} {}:{} [{}] (#{}) {}",
                ts.dimmed(),
                "[MATCH]".red().bold(),
                path.display().bold(),
                line_number,
                patterns.join(", ").yellow(),
                count,
                truncate(text, DEFAULT_MAX_LEN)
            );
            if let Some(editor) = editor {
                println!("    {}", editor.command_for(path, *line_number).dimmed());
            }
        }
        EngineEvent::FileAdded { path, .. } => {
            println!("{} {} {}", ts.dimmed(), "[ADDED]".green(), path.display());
        }
        EngineEvent::FileRemoved(path) => {
            println!("{} {} {}", ts.dimmed(), "[REMOVED]".yellow(), path.display());
        }
        EngineEvent::FileRotated(path) => {
            println!("{} {} {}", ts.dimmed(), "[ROTATED]".cyan(), path.display());
        }
        EngineEvent::ScanProgress { root, progress } => {
            println!(
                "{} {} {} {:.0}% ({} dirs, {} files)",
                ts.dimmed(),
                "[SCAN]".blue(),
                root.display(),
                progress.fraction * 100.0,
                progress.dirs_scanned,
                progress.files_found
            );
        }
        EngineEvent::ScanComplete { root, outcome } => {
            let label = if outcome.is_cancelled() {
                "cancelled"
            } else {
                "complete"
            };
            println!(
                "{} {} {} {} ({} files)",
                ts.dimmed(),
                "[SCAN]".blue().bold(),
                root.display(),
                label,
                outcome.found()
            );
        }
        EngineEvent::ReindexProgress { done, total } => {
            println!("{} {} {done}/{total}", ts.dimmed(), "[REINDEX]".blue());
        }
        EngineEvent::Error {
            path,
            kind,
            message,
        } => {
            let target = path
                .as_deref()
                .map_or(String::new(), |p| format!("{} ", p.display()));
            println!(
                "{} {} {:?}: {}{}",
                ts.dimmed(),
                "[ERROR]".red().bold(),
                kind,
                target,
                message.red()
            );
        }
        EngineEvent::Warning(message) => {
            println!("{} {} {}", ts.dimmed(), "[WARN]".yellow().bold(), message);
        }
    }
    let _ = io::stdout().flush();
}

/// Print the classification of one path.
pub fn print_classification(path: &Path, classification: &Classification) {
    let verdict = if classification.is_log_file {
        "log".green().bold().to_string()
    } else {
        "skip".dimmed().to_string()
    };
    println!(
        "{verdict:>4} {} ({})",
        path.display(),
        classification.reason.dimmed()
    );
}

fn status_label(status: WatchStatus) -> String {
    match status {
        WatchStatus::Watching => "watching".green().to_string(),
        WatchStatus::MatchedRecently => "matched".red().bold().to_string(),
        WatchStatus::Unconfigured => "unconfigured".yellow().to_string(),
    }
}

/// Print the overall status and one row per indexed file.
pub fn print_status(overall: WatchStatus, files: &[(std::path::PathBuf, WatchedFile)], total: u64) {
    println!(
        "{} {} files, {} matches",
        status_label(overall),
        files.len(),
        total
    );
    for (path, file) in files {
        let last = file
            .last_match_at
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        let marker = if file.unacknowledged {
            "*".red().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "{marker} {:>6}  {}  {}",
            file.match_count,
            last.dimmed(),
            path.display()
        );
    }
    let _ = io::stdout().flush();
}
