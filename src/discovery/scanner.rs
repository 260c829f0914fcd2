//! Directory tree scanning for log files.
//!
//! A [`Scan`] is a lazy, finite iterator over the log files under a root.
//! It never follows symbolic links, skips hidden and well-known noise
//! directories, reports progress every `progress_every` entries and stops
//! as soon as its cancellation token fires.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

use super::classifier::Classifier;
use super::error::DiscoveryError;

/// Directory names never descended into.
pub const SKIPPED_DIR_NAMES: &[&str] = &["node_modules", "__pycache__", "venv", ".git"];

/// Depth limit for the directory-count pass used to estimate progress.
const ESTIMATE_DEPTH: usize = 3;

/// Progress fraction is capped below 1.0 until the scan finishes.
const MAX_RUNNING_FRACTION: f32 = 0.99;

/// Tuning for a scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Classifier applied to each regular file.
    pub classifier: Classifier,
    /// Emit a progress report after this many walked entries.
    pub progress_every: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            classifier: Classifier::default(),
            progress_every: 256,
        }
    }
}

/// A progress report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanProgress {
    /// Directories entered so far.
    pub dirs_scanned: usize,
    /// Log files yielded so far.
    pub files_found: usize,
    /// Estimated completion in `[0.0, 0.99]`.
    pub fraction: f32,
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The whole tree was walked.
    Completed { found: usize },
    /// The token fired; files yielded before that are still valid.
    Cancelled { found: usize },
}

impl ScanOutcome {
    #[must_use]
    pub fn found(&self) -> usize {
        match self {
            Self::Completed { found } | Self::Cancelled { found } => *found,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

type EntryFilter = fn(&DirEntry) -> bool;

/// Lazy iterator over discovered log file paths.
///
/// Not restartable: start a fresh [`Scan`] to walk the tree again.
pub struct Scan<P> {
    root: PathBuf,
    walker: walkdir::FilterEntry<walkdir::IntoIter, EntryFilter>,
    options: ScanOptions,
    cancel: CancellationToken,
    on_progress: P,
    total_dirs: Option<usize>,
    entries_walked: usize,
    dirs_scanned: usize,
    files_found: usize,
    cancelled: bool,
    finished: bool,
}

impl<P> Scan<P>
where
    P: FnMut(ScanProgress),
{
    /// Start a scan rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::RootNotFound` or `NotADirectory` if `root`
    /// cannot be walked.
    pub fn new(
        root: impl Into<PathBuf>,
        options: ScanOptions,
        cancel: CancellationToken,
        on_progress: P,
    ) -> Result<Self, DiscoveryError> {
        let root = root.into();
        let metadata = std::fs::metadata(&root).map_err(|source| DiscoveryError::RootNotFound {
            path: root.clone(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(DiscoveryError::NotADirectory(root));
        }

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(should_descend as EntryFilter);

        Ok(Self {
            root,
            walker,
            options,
            cancel,
            on_progress,
            total_dirs: None,
            entries_walked: 0,
            dirs_scanned: 0,
            files_found: 0,
            cancelled: false,
            finished: false,
        })
    }

    /// The scan root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Outcome so far; final once the iterator returned `None`.
    #[must_use]
    pub fn outcome(&self) -> ScanOutcome {
        if self.cancelled {
            ScanOutcome::Cancelled {
                found: self.files_found,
            }
        } else {
            ScanOutcome::Completed {
                found: self.files_found,
            }
        }
    }

    /// Drain the scan, calling `on_found` for every log file.
    pub fn run(mut self, mut on_found: impl FnMut(PathBuf)) -> ScanOutcome {
        for path in self.by_ref() {
            on_found(path);
        }
        self.outcome()
    }

    fn check_cancelled(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            if !self.cancelled {
                tracing::info!(root = %self.root.display(), found = self.files_found, "Scan cancelled");
            }
            self.cancelled = true;
            self.finished = true;
        }
        self.cancelled
    }

    fn estimate(&mut self) {
        let mut count = 0usize;
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .max_depth(ESTIMATE_DEPTH)
            .into_iter()
            .filter_entry(should_descend as EntryFilter);
        for entry in walker.flatten() {
            if self.cancel.is_cancelled() {
                break;
            }
            if entry.file_type().is_dir() {
                count += 1;
            }
        }
        tracing::debug!(root = %self.root.display(), dirs = count, "Estimated scan size");
        self.total_dirs = Some(count.max(1));
        if !self.cancel.is_cancelled() {
            let report = self.progress();
            (self.on_progress)(report);
        }
    }

    fn progress(&self) -> ScanProgress {
        let fraction = match self.total_dirs {
            Some(total) if total > 0 => {
                #[allow(clippy::cast_precision_loss)]
                let raw = self.dirs_scanned as f32 / total as f32;
                raw.min(MAX_RUNNING_FRACTION)
            }
            _ => 0.0,
        };
        ScanProgress {
            dirs_scanned: self.dirs_scanned,
            files_found: self.files_found,
            fraction,
        }
    }
}

impl<P> Iterator for Scan<P>
where
    P: FnMut(ScanProgress),
{
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        if self.finished || self.check_cancelled() {
            return None;
        }
        if self.total_dirs.is_none() {
            self.estimate();
        }

        loop {
            if self.check_cancelled() {
                return None;
            }

            let entry = match self.walker.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
                None => {
                    self.finished = true;
                    tracing::info!(root = %self.root.display(), found = self.files_found, "Scan complete");
                    return None;
                }
            };

            self.entries_walked += 1;
            if self.entries_walked % self.options.progress_every.max(1) == 0 {
                let report = self.progress();
                (self.on_progress)(report);
            }

            let file_type = entry.file_type();
            if file_type.is_dir() {
                self.dirs_scanned += 1;
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            if self.options.classifier.is_log_file(entry.path()) {
                self.files_found += 1;
                return Some(entry.into_path());
            }
        }
    }
}

/// Skip hidden and noise directories below the root.
fn should_descend(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    !name.starts_with('.') && !SKIPPED_DIR_NAMES.contains(&name.as_ref())
}

/// Files directly inside one directory, split by classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    /// Log files, sorted.
    pub log_files: Vec<PathBuf>,
    /// Files classified as not being logs, sorted.
    pub rejected: Vec<PathBuf>,
}

/// List log files directly inside `dir`, without recursing.
///
/// Paths for which `skip` returns true are not classified and appear in
/// neither list.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_log_files(
    dir: &Path,
    classifier: &Classifier,
    skip: impl Fn(&Path) -> bool,
) -> Result<DirListing, DiscoveryError> {
    let entries = std::fs::read_dir(dir).map_err(|source| DiscoveryError::RootNotFound {
        path: dir.to_path_buf(),
        source,
    })?;

    let (mut log_files, mut rejected): (Vec<PathBuf>, Vec<PathBuf>) = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .map(|entry| entry.path())
        .filter(|path| !skip(path))
        .partition(|path| classifier.is_log_file(path));
    log_files.sort();
    rejected.sort();
    Ok(DirListing {
        log_files,
        rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("app/nested")).unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("top.log"), "x\n").unwrap();
        fs::write(root.join("app/server_log.txt"), "2024-01-01 12:00:00 up\n").unwrap();
        fs::write(root.join("app/nested/deep.logs"), "").unwrap();
        fs::write(root.join("app/readme.md"), "hello\n").unwrap();
        fs::write(root.join(".hidden/secret.log"), "").unwrap();
        fs::write(root.join("node_modules/pkg/install.log"), "").unwrap();
        dir
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        let mut names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_scan_finds_log_files_and_skips_noise() {
        let dir = tree();
        let scan = Scan::new(
            dir.path(),
            ScanOptions::default(),
            CancellationToken::new(),
            |_| {},
        )
        .unwrap();
        let found: Vec<PathBuf> = scan.collect();
        assert_eq!(names(&found), vec!["deep.logs", "server_log.txt", "top.log"]);
    }

    #[test]
    fn test_scan_reports_bounded_progress() {
        let dir = tree();
        let mut reports = Vec::new();
        let options = ScanOptions {
            progress_every: 2,
            ..ScanOptions::default()
        };
        let outcome = Scan::new(dir.path(), options, CancellationToken::new(), |p| reports.push(p))
            .unwrap()
            .run(|_| {});
        assert_eq!(outcome, ScanOutcome::Completed { found: 3 });
        assert!(!reports.is_empty());
        assert!(reports.iter().all(|p| p.fraction <= MAX_RUNNING_FRACTION));
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_does_not_follow_symlinks() {
        let dir = tree();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("app/loop")).unwrap();
        let found: Vec<PathBuf> = Scan::new(
            dir.path(),
            ScanOptions::default(),
            CancellationToken::new(),
            |_| {},
        )
        .unwrap()
        .collect();
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn test_cancel_keeps_partial_results_and_stops_progress() {
        let dir = TempDir::new().unwrap();
        for i in 0..20 {
            fs::write(dir.path().join(format!("f{i:02}.log")), "").unwrap();
        }
        let cancel = CancellationToken::new();
        let progress_after_cancel = std::cell::Cell::new(0usize);
        let cancelled = std::cell::Cell::new(false);
        let options = ScanOptions {
            progress_every: 1,
            ..ScanOptions::default()
        };
        let mut scan = Scan::new(dir.path(), options, cancel.clone(), |_| {
            if cancelled.get() {
                progress_after_cancel.set(progress_after_cancel.get() + 1);
            }
        })
        .unwrap();

        let mut found = Vec::new();
        for _ in 0..5 {
            found.push(scan.next().unwrap());
        }
        cancel.cancel();
        cancelled.set(true);
        assert!(scan.next().is_none());
        assert!(scan.next().is_none());

        assert_eq!(found.len(), 5);
        assert_eq!(scan.outcome(), ScanOutcome::Cancelled { found: 5 });
        assert_eq!(progress_after_cancel.get(), 0);
    }

    #[test]
    fn test_scan_rejects_missing_root() {
        let result = Scan::new(
            "/nonexistent/scan/root",
            ScanOptions::default(),
            CancellationToken::new(),
            |_| {},
        );
        assert!(matches!(result, Err(DiscoveryError::RootNotFound { .. })));
    }

    #[test]
    fn test_list_log_files_is_shallow() {
        let dir = tree();
        let listing = list_log_files(dir.path(), &Classifier::new(), |_| false).unwrap();
        assert_eq!(names(&listing.log_files), vec!["top.log"]);
        assert!(listing.rejected.is_empty());
    }

    #[test]
    fn test_list_log_files_skips_known() {
        let dir = tree();
        let known = dir.path().join("top.log");
        let listing = list_log_files(dir.path(), &Classifier::new(), |p| p == known).unwrap();
        assert_eq!(listing, DirListing::default());
    }

    #[test]
    fn test_list_log_files_reports_rejected() {
        let dir = tree();
        let app = dir.path().join("app");
        let listing = list_log_files(&app, &Classifier::new(), |_| false).unwrap();
        assert_eq!(names(&listing.log_files), vec!["server_log.txt"]);
        assert_eq!(names(&listing.rejected), vec!["readme.md"]);
    }
}
