//! The watch engine.
//!
//! An [`Engine`] is a cloneable handle over the shared index. Commands are
//! plain methods that lock the index briefly, apply one change and persist.
//! Persisting writes and syncs the index file before the command returns,
//! so commands are blocking calls; async callers on a latency-sensitive
//! runtime should issue them through `tokio::task::spawn_blocking`.
//! [`Engine::run`] drives the watch cycle: it wakes on debounced change
//! notifications or on the poll interval, rechecks watched directories for
//! new files, pulls every indexed file once and emits match events.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use chrono::{NaiveDateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::changes::{Change, ChangeSource};
use super::cursor::FileCursor;
use super::error::EngineError;
use super::events::{EngineEvent, ErrorKind};
use crate::discovery::{
    list_log_files, Classifier, DiscoveryError, Scan, ScanOptions, ScanOutcome, ScanProgress,
};
use crate::index::{
    CursorState, FileOrigin, IndexError, IndexSnapshot, IndexState, IndexStore, PullApplied,
    RecentMatch, SharedIndex, WatchStatus, WatchedFile, DEFAULT_MAX_RECENT_MATCHES,
};
use crate::matcher::{DatetimeFilter, MatchResult, Pattern, PatternSet};

/// Runtime tuning for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Interval between full cycles when no notification arrives.
    pub poll_interval: Duration,
    /// Window over which bursts of notifications are coalesced.
    pub debounce: Duration,
    /// Recent matches kept per file.
    pub max_recent_matches: usize,
    pub classifier: Classifier,
    /// Scan progress cadence in walked entries.
    pub progress_every: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            debounce: Duration::from_millis(200),
            max_recent_matches: DEFAULT_MAX_RECENT_MATCHES,
            classifier: Classifier::default(),
            progress_every: 256,
        }
    }
}

/// Initial directories, patterns and filter merged into the loaded index.
#[derive(Debug, Clone, Default)]
pub struct Seeds {
    pub directories: Vec<PathBuf>,
    pub patterns: Vec<Pattern>,
    pub datetime_filter: Option<DatetimeFilter>,
}

/// Handle to a running scan.
#[derive(Debug)]
pub struct ScanTask {
    root: PathBuf,
    cancel: CancellationToken,
    handle: JoinHandle<ScanOutcome>,
}

impl ScanTask {
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Request cancellation; files found so far stay registered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the scan to finish.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Join` if the scan task panicked.
    pub async fn join(self) -> Result<ScanOutcome, EngineError> {
        Ok(self.handle.await?)
    }
}

/// A scan registered as running but not yet started.
struct PreparedScan<P> {
    root: PathBuf,
    id: u64,
    cancel: CancellationToken,
    scan: Scan<P>,
}

struct RunningScan {
    id: u64,
    cancel: CancellationToken,
}

struct Inner {
    index: SharedIndex,
    store: IndexStore,
    events: mpsc::UnboundedSender<EngineEvent>,
    settings: EngineSettings,
    dirty: AtomicBool,
    scans: Mutex<HashMap<PathBuf, RunningScan>>,
    next_scan_id: AtomicU64,
    unreadable: Mutex<HashSet<PathBuf>>,
    /// Non-log files seen by directory rechecks, with their mtime then.
    rejected: Mutex<HashMap<PathBuf, SystemTime>>,
    /// Configured directories new to the index. Each is added to the index
    /// only when its initial scan starts on the first cycle.
    pending_scans: Mutex<Vec<PathBuf>>,
    /// Serializes pulls so a file is never read by two cycles at once.
    cycle: tokio::sync::Mutex<()>,
}

/// Cloneable handle to the watch engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.inner.store)
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Open the engine over the index at `index_path`, or in memory when
    /// `index_path` is `None`.
    ///
    /// Never fails: a corrupt index starts empty (the bad file is copied
    /// aside) and an unwritable location falls back to memory-only mode.
    /// Both conditions are reported on the returned event channel.
    #[must_use]
    pub fn open(
        settings: EngineSettings,
        index_path: Option<PathBuf>,
        seeds: Seeds,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, rx) = mpsc::unbounded_channel();

        let store = match index_path {
            Some(path) => IndexStore::open(path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Index location unwritable, keeping state in memory");
                let _ = events.send(EngineEvent::Warning(format!(
                    "{e}; changes will not be saved"
                )));
                IndexStore::in_memory()
            }),
            None => IndexStore::in_memory(),
        };

        let max_recent = settings.max_recent_matches;
        let mut state = match store.load() {
            Ok(Some(snapshot)) => IndexState::from_snapshot(snapshot, max_recent),
            Ok(None) => IndexState::new(max_recent),
            Err(e) => {
                tracing::error!(error = %e, "Could not load index, starting empty");
                let kept = store.preserve_corrupt().ok().flatten();
                let message = match kept {
                    Some(backup) => format!("{e}; previous index kept at {}", backup.display()),
                    None => e.to_string(),
                };
                let _ = events.send(EngineEvent::error(
                    store.path().map(Path::to_path_buf),
                    ErrorKind::CorruptPersistedState,
                    message,
                ));
                IndexState::new(max_recent)
            }
        };

        // Seeds merged on an earlier start are skipped, so removals stick
        let mut pending_scans = Vec::new();
        for dir in seeds.directories {
            let dir = absolute(&dir);
            if state.is_seeded_directory(&dir) || pending_scans.contains(&dir) {
                continue;
            }
            if state.directories().contains(&dir) {
                state.record_seeded_directory(dir);
            } else {
                pending_scans.push(dir);
            }
        }
        for pattern in seeds.patterns {
            if let Err(e) = state.seed_pattern(pattern) {
                tracing::warn!(error = %e, "Ignoring configured pattern");
            }
        }
        if state.seed_filter(seeds.datetime_filter) {
            tracing::info!("Configured datetime filter applied");
        }

        tracing::info!(
            files = state.file_count(),
            directories = state.directories().len(),
            patterns = state.patterns().len(),
            persistent = store.is_persistent(),
            "Engine opened"
        );

        let engine = Self {
            inner: Arc::new(Inner {
                index: SharedIndex::new(state),
                store,
                events,
                settings,
                dirty: AtomicBool::new(false),
                scans: Mutex::new(HashMap::new()),
                next_scan_id: AtomicU64::new(0),
                unreadable: Mutex::new(HashSet::new()),
                rejected: Mutex::new(HashMap::new()),
                pending_scans: Mutex::new(pending_scans),
                cycle: tokio::sync::Mutex::new(()),
            }),
        };
        (engine, rx)
    }

    fn index(&self) -> &SharedIndex {
        &self.inner.index
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.inner.events.send(event);
    }

    // Persistence

    /// Write the index to disk now.
    ///
    /// # Errors
    ///
    /// Returns an `IndexError` if the snapshot cannot be written; the engine
    /// stays dirty and retries on the next cycle.
    pub fn persist(&self) -> Result<(), IndexError> {
        self.inner.dirty.store(false, Ordering::SeqCst);
        let snapshot = self.index().snapshot();
        self.inner.store.save(&snapshot).inspect_err(|_| {
            self.inner.dirty.store(true, Ordering::SeqCst);
        })
    }

    /// Persist, reporting failure as an event. Blocks on file I/O.
    fn commit(&self) {
        if let Err(e) = self.persist() {
            tracing::error!(error = %e, "Failed to persist index");
            self.emit(EngineEvent::error(
                self.inner.store.path().map(Path::to_path_buf),
                ErrorKind::PersistenceFailed,
                e,
            ));
        }
    }

    fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
    }

    /// Whether changes are written to disk.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.inner.store.is_persistent()
    }

    // Directory and scan commands

    /// Watch `dir` and scan it for existing log files.
    ///
    /// Files found by the initial scan are tailed from their current end.
    /// Returns `None` if the directory was already watched.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::PathNotFound` if `dir` is not a directory.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn add_directory(&self, dir: impl AsRef<Path>) -> Result<Option<ScanTask>, EngineError> {
        let dir = absolute(dir.as_ref());
        if !dir.is_dir() {
            return Err(EngineError::PathNotFound(dir));
        }
        if self.index().read(|s| s.directories().contains(&dir)) {
            return Ok(None);
        }
        // The scan is registered before the directory appears in the index,
        // so a concurrent recheck never reads its files from the start.
        let prepared = self.prepare_scan(dir.clone())?;
        if !self.index().with(|s| s.add_directory(dir.clone())) {
            self.discard_scan(&prepared);
            return Ok(None);
        }
        tracing::debug!(dir = %dir.display(), "Directory added");
        self.commit();
        Ok(Some(self.launch_scan(prepared, FileOrigin::Directory(dir))))
    }

    /// Stop watching `dir` and drop the files it contributed.
    pub fn remove_directory(&self, dir: impl AsRef<Path>) -> bool {
        let dir = absolute(dir.as_ref());
        self.cancel_scan(&dir);
        let Some(removed) = self.index().with(|s| s.remove_directory(&dir)) else {
            return false;
        };
        self.inner
            .rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|p, _| p.parent() != Some(dir.as_path()));
        tracing::debug!(dir = %dir.display(), files = removed.len(), "Directory removed");
        for path in removed {
            self.emit(EngineEvent::FileRemoved(path));
        }
        self.commit();
        true
    }

    /// Scan a tree once and register its log files without watching the root.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Discovery` if `root` cannot be walked.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start_scan(&self, root: impl AsRef<Path>) -> Result<ScanTask, EngineError> {
        let root = absolute(root.as_ref());
        let prepared = self.prepare_scan(root)?;
        Ok(self.launch_scan(prepared, FileOrigin::Scan))
    }

    /// Cancel the running scan of `root`. Returns `false` if none is running.
    pub fn cancel_scan(&self, root: impl AsRef<Path>) -> bool {
        let root = absolute(root.as_ref());
        let scans = self.inner.scans.lock().unwrap_or_else(PoisonError::into_inner);
        match scans.get(&root) {
            Some(running) => {
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Build a scan of `root` and register it as running.
    fn prepare_scan(
        &self,
        root: PathBuf,
    ) -> Result<PreparedScan<impl FnMut(ScanProgress) + Send + 'static>, EngineError> {
        let cancel = CancellationToken::new();
        let options = ScanOptions {
            classifier: self.inner.settings.classifier,
            progress_every: self.inner.settings.progress_every,
        };
        let events = self.inner.events.clone();
        let progress_root = root.clone();
        let scan = Scan::new(root.clone(), options, cancel.clone(), move |progress| {
            let _ = events.send(EngineEvent::ScanProgress {
                root: progress_root.clone(),
                progress,
            });
        })?;

        let id = self.inner.next_scan_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut scans = self.inner.scans.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = scans.insert(
                root.clone(),
                RunningScan {
                    id,
                    cancel: cancel.clone(),
                },
            ) {
                previous.cancel.cancel();
            }
        }

        Ok(PreparedScan {
            root,
            id,
            cancel,
            scan,
        })
    }

    /// Forget a prepared scan that will not run.
    fn discard_scan<P>(&self, prepared: &PreparedScan<P>) {
        let mut scans = self.inner.scans.lock().unwrap_or_else(PoisonError::into_inner);
        if scans.get(&prepared.root).is_some_and(|r| r.id == prepared.id) {
            scans.remove(&prepared.root);
        }
    }

    /// Run a prepared scan on the blocking pool.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    fn launch_scan<P>(&self, prepared: PreparedScan<P>, origin: FileOrigin) -> ScanTask
    where
        P: FnMut(ScanProgress) + Send + 'static,
    {
        let PreparedScan {
            root,
            id,
            cancel,
            scan,
        } = prepared;
        tracing::info!(root = %root.display(), "Scan started");
        let engine = self.clone();
        let scan_root = root.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let outcome = scan.run(|path| engine.register_discovered(path, &origin));
            engine.finish_scan(scan_root, id, outcome);
            outcome
        });

        ScanTask {
            root,
            cancel,
            handle,
        }
    }

    /// Register a file found by a scan, positioned at its current end.
    fn register_discovered(&self, path: PathBuf, origin: &FileOrigin) {
        let cursor = match std::fs::metadata(&path) {
            Ok(m) => CursorState::at(
                m.len(),
                m.modified().ok().map(chrono::DateTime::<Utc>::from),
            ),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Discovered file vanished");
                return;
            }
        };
        let added = self.index().with(|s| {
            if let FileOrigin::Directory(dir) = origin {
                if !s.directories().contains(dir) {
                    return false;
                }
            }
            !s.is_excluded(&path) && s.register(path.clone(), cursor, origin.clone())
        });
        if added {
            self.mark_dirty();
            self.emit(EngineEvent::FileAdded {
                path,
                origin: origin.clone(),
            });
        }
    }

    fn finish_scan(&self, root: PathBuf, id: u64, outcome: ScanOutcome) {
        {
            let mut scans = self.inner.scans.lock().unwrap_or_else(PoisonError::into_inner);
            if scans.get(&root).is_some_and(|r| r.id == id) {
                scans.remove(&root);
            }
        }
        tracing::info!(
            root = %root.display(),
            found = outcome.found(),
            cancelled = outcome.is_cancelled(),
            "Scan finished"
        );
        self.commit();
        self.emit(EngineEvent::ScanComplete { root, outcome });
    }

    fn scanning_roots(&self) -> HashSet<PathBuf> {
        self.inner
            .scans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    // File commands

    /// Add a single file. With `from_start`, existing content is read on the
    /// next cycle; otherwise only lines appended from now on are.
    ///
    /// Returns `false` if the file was already indexed.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::PathNotFound` if `path` is not a readable file.
    pub fn add_file(&self, path: impl AsRef<Path>, from_start: bool) -> Result<bool, EngineError> {
        let path = absolute(path.as_ref());
        let metadata = std::fs::metadata(&path)
            .ok()
            .filter(std::fs::Metadata::is_file)
            .ok_or_else(|| EngineError::PathNotFound(path.clone()))?;
        let cursor = if from_start {
            CursorState::start()
        } else {
            CursorState::at(
                metadata.len(),
                metadata.modified().ok().map(chrono::DateTime::<Utc>::from),
            )
        };
        let added = self.index().with(|s| {
            s.include(&path);
            s.register(path.clone(), cursor, FileOrigin::Manual)
        });
        if added {
            tracing::debug!(path = %path.display(), from_start, "File added");
            self.emit(EngineEvent::FileAdded {
                path,
                origin: FileOrigin::Manual,
            });
        }
        self.commit();
        Ok(added)
    }

    /// Remove a file from the index. Directory rechecks will not re-add it.
    pub fn remove_file(&self, path: impl AsRef<Path>) -> bool {
        let path = absolute(path.as_ref());
        let removed = self.index().with(|s| {
            let removed = s.remove_file(&path).is_some();
            if removed {
                s.exclude(path.clone());
            }
            removed
        });
        if removed {
            tracing::debug!(path = %path.display(), "File removed");
            self.emit(EngineEvent::FileRemoved(path));
            self.commit();
        }
        removed
    }

    // Pattern and filter commands

    /// Add a pattern. Returns `false` if an equivalent one exists.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Pattern` for empty or invalid patterns; the
    /// active set is unchanged.
    pub fn add_pattern(&self, pattern: Pattern) -> Result<bool, EngineError> {
        let added = self.index().with(|s| s.add_pattern(pattern))?;
        if added {
            self.commit();
        }
        Ok(added)
    }

    /// Remove the pattern with the given text.
    pub fn remove_pattern(&self, text: &str) -> Option<Pattern> {
        let removed = self.index().with(|s| s.remove_pattern(text));
        if removed.is_some() {
            self.commit();
        }
        removed
    }

    /// Replace the pattern `old_text` with `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Pattern` if `old_text` is unknown, the
    /// replacement is invalid, or it duplicates another pattern.
    pub fn edit_pattern(&self, old_text: &str, pattern: Pattern) -> Result<(), EngineError> {
        self.index().with(|s| s.edit_pattern(old_text, pattern))?;
        self.commit();
        Ok(())
    }

    /// Count only matches whose timestamp lies in `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Pattern` if `start` is after `end`.
    pub fn set_datetime_filter(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<(), EngineError> {
        let filter = DatetimeFilter::new(start, end)?;
        self.index().with(|s| s.set_filter(filter));
        self.commit();
        Ok(())
    }

    pub fn clear_datetime_filter(&self) {
        self.index().with(|s| s.set_filter(DatetimeFilter::default()));
        self.commit();
    }

    // Count commands

    /// Zero one file's count and recent matches.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Index` if the file is not indexed.
    pub fn reset_count(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let path = absolute(path.as_ref());
        self.index().with(|s| s.reset_count(&path))?;
        self.commit();
        Ok(())
    }

    pub fn reset_all_counts(&self) {
        self.index().with(IndexState::reset_all_counts);
        self.commit();
    }

    /// Clear recent matches for one file or, with `None`, every file.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Index` if the file is not indexed.
    pub fn clear_recent(&self, path: Option<&Path>) -> Result<(), EngineError> {
        let path = path.map(absolute);
        self.index().with(|s| s.clear_recent(path.as_deref()))?;
        self.commit();
        Ok(())
    }

    /// Mark matches as seen for one file or, with `None`, every file.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Index` if the file is not indexed.
    pub fn acknowledge(&self, path: Option<&Path>) -> Result<(), EngineError> {
        let path = path.map(absolute);
        self.index().with(|s| s.acknowledge(path.as_deref()))?;
        self.commit();
        Ok(())
    }

    /// Recount every indexed file from byte 0 under the current patterns and
    /// filter, replacing counts and recent matches.
    pub async fn reindex_from_start(&self) {
        let _cycle = self.inner.cycle.lock().await;
        let (paths, patterns, filter) = self.cycle_inputs();
        let total = paths.len();
        tracing::info!(files = total, "Reindexing from start");

        for (done, path) in paths.into_iter().enumerate() {
            if let Some(from) = self.cursor_of(&path) {
                let mut cursor = FileCursor::new(path.clone());
                match cursor.pull().await {
                    Ok(pull) if !pull.missing => {
                        let matches = evaluate_lines(&patterns, &filter, &pull.lines);
                        let now = Utc::now();
                        let applied = self
                            .index()
                            .with(|s| s.apply_recount(&path, from, cursor.state(), matches, now));
                        if applied {
                            self.mark_dirty();
                        }
                    }
                    Ok(_) => {}
                    Err(e) => self.report_unreadable(&path, &e),
                }
            }
            self.emit(EngineEvent::ReindexProgress {
                done: done + 1,
                total,
            });
        }
        self.commit();
    }

    // Queries

    /// Derived status for one file or, with `None`, the whole index.
    #[must_use]
    pub fn status(&self, path: Option<&Path>) -> WatchStatus {
        let path = path.map(absolute);
        self.index().read(|s| s.status(path.as_deref()))
    }

    #[must_use]
    pub fn total_match_count(&self) -> u64 {
        self.index().read(IndexState::total_match_count)
    }

    /// Indexed files with their state, ordered by path.
    #[must_use]
    pub fn files(&self) -> Vec<(PathBuf, WatchedFile)> {
        self.index()
            .read(|s| s.files().map(|(p, f)| (p.clone(), f.clone())).collect())
    }

    #[must_use]
    pub fn file(&self, path: impl AsRef<Path>) -> Option<WatchedFile> {
        let path = absolute(path.as_ref());
        self.index().read(|s| s.file(&path).cloned())
    }

    /// Recent matches for a file, oldest first.
    #[must_use]
    pub fn recent_matches(&self, path: impl AsRef<Path>) -> Vec<RecentMatch> {
        self.file(path)
            .map(|f| f.recent_matches.into_iter().collect())
            .unwrap_or_default()
    }

    /// Files with a recent match for `pattern_text`.
    #[must_use]
    pub fn files_for_pattern(&self, pattern_text: &str) -> Vec<PathBuf> {
        self.index().read(|s| s.files_for_pattern(pattern_text))
    }

    #[must_use]
    pub fn patterns(&self) -> Vec<Pattern> {
        self.index().read(|s| s.patterns().patterns())
    }

    #[must_use]
    pub fn directories(&self) -> Vec<PathBuf> {
        self.index().read(|s| s.directories().to_vec())
    }

    #[must_use]
    pub fn datetime_filter(&self) -> DatetimeFilter {
        self.index().read(IndexState::filter)
    }

    #[must_use]
    pub fn snapshot(&self) -> IndexSnapshot {
        self.index().snapshot()
    }

    // Watch cycle

    /// Run the watch cycle until `shutdown` fires, then persist.
    pub async fn run(&self, shutdown: CancellationToken) {
        let (mut source, mut changes) = match ChangeSource::new(self.inner.settings.debounce) {
            Ok((source, rx)) => (Some(source), Some(rx)),
            Err(e) => {
                tracing::warn!(error = %e, "Change notifications unavailable, polling only");
                self.emit(EngineEvent::error(None, ErrorKind::WatchFailed, e));
                (None, None)
            }
        };

        let mut ticker = tokio::time::interval(self.inner.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("Watch cycle started");
        loop {
            if let Some(source) = source.as_mut() {
                self.sync_watches(source);
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                change = next_change(&mut changes) => match change {
                    Some(change) => {
                        self.handle_change(change);
                        // Coalesce everything already queued into this cycle
                        if let Some(rx) = changes.as_mut() {
                            while let Ok(change) = rx.try_recv() {
                                self.handle_change(change);
                            }
                        }
                    }
                    None => changes = None,
                },
            }

            self.poll_once().await;
        }

        tracing::info!("Watch cycle stopped");
        self.commit();
    }

    /// Run a single cycle: recheck directories, pull every file, persist if
    /// anything changed.
    pub async fn poll_once(&self) {
        let _cycle = self.inner.cycle.lock().await;
        self.recheck_directories().await;

        let (paths, patterns, filter) = self.cycle_inputs();
        for path in &paths {
            self.pull_file(path, &patterns, &filter).await;
        }
        tracing::trace!(files = paths.len(), "Cycle complete");

        if self.inner.dirty.load(Ordering::SeqCst) {
            let engine = self.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || engine.commit()).await {
                tracing::error!(error = %e, "Persist task failed");
            }
        }
    }

    fn cycle_inputs(&self) -> (Vec<PathBuf>, PatternSet, DatetimeFilter) {
        self.index()
            .read(|s| (s.paths(), s.patterns().clone(), s.filter()))
    }

    fn cursor_of(&self, path: &Path) -> Option<CursorState> {
        self.index().read(|s| s.file(path).map(WatchedFile::cursor))
    }

    /// Add configured directories new to the index, each together with its
    /// initial scan.
    fn start_pending_scans(&self) {
        let pending = std::mem::take(
            &mut *self
                .inner
                .pending_scans
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for dir in pending {
            let prepared = match self.prepare_scan(dir.clone()) {
                Ok(prepared) => prepared,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Cannot scan configured directory");
                    self.emit(EngineEvent::error(Some(dir), ErrorKind::ScanFailed, e));
                    continue;
                }
            };
            let added = self.index().with(|s| {
                s.record_seeded_directory(dir.clone());
                s.add_directory(dir.clone())
            });
            self.mark_dirty();
            if added {
                tracing::debug!(dir = %dir.display(), "Configured directory added");
                self.launch_scan(prepared, FileOrigin::Directory(dir));
            } else {
                self.discard_scan(&prepared);
            }
        }
    }

    fn handle_change(&self, change: Change) {
        match change {
            Change::Touched(paths) => {
                tracing::trace!(count = paths.len(), "Change notification");
            }
            Change::Failed(e) => {
                tracing::warn!(error = %e, "Change notification error");
                self.emit(EngineEvent::error(None, ErrorKind::WatchFailed, e));
            }
        }
    }

    /// Watch every watched directory and the parent of every indexed file.
    fn sync_watches(&self, source: &mut ChangeSource) {
        let desired: HashSet<PathBuf> = self.index().read(|s| {
            s.directories()
                .iter()
                .cloned()
                .chain(s.files().filter_map(|(p, _)| p.parent().map(Path::to_path_buf)))
                .collect()
        });
        for (path, e) in source.sync_paths(&desired) {
            tracing::debug!(path = %path.display(), error = %e, "Could not watch path");
        }
    }

    /// Register log files that newly appeared directly inside watched
    /// directories. Directories still being scanned are skipped.
    async fn recheck_directories(&self) {
        self.start_pending_scans();
        let scanning = self.scanning_roots();
        let dirs: Vec<PathBuf> = self
            .index()
            .read(|s| s.directories().to_vec())
            .into_iter()
            .filter(|d| !scanning.contains(d))
            .collect();

        for dir in dirs {
            let engine = self.clone();
            let listing_dir = dir.clone();
            let listed = tokio::task::spawn_blocking(move || engine.list_new_log_files(&listing_dir))
                .await;

            let found = match listed {
                Ok(Ok(found)) => found,
                Ok(Err(e)) => {
                    tracing::debug!(dir = %dir.display(), error = %e, "Directory recheck failed");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Directory recheck task failed");
                    continue;
                }
            };

            let origin = FileOrigin::Directory(dir.clone());
            for path in found {
                let added = self.index().with(|s| {
                    s.directories().contains(&dir)
                        && !s.is_excluded(&path)
                        && s.register(path.clone(), CursorState::start(), origin.clone())
                });
                if added {
                    tracing::debug!(path = %path.display(), "New file in watched directory");
                    self.mark_dirty();
                    self.emit(EngineEvent::FileAdded {
                        path,
                        origin: origin.clone(),
                    });
                }
            }
        }
    }

    /// Classify files in `dir` that are neither indexed, excluded, nor
    /// rejected earlier with the same mtime.
    fn list_new_log_files(&self, dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
        let classifier = self.inner.settings.classifier;
        let listing = list_log_files(dir, &classifier, |p| {
            self.index().read(|s| s.contains(p) || s.is_excluded(p)) || self.is_rejected(p)
        })?;

        let stamped: Vec<(PathBuf, Option<SystemTime>)> = listing
            .rejected
            .into_iter()
            .map(|path| {
                let mtime = modified_time(&path);
                (path, mtime)
            })
            .collect();

        let mut rejected = self.inner.rejected.lock().unwrap_or_else(PoisonError::into_inner);
        for (path, mtime) in stamped {
            match mtime {
                Some(mtime) => {
                    rejected.insert(path, mtime);
                }
                None => {
                    rejected.remove(&path);
                }
            }
        }
        for path in &listing.log_files {
            rejected.remove(path);
        }
        Ok(listing.log_files)
    }

    fn is_rejected(&self, path: &Path) -> bool {
        let seen = self
            .inner
            .rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied();
        seen.is_some_and(|mtime| modified_time(path) == Some(mtime))
    }

    async fn pull_file(&self, path: &Path, patterns: &PatternSet, filter: &DatetimeFilter) {
        let Some(from) = self.cursor_of(path) else {
            return;
        };
        let mut cursor = FileCursor::with_state(path.to_path_buf(), from);
        let pull = match cursor.pull().await {
            Ok(pull) => pull,
            Err(e) => {
                self.report_unreadable(path, &e);
                return;
            }
        };
        self.clear_unreadable(path);

        if pull.missing {
            tracing::trace!(path = %path.display(), "File missing, keeping cursor");
            return;
        }
        if pull.rotated {
            self.emit(EngineEvent::FileRotated(path.to_path_buf()));
        }

        let to = cursor.state();
        let matches = evaluate_lines(patterns, filter, &pull.lines);
        if to == from && matches.is_empty() {
            return;
        }

        let now = Utc::now();
        let applied = self
            .index()
            .with(|s| s.apply_pull(path, from, to, matches.clone(), now));
        match applied {
            PullApplied::Applied { counts } => {
                self.mark_dirty();
                for (m, count) in matches.into_iter().zip(counts) {
                    tracing::debug!(
                        path = %path.display(),
                        line = m.line_number,
                        count,
                        "Match"
                    );
                    self.emit(EngineEvent::Match {
                        path: path.to_path_buf(),
                        line_number: m.line_number,
                        text: m.text,
                        patterns: m.patterns,
                        timestamp: m.timestamp,
                        count,
                    });
                }
            }
            PullApplied::Stale => {
                tracing::debug!(path = %path.display(), "Entry changed during read, discarding pull");
            }
        }
    }

    /// Report an unreadable file once, until it becomes readable again.
    fn report_unreadable(&self, path: &Path, e: &super::error::WatcherError) {
        let first = self
            .inner
            .unreadable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf());
        if first {
            tracing::warn!(path = %path.display(), error = %e, "Cannot read file");
            self.emit(EngineEvent::error(
                Some(path.to_path_buf()),
                ErrorKind::FileUnreadable,
                e,
            ));
        }
    }

    fn clear_unreadable(&self, path: &Path) {
        self.inner
            .unreadable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }
}

fn evaluate_lines(
    patterns: &PatternSet,
    filter: &DatetimeFilter,
    lines: &[super::cursor::Line],
) -> Vec<MatchResult> {
    lines
        .iter()
        .filter_map(|line| patterns.evaluate(line.number, &line.text, filter))
        .collect()
}

async fn next_change(changes: &mut Option<mpsc::UnboundedReceiver<Change>>) -> Option<Change> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Make `path` absolute without resolving symlinks.
fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
