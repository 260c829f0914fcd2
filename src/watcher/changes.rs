//! Filesystem change notifications.
//!
//! Wraps a `notify-debouncer-full` debouncer and forwards the paths touched by
//! each debounced batch to a tokio channel consumed by the watch cycle.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use notify_debouncer_full::{
    new_debouncer,
    notify::{EventKind, RecommendedWatcher, RecursiveMode},
    DebounceEventResult, Debouncer, RecommendedCache,
};
use tokio::sync::mpsc;

use super::error::WatcherError;

/// A debounced batch from the notification backend.
#[derive(Debug)]
pub enum Change {
    /// Paths created, modified or removed.
    Touched(Vec<PathBuf>),
    /// The backend reported an error.
    Failed(WatcherError),
}

/// Source of change notifications for a dynamic set of paths.
///
/// Each path is watched non-recursively. Paths that cannot be watched are
/// skipped; the poll interval still covers them.
pub struct ChangeSource {
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    watched: HashSet<PathBuf>,
}

impl ChangeSource {
    /// Create a source debouncing events over `debounce`.
    ///
    /// # Errors
    ///
    /// Returns `WatcherError::Notify` if the platform watcher cannot be
    /// created.
    pub fn new(debounce: Duration) -> Result<(Self, mpsc::UnboundedReceiver<Change>), WatcherError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            let change = match result {
                Ok(events) => {
                    let paths: Vec<PathBuf> = events
                        .iter()
                        .filter(|event| {
                            matches!(
                                event.kind,
                                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                            )
                        })
                        .flat_map(|event| event.paths.iter().cloned())
                        .collect();
                    if paths.is_empty() {
                        return;
                    }
                    Change::Touched(paths)
                }
                Err(errors) => {
                    let Some(first) = errors.into_iter().next() else {
                        return;
                    };
                    Change::Failed(WatcherError::Notify(first))
                }
            };
            let _ = tx.send(change);
        })?;

        Ok((
            Self {
                debouncer,
                watched: HashSet::new(),
            },
            rx,
        ))
    }

    /// Watch exactly `desired`, adding and removing watches as needed.
    ///
    /// Returns the paths that could not be watched.
    pub fn sync_paths(&mut self, desired: &HashSet<PathBuf>) -> Vec<(PathBuf, WatcherError)> {
        let stale: Vec<PathBuf> = self.watched.difference(desired).cloned().collect();
        for path in stale {
            if let Err(e) = self.debouncer.unwatch(&path) {
                tracing::debug!(path = %path.display(), error = %e, "Unwatch failed");
            }
            self.watched.remove(&path);
        }

        let mut failed = Vec::new();
        for path in desired {
            if self.watched.contains(path) || !path.exists() {
                continue;
            }
            match self.debouncer.watch(path, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    self.watched.insert(path.clone());
                }
                Err(e) => failed.push((path.clone(), WatcherError::Notify(e))),
            }
        }
        failed
    }

    /// Paths currently watched.
    #[must_use]
    pub fn watched(&self) -> &HashSet<PathBuf> {
        &self.watched
    }
}

impl std::fmt::Debug for ChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSource")
            .field("watched", &self.watched)
            .finish_non_exhaustive()
    }
}
