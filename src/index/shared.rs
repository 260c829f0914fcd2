//! Shared, lock-guarded handle to the index.

use std::sync::{Arc, Mutex, PoisonError};

use super::state::{IndexSnapshot, IndexState};

/// Cloneable handle through which every index mutation goes.
///
/// The lock is held only for in-memory work, never across file I/O.
#[derive(Debug, Clone)]
pub struct SharedIndex {
    inner: Arc<Mutex<IndexState>>,
}

impl SharedIndex {
    #[must_use]
    pub fn new(state: IndexState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Run `f` with exclusive access to the state.
    pub fn with<R>(&self, f: impl FnOnce(&mut IndexState) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Run `f` with read access to the state.
    pub fn read<R>(&self, f: impl FnOnce(&IndexState) -> R) -> R {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    #[must_use]
    pub fn snapshot(&self) -> IndexSnapshot {
        self.read(IndexState::snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{CursorState, FileOrigin};
    use std::path::PathBuf;

    #[test]
    fn test_concurrent_registration() {
        let index = SharedIndex::new(IndexState::new(10));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let index = index.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        index.with(|s| {
                            s.register(
                                PathBuf::from(format!("/t{i}/f{j}.log")),
                                CursorState::start(),
                                FileOrigin::Scan,
                            )
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(index.read(IndexState::file_count), 400);
    }
}
