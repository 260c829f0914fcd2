//! Durable storage for the index.
//!
//! Snapshots are written to a sibling temp file and renamed over the index
//! so a crash mid-write never leaves a truncated document behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::error::IndexError;
use super::state::IndexSnapshot;

/// Returns the default index path.
///
/// This is `~/.local/share/logwatch/index.json` on Linux.
#[must_use]
pub fn default_index_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("logwatch")
        .join("index.json")
}

/// Reads and writes index snapshots.
///
/// A store without a path keeps state in memory only; `save` is a no-op.
#[derive(Debug)]
pub struct IndexStore {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl IndexStore {
    /// Open a store at `path`, checking that its directory is writable.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Unwritable` if the directory cannot be created
    /// or written.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let unwritable = |source| IndexError::Unwritable {
            path: parent.clone(),
            source,
        };
        fs::create_dir_all(&parent).map_err(unwritable)?;
        let marker = parent.join(".logwatch-marker");
        fs::write(&marker, b"").map_err(unwritable)?;
        let _ = fs::remove_file(&marker);

        Ok(Self {
            path: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    /// A store that never touches disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }

    /// Load the persisted snapshot.
    ///
    /// Returns `Ok(None)` when nothing has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Corrupt` if the file cannot be parsed, or an
    /// I/O error if it cannot be read. The file is left untouched.
    pub fn load(&self) -> Result<Option<IndexSnapshot>, IndexError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        let snapshot = serde_json::from_str(&content).map_err(|source| IndexError::Corrupt {
            path: path.clone(),
            source,
        })?;
        Ok(Some(snapshot))
    }

    /// Copy an unreadable index aside as `<name>.corrupt` for manual recovery.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the copy fails.
    pub fn preserve_corrupt(&self) -> Result<Option<PathBuf>, IndexError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let backup = sibling(path, "corrupt");
        fs::copy(path, &backup)?;
        Ok(Some(backup))
    }

    /// Atomically replace the persisted snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any file operation fails.
    pub fn save(&self, snapshot: &IndexSnapshot) -> Result<(), IndexError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_vec_pretty(snapshot)?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let temp_path = sibling(path, "tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&content)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, path)?;
        tracing::trace!(path = %path.display(), files = snapshot.files.len(), "Index saved");
        Ok(())
    }
}

/// `index.json` -> `index.json.<suffix>`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
