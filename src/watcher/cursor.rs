//! Incremental log file reader.
//!
//! Reads only complete lines appended since the last read.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, BufReader};

use super::error::WatcherError;
use crate::index::CursorState;

/// One complete line read from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// 1-based line number since the start of the current file content.
    pub number: u64,
    /// Line text without the terminator; invalid UTF-8 is replaced.
    pub text: String,
}

/// Result of one [`FileCursor::pull`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pull {
    /// Newly completed lines in file order.
    pub lines: Vec<Line>,
    /// The file shrank below the stored offset and was read from the start.
    pub rotated: bool,
    /// The file does not exist; the cursor is unchanged.
    pub missing: bool,
}

/// Incremental reader that tracks read position and modification time.
///
/// A trailing line without a terminator is never consumed, so no line is
/// split across two pulls.
#[derive(Debug)]
pub struct FileCursor {
    path: PathBuf,
    state: CursorState,
}

impl FileCursor {
    /// Create a cursor at the beginning of the file.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: CursorState::start(),
        }
    }

    /// Create a cursor resuming from a saved state.
    #[must_use]
    pub fn with_state(path: PathBuf, state: CursorState) -> Self {
        Self { path, state }
    }

    #[must_use]
    pub fn state(&self) -> CursorState {
        self.state
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.state.offset
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reset to the beginning of the file.
    pub fn reset(&mut self) {
        self.state = CursorState::start();
    }

    /// Read lines completed since the last pull.
    ///
    /// # Errors
    ///
    /// Returns `WatcherError::PermissionDenied` or `WatcherError::Io` if the
    /// file cannot be read. The cursor is left unchanged on error so the
    /// read is retried next time.
    pub async fn pull(&mut self) -> Result<Pull, WatcherError> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Pull {
                    missing: true,
                    ..Pull::default()
                });
            }
            Err(e) => return Err(self.classify_error(e)),
        };
        let size = metadata.len();
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        let mut next = self.state;
        let mut rotated = false;

        // Detect truncation or replacement by a smaller file
        if size < next.offset {
            tracing::warn!(
                path = %self.path.display(),
                old_offset = next.offset,
                new_len = size,
                "File truncated or rotated, resetting offset to 0"
            );
            next = CursorState {
                offset: 0,
                modified,
                lines_read: Some(0),
            };
            rotated = true;
        }

        if !rotated && next.modified == modified && size == next.offset {
            return Ok(Pull::default());
        }

        let (lines, consumed_to) = self
            .read_from(&mut next, size)
            .await
            .map_err(|e| self.classify_error(e))?;

        next.offset = consumed_to;
        next.modified = modified;
        self.state = next;

        Ok(Pull {
            lines,
            rotated,
            missing: false,
        })
    }

    /// Read complete lines from `state.offset` to EOF, updating `lines_read`.
    async fn read_from(
        &self,
        state: &mut CursorState,
        size: u64,
    ) -> std::io::Result<(Vec<Line>, u64)> {
        let file = File::open(&self.path).await?;
        let mut reader = BufReader::new(file);

        let mut lines_before = match state.lines_read {
            Some(n) => {
                reader.seek(std::io::SeekFrom::Start(state.offset)).await?;
                n
            }
            None => count_newlines(&mut reader, state.offset).await?,
        };

        let mut buf = Vec::with_capacity(usize::try_from(size.saturating_sub(state.offset)).unwrap_or(0));
        reader.read_to_end(&mut buf).await?;

        let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
            state.lines_read = Some(lines_before);
            return Ok((Vec::new(), state.offset));
        };

        let complete = &buf[..=last_newline];
        let mut lines = Vec::new();
        for raw in complete[..complete.len() - 1].split(|&b| b == b'\n') {
            lines_before += 1;
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            lines.push(Line {
                number: lines_before,
                text: String::from_utf8_lossy(raw).into_owned(),
            });
        }

        state.lines_read = Some(lines_before);
        Ok((lines, state.offset + complete.len() as u64))
    }

    fn classify_error(&self, e: std::io::Error) -> WatcherError {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            WatcherError::PermissionDenied(self.path.clone())
        } else {
            WatcherError::Io(e)
        }
    }
}

/// Count newlines in the first `limit` bytes, leaving the reader at `limit`.
async fn count_newlines(reader: &mut BufReader<File>, limit: u64) -> std::io::Result<u64> {
    let mut remaining = limit;
    let mut count = 0u64;
    let mut chunk = vec![0u8; 64 * 1024];
    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(chunk.len(), |r| r.min(chunk.len()));
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            break;
        }
        count += chunk[..n].iter().filter(|&&b| b == b'\n').count() as u64;
        remaining -= n as u64;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn texts(pull: &Pull) -> Vec<&str> {
        pull.lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[tokio::test]
    async fn test_cursor_reads_initial_content() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "first").unwrap();
        writeln!(file, "second").unwrap();
        file.flush().unwrap();

        let mut cursor = FileCursor::new(file.path().to_path_buf());
        let pull = cursor.pull().await.unwrap();

        assert_eq!(texts(&pull), vec!["first", "second"]);
        assert_eq!(pull.lines[1].number, 2);
        assert_eq!(cursor.offset(), 13);
    }

    #[tokio::test]
    async fn test_cursor_reads_only_new_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "one").unwrap();
        file.flush().unwrap();

        let mut cursor = FileCursor::new(file.path().to_path_buf());
        assert_eq!(cursor.pull().await.unwrap().lines.len(), 1);
        let offset_after_first = cursor.offset();

        // No new content - idempotent
        let again = cursor.pull().await.unwrap();
        assert!(again.lines.is_empty());
        assert_eq!(cursor.offset(), offset_after_first);

        writeln!(file, "two").unwrap();
        writeln!(file, "three").unwrap();
        file.flush().unwrap();

        let pull = cursor.pull().await.unwrap();
        assert_eq!(texts(&pull), vec!["two", "three"]);
        assert_eq!(pull.lines[0].number, 2);
        assert_eq!(pull.lines[1].number, 3);
    }

    #[tokio::test]
    async fn test_partial_line_is_left_for_next_pull() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "complete\npart").unwrap();
        file.flush().unwrap();

        let mut cursor = FileCursor::new(file.path().to_path_buf());
        let pull = cursor.pull().await.unwrap();
        assert_eq!(texts(&pull), vec!["complete"]);
        assert_eq!(cursor.offset(), 9);

        write!(file, "ial\r\n").unwrap();
        file.flush().unwrap();
        let pull = cursor.pull().await.unwrap();
        assert_eq!(texts(&pull), vec!["partial"]);
        assert_eq!(pull.lines[0].number, 2);
    }

    #[tokio::test]
    async fn test_cursor_handles_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "aaaaaaaaaa\nbbbbbbbbbb\n").unwrap();

        let mut cursor = FileCursor::new(path.clone());
        assert_eq!(cursor.pull().await.unwrap().lines.len(), 2);
        let old_offset = cursor.offset();

        // Simulate rotation by a smaller file
        std::fs::write(&path, "new\n").unwrap();

        let pull = cursor.pull().await.unwrap();
        assert!(pull.rotated);
        assert_eq!(texts(&pull), vec!["new"]);
        assert_eq!(pull.lines[0].number, 1);
        assert!(cursor.offset() < old_offset);
    }

    #[tokio::test]
    async fn test_missing_file_leaves_state() {
        let mut cursor = FileCursor::with_state(
            PathBuf::from("/tmp/nonexistent-logwatch-12345.log"),
            CursorState::at(42, None),
        );
        let pull = cursor.pull().await.unwrap();
        assert!(pull.missing);
        assert!(pull.lines.is_empty());
        assert_eq!(cursor.offset(), 42);
    }

    #[tokio::test]
    async fn test_resume_with_unknown_line_count() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "a\nb\nc\n").unwrap();
        file.flush().unwrap();

        // Positioned at end, as when a scan registers an existing file
        let mut cursor = FileCursor::with_state(file.path().to_path_buf(), CursorState::at(6, None));
        writeln!(file, "d").unwrap();
        file.flush().unwrap();

        let pull = cursor.pull().await.unwrap();
        assert_eq!(texts(&pull), vec!["d"]);
        assert_eq!(pull.lines[0].number, 4);
        assert_eq!(cursor.state().lines_read, Some(4));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"bad \xff byte\n").unwrap();
        file.flush().unwrap();

        let mut cursor = FileCursor::new(file.path().to_path_buf());
        let pull = cursor.pull().await.unwrap();
        assert_eq!(pull.lines[0].text, "bad \u{fffd} byte");
    }

    #[test]
    fn test_cursor_reset() {
        let mut cursor = FileCursor::with_state(PathBuf::from("/tmp/x.log"), CursorState::at(1024, None));
        assert_eq!(cursor.offset(), 1024);
        cursor.reset();
        assert_eq!(cursor.offset(), 0);
    }
}
