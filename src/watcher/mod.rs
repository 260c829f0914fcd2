//! Incremental tailing and the watch cycle.
//!
//! [`FileCursor`] reads newly appended lines from one file. [`Engine`] owns
//! the shared index, accepts commands, and runs the cycle that pulls every
//! indexed file and emits [`EngineEvent`]s.

mod changes;
mod cursor;
mod engine;
mod error;
mod events;

pub use changes::{Change, ChangeSource};
pub use cursor::{FileCursor, Line, Pull};
pub use engine::{Engine, EngineSettings, ScanTask, Seeds};
pub use error::{EngineError, WatcherError};
pub use events::{EngineEvent, ErrorKind};
