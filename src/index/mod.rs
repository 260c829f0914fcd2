//! Durable registry of watched files.
//!
//! Maps each log file path to its cursor, match count and recent matches,
//! alongside the watched directories, active patterns and datetime filter.

mod error;
mod shared;
mod state;
mod store;
mod types;

pub use error::IndexError;
pub use shared::SharedIndex;
pub use state::{IndexSnapshot, IndexState, PullApplied, SeedLedger, INDEX_VERSION};
pub use store::{default_index_path, IndexStore};
pub use types::{
    CursorState, FileOrigin, RecentMatch, WatchStatus, WatchedFile, DEFAULT_MAX_RECENT_MATCHES,
};
