//! Log file discovery.
//!
//! Classifies paths as log files and walks directory trees to find them.

mod classifier;
mod error;
mod scanner;

pub use classifier::{Classification, Classifier, ClassifyReason, DEFAULT_PREFIX_BYTES};
pub use error::DiscoveryError;
pub use scanner::{
    list_log_files, DirListing, Scan, ScanOptions, ScanOutcome, ScanProgress, SKIPPED_DIR_NAMES,
};
