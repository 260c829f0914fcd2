//! logwatch - local log file watching engine.
//!
//! Discovers log files, tails them incrementally across rotation, counts
//! lines matching configured patterns and keeps that state in a durable
//! index.

pub mod config;
pub mod discovery;
pub mod display;
pub mod index;
pub mod matcher;
pub mod watcher;
