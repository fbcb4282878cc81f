//! Mediadex: persistent media-library indexer with live change detection.
//!
//! The engine keeps one SQLite index per library root consistent with the
//! live filesystem through full scans, incremental syncs, and continuous
//! change detection, and serves reads through freshness-checked caches over
//! pooled store connections.
//!
//! External mutation subsystems (e.g. soft-delete with undo) share the index
//! under a caller-enforced contract: acquire and release handles through
//! [`store::ConnectionPool`] like any reader, invalidate the affected
//! [`cache::ReadCache`] entries after committing, and never run while the
//! library's [`types::ScanState`] is `scanning` (check
//! [`scan::ScanCoordinator::state`] first).

pub mod cache;
pub mod cli;
pub mod error;
pub mod extract;
pub mod observer;
pub mod scan;
pub mod store;
pub mod types;
pub mod utils;
pub mod watch;

/// Re-export types for API
pub use error::{EngineError, Result};
pub use types::*;
