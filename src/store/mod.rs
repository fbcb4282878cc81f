//! Persistent store: schema, tuned open, modification version, pool, index ops.

mod hashing;
pub mod index;
mod pool;

pub use hashing::{hash_equals, hash_file};
pub use pool::{ConnectionPool, SharedConnection};

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::error::Result;
use crate::utils::config::{PackagePaths, PoolConsts};

/// Tuning pragmas applied after WAL is enabled. Bounded page cache and no
/// memory-mapped I/O: handles stay cheap across long-idle sessions.
pub(crate) const TUNING_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 1000;
        PRAGMA mmap_size = 0;
        "#;

/// Schema for file, folder, and meta tables.
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    folder TEXT NOT NULL,
    size INTEGER NOT NULL,
    width INTEGER,
    height INTEGER,
    format TEXT,
    content_hash BLOB,
    thumb_path TEXT,
    created_at INTEGER,
    modified_at INTEGER NOT NULL,
    indexed_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_folder ON files(folder);

CREATE TABLE IF NOT EXISTS folders (
    path TEXT PRIMARY KEY,
    parent_path TEXT,
    name TEXT NOT NULL,
    image_count INTEGER NOT NULL DEFAULT 0,
    last_scan INTEGER
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
"#;

const MOD_VERSION_KEY: &str = "mod_version";

/// Hidden engine directory for a library root (`<root>/.mediadex`).
pub fn hidden_dir(root: &Path) -> PathBuf {
    root.join(PackagePaths::get().hidden_dir_name())
}

/// Index database path for a library root.
pub fn index_db_path(root: &Path) -> PathBuf {
    hidden_dir(root).join(PackagePaths::INDEX_DB_FILENAME)
}

/// Enable WAL and apply tuning + schema to an open connection (idempotent).
fn apply_wal_and_schema(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    conn.execute_batch(TUNING_PRAGMAS)?;
    conn.pragma_update(None, "cache_size", -PoolConsts::PAGE_CACHE_KIB)?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Open or create the index DB for `root` and ensure schema + WAL tuning.
/// Unrecoverable store corruption propagates unmodified from here.
pub fn open_index_db(root: &Path) -> Result<Connection> {
    let dir = hidden_dir(root);
    std::fs::create_dir_all(&dir).map_err(|e| crate::EngineError::io(&dir, e))?;
    let conn = Connection::open(index_db_path(root))?;
    apply_wal_and_schema(&conn)?;
    Ok(conn)
}

/// Open an in-memory DB with the same schema (tests and tooling).
pub fn open_index_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Current modification version of the index. Monotonically increasing,
/// compared for ordering only; 0 before the first committed write.
pub fn modification_version(conn: &Connection) -> Result<i64> {
    let v = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            [MOD_VERSION_KEY],
            |row| row.get(0),
        )
        .unwrap_or(0);
    Ok(v)
}

/// Bump the modification version. Called inside the same transaction as the
/// write batch it accounts for, so the bump commits with the mutation.
pub fn bump_modification_version(conn: &Connection) -> Result<i64> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, 1)
         ON CONFLICT(key) DO UPDATE SET value = value + 1",
        [MOD_VERSION_KEY],
    )?;
    modification_version(conn)
}
