//! Index read/write operations: file rows, folder rows, count aggregates.
//!
//! All writers go through the Reconciler; readers (cache, detectors) only use
//! the query half. Paths are db-strings (forward slashes, relative to the
//! library root); the empty string is the root folder.

use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::types::{FileRecord, FolderRecord};
use crate::utils::paths::{ancestor_folders, folder_of, now_secs};

/// Stored comparison key for change detection: (size, modified_at, hash).
#[derive(Clone, Debug, PartialEq)]
pub struct StoredFileMeta {
    pub size: u64,
    pub modified_at: i64,
    pub content_hash: Option<Vec<u8>>,
}

pub(crate) const UPSERT_FILE_SQL: &str = "INSERT OR REPLACE INTO files \
     (path, folder, size, width, height, format, content_hash, thumb_path, created_at, modified_at, indexed_at) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

/// Insert or replace one file row.
pub fn upsert_file(conn: &Connection, rec: &FileRecord) -> Result<()> {
    conn.execute(
        UPSERT_FILE_SQL,
        params![
            rec.path,
            rec.folder,
            rec.size as i64,
            rec.width,
            rec.height,
            rec.format,
            rec.content_hash,
            rec.thumb_path,
            rec.created_at,
            rec.modified_at,
            rec.indexed_at,
        ],
    )?;
    Ok(())
}

/// Delete one file row. Returns true when a row existed.
pub fn delete_file(conn: &Connection, path: &str) -> Result<bool> {
    let n = conn.execute("DELETE FROM files WHERE path = ?1", [path])?;
    Ok(n > 0)
}

/// Delete every file and folder row at or under a removed directory.
/// Returns the number of file rows deleted.
pub fn delete_under_dir(conn: &Connection, dir: &str) -> Result<usize> {
    let files = conn.execute(
        "DELETE FROM files WHERE folder = ?1 OR folder LIKE ?1 || '/%'",
        [dir],
    )?;
    conn.execute(
        "DELETE FROM folders WHERE path = ?1 OR path LIKE ?1 || '/%'",
        [dir],
    )?;
    Ok(files)
}

/// Comparison key for one path, or None when not indexed.
pub fn file_meta(conn: &Connection, path: &str) -> Result<Option<StoredFileMeta>> {
    let row = conn
        .query_row(
            "SELECT size, modified_at, content_hash FROM files WHERE path = ?1",
            [path],
            |row| {
                let size: i64 = row.get(0)?;
                Ok(StoredFileMeta {
                    size: size.max(0) as u64,
                    modified_at: row.get(1)?,
                    content_hash: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Load the whole index into a map: path → comparison key. Full scans and
/// derived diffs compare the live tree against this.
pub fn load_file_meta_map(conn: &Connection) -> Result<HashMap<String, StoredFileMeta>> {
    let mut stmt = conn.prepare("SELECT path, size, modified_at, content_hash FROM files")?;
    let rows = stmt.query_map([], |row| {
        let path: String = row.get(0)?;
        let size: i64 = row.get(1)?;
        Ok((
            path,
            StoredFileMeta {
                size: size.max(0) as u64,
                modified_at: row.get(2)?,
                content_hash: row.get(3)?,
            },
        ))
    })?;
    let mut map = HashMap::new();
    for row in rows {
        let (path, meta) = row?;
        map.insert(path, meta);
    }
    Ok(map)
}

/// All indexed paths (presence checks for removal sweeps).
pub fn all_paths(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT path FROM files")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut set = HashSet::new();
    for row in rows {
        set.insert(row?);
    }
    Ok(set)
}

/// Paths of the direct children of one folder (the polling detector diffs
/// a changed directory's listing against this in a single lookup).
pub fn files_in_folder(conn: &Connection, folder: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT path FROM files WHERE folder = ?1")?;
    let rows = stmt.query_map([folder], |row| row.get::<_, String>(0))?;
    let mut set = HashSet::new();
    for row in rows {
        set.insert(row?);
    }
    Ok(set)
}

/// Full records of one folder's direct children, ordered by path (cache
/// payload for folder listings).
pub fn file_records_in_folder(conn: &Connection, folder: &str) -> Result<Vec<FileRecord>> {
    let mut stmt = conn.prepare(
        "SELECT path, folder, size, width, height, format, content_hash, thumb_path, \
                created_at, modified_at, indexed_at \
         FROM files WHERE folder = ?1 ORDER BY path",
    )?;
    let rows = stmt.query_map([folder], |row| {
        let size: i64 = row.get(2)?;
        Ok(FileRecord {
            path: row.get(0)?,
            folder: row.get(1)?,
            size: size.max(0) as u64,
            width: row.get(3)?,
            height: row.get(4)?,
            format: row.get(5)?,
            content_hash: row.get(6)?,
            thumb_path: row.get(7)?,
            created_at: row.get(8)?,
            modified_at: row.get(9)?,
            indexed_at: row.get(10)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Number of file rows at or under a folder ("" counts the whole library).
pub fn image_count_at_or_under(conn: &Connection, folder: &str) -> Result<i64> {
    let n = if folder.is_empty() {
        conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?
    } else {
        conn.query_row(
            "SELECT COUNT(*) FROM files WHERE folder = ?1 OR folder LIKE ?1 || '/%'",
            [folder],
            |row| row.get(0),
        )?
    };
    Ok(n)
}

/// Total file rows in the library.
pub fn total_images(conn: &Connection) -> Result<i64> {
    image_count_at_or_under(conn, "")
}

/// Materialize folder rows for `folder` and every ancestor, preserving
/// existing counts. No-op for the root.
pub fn ensure_folder_chain(conn: &Connection, folder: &str) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO folders (path, parent_path, name, image_count, last_scan) \
         VALUES (?1, ?2, ?3, 0, NULL)",
    )?;
    for path in ancestor_folders(folder) {
        let parent = folder_of(&path);
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        let parent_param = if parent.is_empty() { None } else { Some(parent) };
        stmt.execute(params![path, parent_param, name])?;
    }
    Ok(())
}

/// All folder rows, ordered by path (cache payload for the tree view).
pub fn folder_tree(conn: &Connection) -> Result<Vec<FolderRecord>> {
    let mut stmt = conn.prepare(
        "SELECT path, parent_path, name, image_count, last_scan FROM folders ORDER BY path",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(FolderRecord {
            path: row.get(0)?,
            parent_path: row.get(1)?,
            name: row.get(2)?,
            image_count: row.get(3)?,
            last_scan: row.get(4)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Recompute image counts for every folder row and stamp last_scan. Full
/// scans pay this whole-tree cost once at the end.
pub fn recount_all_folders(conn: &Connection) -> Result<()> {
    let folders: Vec<String> = {
        let mut stmt = conn.prepare("SELECT path FROM folders")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<std::result::Result<_, _>>()?
    };
    let now = now_secs();
    let mut update =
        conn.prepare("UPDATE folders SET image_count = ?1, last_scan = ?2 WHERE path = ?3")?;
    for folder in folders {
        let count = image_count_at_or_under(conn, &folder)?;
        update.execute(params![count, now, folder])?;
    }
    Ok(())
}

/// Recompute image counts only for the folders in `touched` and all their
/// ancestors — the bounded variant incremental syncs use.
pub fn recount_ancestors<'a, I>(conn: &Connection, touched: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut targets: HashSet<String> = HashSet::new();
    for folder in touched {
        for ancestor in ancestor_folders(folder) {
            targets.insert(ancestor);
        }
    }
    let mut update = conn.prepare("UPDATE folders SET image_count = ?1 WHERE path = ?2")?;
    for folder in targets {
        let count = image_count_at_or_under(conn, &folder)?;
        update.execute(params![count, folder])?;
    }
    Ok(())
}

/// Drop folder rows whose directory no longer exists on disk. Full scans run
/// this after the removal pass; folders that still exist keep their row even
/// at count zero.
pub fn prune_folders_missing_on_disk(conn: &Connection, root: &std::path::Path) -> Result<usize> {
    let folders: Vec<String> = {
        let mut stmt = conn.prepare("SELECT path FROM folders")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<std::result::Result<_, _>>()?
    };
    let mut stmt = conn.prepare("DELETE FROM folders WHERE path = ?1")?;
    let mut pruned = 0;
    for folder in folders {
        if !root.join(&folder).is_dir() {
            pruned += stmt.execute([&folder])?;
        }
    }
    Ok(pruned)
}
