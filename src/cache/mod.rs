//! Freshness-checked read-through cache for folder-tree and per-folder
//! listings.
//!
//! Entries are JSON files under the library's hidden cache directory, tagged
//! with the index's modification version at compute time. A hit is served
//! only while its tag is >= the current version; anything older is a miss and
//! recomputed — stale data is never returned. Versions are compared for
//! ordering, never subtracted. Cache writes are best-effort: a failed write
//! logs and the caller proceeds uncached. Deleting the cache directory is
//! equivalent to `clear_all_cache`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::Result;
use crate::store::{self, ConnectionPool, index};
use crate::types::{FileRecord, FolderRecord};
use crate::utils::config::PackagePaths;

/// Library-scope payload: the folder tree plus the library's total count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LibrarySnapshot {
    pub folders: Vec<FolderRecord>,
    pub total_images: i64,
}

#[derive(Deserialize)]
struct CacheEnvelope<T> {
    version: i64,
    payload: T,
}

#[derive(Serialize)]
struct CacheEnvelopeRef<'a, T> {
    version: i64,
    payload: &'a T,
}

/// Read-through, write-around cache over the index. Population happens on
/// misses only; writers never update entries in place (entries are always
/// fully overwritten, never partially mutated).
pub struct ReadCache {
    pool: Arc<ConnectionPool>,
}

impl ReadCache {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Folder tree + total count for a library. Cached at library scope.
    pub fn folder_tree(&self, root: &Path) -> Result<LibrarySnapshot> {
        let conn = self.pool.acquire(root)?;
        let result = (|| {
            let current = {
                let guard = conn.lock().unwrap();
                store::modification_version(&guard)?
            };
            let path = library_cache_path(root);
            if let Some(hit) = read_envelope::<LibrarySnapshot>(&path, current) {
                return Ok(hit);
            }
            let payload = {
                let guard = conn.lock().unwrap();
                LibrarySnapshot {
                    folders: index::folder_tree(&guard)?,
                    total_images: index::total_images(&guard)?,
                }
            };
            write_envelope(&path, current, &payload);
            Ok(payload)
        })();
        self.pool.release(root);
        result
    }

    /// One folder's direct image listing ("" is the library root). Cached per
    /// folder under a stable content-derived key.
    pub fn folder_listing(&self, root: &Path, folder: &str) -> Result<Vec<FileRecord>> {
        let conn = self.pool.acquire(root)?;
        let result = (|| {
            let current = {
                let guard = conn.lock().unwrap();
                store::modification_version(&guard)?
            };
            let path = folder_cache_path(root, folder);
            if let Some(hit) = read_envelope::<Vec<FileRecord>>(&path, current) {
                return Ok(hit);
            }
            let payload = {
                let guard = conn.lock().unwrap();
                index::file_records_in_folder(&guard, folder)?
            };
            write_envelope(&path, current, &payload);
            Ok(payload)
        })();
        self.pool.release(root);
        result
    }

    /// Drop one folder's cached listing.
    pub fn delete_folder_cache(&self, root: &Path, folder: &str) {
        remove_cache_file(&folder_cache_path(root, folder));
    }

    /// Drop the library-scope entry.
    pub fn delete_library_cache(&self, root: &Path) {
        remove_cache_file(&library_cache_path(root));
    }

    /// Drop every cache entry for the library.
    pub fn clear_all_cache(&self, root: &Path) {
        let dir = cache_dir(root);
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!("cache clear {}: {}", dir.display(), e);
            }
        }
    }
}

/// Cache directory for a library root.
pub fn cache_dir(root: &Path) -> PathBuf {
    store::hidden_dir(root).join(PackagePaths::CACHE_DIR_NAME)
}

fn library_cache_path(root: &Path) -> PathBuf {
    cache_dir(root).join(PackagePaths::LIBRARY_CACHE_FILENAME)
}

fn folder_cache_path(root: &Path, folder: &str) -> PathBuf {
    cache_dir(root)
        .join(PackagePaths::FOLDER_CACHE_DIR_NAME)
        .join(format!("{}.json", folder_key(folder)))
}

/// Stable content-derived key for a folder path; "root" is the sentinel for
/// the library root.
pub fn folder_key(folder: &str) -> String {
    if folder.is_empty() {
        return "root".to_string();
    }
    let hash = blake3::hash(folder.as_bytes());
    hash.to_hex()[..16].to_string()
}

/// Read an envelope and apply the freshness check. Any unreadable, corrupt,
/// or stale entry resolves to None (a miss) — never an error to the caller.
fn read_envelope<T: DeserializeOwned>(path: &Path, current_version: i64) -> Option<T> {
    let s = std::fs::read_to_string(path).ok()?;
    let envelope: CacheEnvelope<T> = serde_json::from_str(&s)
        .map_err(|e| warn!("cache entry {}: {}", path.display(), e))
        .ok()?;
    (envelope.version >= current_version).then_some(envelope.payload)
}

/// Best-effort write: failures are logged, callers proceed as if uncached.
fn write_envelope<T: Serialize>(path: &Path, version: i64, payload: &T) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("cache dir {}: {}", parent.display(), e);
            return;
        }
    }
    let envelope = CacheEnvelopeRef { version, payload };
    match serde_json::to_string(&envelope) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!("cache write {}: {}", path.display(), e);
            }
        }
        Err(e) => warn!("cache encode {}: {}", path.display(), e),
    }
}

fn remove_cache_file(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("cache remove {}: {}", path.display(), e);
        }
    }
}
