//! Polling change detection.
//!
//! Tracks every directory under the root with its last-modified timestamp —
//! memory cost is O(directories), not O(files). Each cycle re-stats the
//! tracked set; a changed directory's direct media files are diffed against
//! the index's recorded file set for that folder (one lookup). A cycle that
//! misses a fast create+delete is corrected by the next cycle's diff against
//! the index.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Sender, bounded};
use log::{debug, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::store::{ConnectionPool, index};
use crate::types::{ChangeSet, Library};
use crate::utils::paths::{
    is_hidden_index_path, is_media_file, is_os_hidden_file, mtime_ns_of, path_relative_to,
    path_to_db_string,
};

use super::{ChangeDetector, ChangeSink};

struct WatchHandle {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct PollingDetector {
    sink: ChangeSink,
    pool: Arc<ConnectionPool>,
    interval: Duration,
    watches: HashMap<String, WatchHandle>,
}

impl PollingDetector {
    pub fn new(sink: ChangeSink, pool: Arc<ConnectionPool>, interval: Duration) -> Self {
        Self {
            sink,
            pool,
            interval,
            watches: HashMap::new(),
        }
    }
}

impl ChangeDetector for PollingDetector {
    fn watch(&mut self, library: &Library) -> Result<()> {
        if self.watches.contains_key(&library.id) {
            return Ok(());
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let sink = Arc::clone(&self.sink);
        let pool = Arc::clone(&self.pool);
        let library = library.clone();
        let interval = self.interval;
        let id = library.id.clone();
        let handle = std::thread::spawn(move || {
            let mut dir_mtimes = build_dir_map(&library.root);
            debug!(
                "polling '{}': tracking {} directories",
                library.id,
                dir_mtimes.len()
            );
            loop {
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                }
                // The cycle mutates a candidate map; it becomes current only
                // once its changes are delivered, so a rejected flush leaves
                // the directories marked changed and the next cycle re-diffs
                // them against the then-current index.
                let mut next_map = dir_mtimes.clone();
                let changes = poll_cycle(&library, &pool, &mut next_map);
                if changes.is_empty() || (sink)(&library.id, changes) {
                    dir_mtimes = next_map;
                } else {
                    debug!("poll flush for '{}' deferred", library.id);
                }
            }
        });
        self.watches.insert(id, WatchHandle { stop_tx, handle });
        Ok(())
    }

    fn unwatch(&mut self, library_id: &str) {
        if let Some(w) = self.watches.remove(library_id) {
            let _ = w.stop_tx.send(());
            let _ = w.handle.join();
        }
    }

    fn shutdown(mut self: Box<Self>) {
        let ids: Vec<String> = self.watches.keys().cloned().collect();
        for id in ids {
            self.unwatch(&id);
        }
    }
}

/// Directory → mtime_ns for every directory under root (root itself keyed
/// as ""), excluding the hidden engine directory.
fn build_dir_map(root: &Path) -> HashMap<String, i64> {
    let mut map = HashMap::new();
    for entry in WalkDir::new(root).into_iter().flatten() {
        if !entry.file_type().is_dir() || is_hidden_index_path(entry.path()) {
            continue;
        }
        let Some(rel) = path_relative_to(entry.path(), root) else {
            continue;
        };
        if let Ok(meta) = entry.metadata() {
            map.insert(path_to_db_string(&rel), mtime_ns_of(&meta));
        }
    }
    map
}

/// One poll cycle: re-stat tracked directories, diff changed ones against the
/// index, coalesce everything into a single ChangeSet.
fn poll_cycle(
    library: &Library,
    pool: &ConnectionPool,
    dir_mtimes: &mut HashMap<String, i64>,
) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut gone: Vec<String> = Vec::new();
    let mut changed: Vec<String> = Vec::new();

    for (rel, known_mtime) in dir_mtimes.iter() {
        let abs = library.root.join(rel);
        match std::fs::metadata(&abs) {
            Ok(meta) if meta.is_dir() => {
                if mtime_ns_of(&meta) != *known_mtime {
                    changed.push(rel.clone());
                }
            }
            _ => gone.push(rel.clone()),
        }
    }

    for rel in gone {
        // Dropping the subtree from the map too; delete_under_dir covers the
        // nested rows on the index side.
        dir_mtimes.retain(|k, _| k != &rel && !k.starts_with(&format!("{rel}/")));
        if !rel.is_empty() {
            changes.dirs_removed.insert(rel);
        }
    }

    if changed.is_empty() {
        return changes;
    }

    let conn = match pool.acquire(&library.root) {
        Ok(c) => c,
        Err(e) => {
            warn!("poll cycle for '{}': {}", library.id, e);
            return changes;
        }
    };

    for rel in changed {
        let abs = library.root.join(&rel);
        if let Ok(meta) = std::fs::metadata(&abs) {
            dir_mtimes.insert(rel.clone(), mtime_ns_of(&meta));
        }
        diff_directory(library, &conn, &rel, dir_mtimes, &mut changes);
    }

    pool.release(&library.root);
    changes
}

/// Diff one changed directory: direct media files on disk vs the index's
/// recorded set for that folder, plus discovery of new subdirectories (which
/// are walked in full — their whole content is new).
fn diff_directory(
    library: &Library,
    conn: &std::sync::Mutex<rusqlite::Connection>,
    folder: &str,
    dir_mtimes: &mut HashMap<String, i64>,
    changes: &mut ChangeSet,
) {
    let abs = library.root.join(folder);
    let entries = match std::fs::read_dir(&abs) {
        Ok(e) => e,
        Err(e) => {
            warn!("list {}: {}", abs.display(), e);
            return;
        }
    };

    let mut on_disk: std::collections::HashSet<String> = std::collections::HashSet::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if is_hidden_index_path(&path) || is_os_hidden_file(&path) {
            continue;
        }
        let Some(rel) = path_relative_to(&path, &library.root) else {
            continue;
        };
        let rel = path_to_db_string(&rel);
        let Ok(ft) = entry.file_type() else { continue };
        if ft.is_dir() {
            if !dir_mtimes.contains_key(&rel) {
                absorb_new_directory(library, &path, dir_mtimes, changes);
            }
        } else if ft.is_file() && is_media_file(&path) {
            on_disk.insert(rel);
        }
    }

    let stored = {
        let guard = conn.lock().unwrap();
        index::files_in_folder(&guard, folder)
    };
    let stored = match stored {
        Ok(s) => s,
        Err(e) => {
            warn!("index lookup for '{}/{}': {}", library.id, folder, e);
            return;
        }
    };

    for path in on_disk.difference(&stored) {
        changes.files_added.insert(path.clone());
    }
    for path in stored.difference(&on_disk) {
        changes.files_removed.insert(path.clone());
    }
}

/// A directory unseen by the tracker: everything under it is new. Walk it
/// once, register its subtree in the map, and mark all nested media files
/// added.
fn absorb_new_directory(
    library: &Library,
    dir: &Path,
    dir_mtimes: &mut HashMap<String, i64>,
    changes: &mut ChangeSet,
) {
    for entry in WalkDir::new(dir).into_iter().flatten() {
        let path = entry.path();
        if is_hidden_index_path(path) || is_os_hidden_file(path) {
            continue;
        }
        let Some(rel) = path_relative_to(path, &library.root) else {
            continue;
        };
        let rel = path_to_db_string(&rel);
        if entry.file_type().is_dir() {
            if let Ok(meta) = entry.metadata() {
                dir_mtimes.insert(rel.clone(), mtime_ns_of(&meta));
            }
            changes.dirs_added.insert(rel);
        } else if entry.file_type().is_file() && is_media_file(path) {
            changes.files_added.insert(rel);
        }
    }
}
