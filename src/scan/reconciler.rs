//! The sole writer to the index during synchronization.
//!
//! Turns full enumerations, preserved pending lists, and ChangeSets into
//! index mutations in fixed-size batches: one transaction per batch, a
//! modification-version bump committed with every batch, the abort flag and
//! progress checked only at batch boundaries.

use std::collections::BTreeSet;
use std::path::Path;

use log::{debug, warn};
use rusqlite::Connection;
use walkdir::WalkDir;

use crate::error::{EngineError, Result};
use crate::extract::MediaExtractor;
use crate::scan::CancelToken;
use crate::store::index::{self, StoredFileMeta};
use crate::store::{self, ConnectionPool};
use crate::types::{ChangeSet, ExtractedMedia, FileRecord, Library, ScanProgress};
use crate::utils::config::SCAN_BATCH_SIZE;
use crate::utils::paths::{
    folder_of, is_hidden_index_path, is_media_file, is_os_hidden_file, mtime_changed, mtime_ns_of,
    now_secs, path_relative_to, path_to_db_string,
};

/// Progress callback invoked after each committed batch.
pub type ProgressFn<'a> = dyn Fn(ScanProgress) + 'a;

/// What one reconciliation pass did.
#[derive(Clone, Debug, Default)]
pub struct ReconcileOutcome {
    /// Files examined (indexed, unchanged, or failed).
    pub processed: usize,
    /// Rows written (new or re-indexed).
    pub indexed: usize,
    /// Rows deleted.
    pub removed: usize,
    /// Per-file failures recovered in place.
    pub failed: usize,
    /// Untouched remainder when the pass observed the abort flag; empty on
    /// normal completion.
    pub pending: Vec<String>,
}

impl ReconcileOutcome {
    pub fn was_cancelled(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Reconciler: applies enumerations and deltas to one library's index.
/// Holds no per-library state; the coordinator serializes calls per library.
pub struct Reconciler<'a> {
    pool: &'a ConnectionPool,
    extractor: &'a dyn MediaExtractor,
    batch_size: usize,
    mtime_window_ns: i64,
}

impl<'a> Reconciler<'a> {
    pub fn new(pool: &'a ConnectionPool, extractor: &'a dyn MediaExtractor) -> Self {
        Self {
            pool,
            extractor,
            batch_size: SCAN_BATCH_SIZE,
            mtime_window_ns: 0,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_mtime_window(mut self, window_ns: i64) -> Self {
        self.mtime_window_ns = window_ns;
        self
    }

    /// Full scan: enumerate every eligible file under the root and bring the
    /// index to match. Returns early (with the untouched remainder as
    /// `pending`) when the abort flag is observed between batches.
    pub fn full_scan(
        &self,
        library: &Library,
        cancel: &CancelToken,
        progress: &ProgressFn<'_>,
    ) -> Result<ReconcileOutcome> {
        let files = enumerate_media(&library.root);
        debug!(
            "full scan of '{}': {} eligible files",
            library.id,
            files.len()
        );
        self.scan_file_list(library, files, 0, None, cancel, progress)
    }

    /// Resume a paused scan with exactly the preserved pending list — no
    /// re-enumeration. Files that vanished since the pause are skipped.
    /// `processed_offset` and `total` continue the original progress counts.
    pub fn resume(
        &self,
        library: &Library,
        pending: Vec<String>,
        processed_offset: usize,
        total: usize,
        cancel: &CancelToken,
        progress: &ProgressFn<'_>,
    ) -> Result<ReconcileOutcome> {
        self.scan_file_list(
            library,
            pending,
            processed_offset,
            Some(total),
            cancel,
            progress,
        )
    }

    /// Incremental sync: apply a supplied ChangeSet, or derive one by a cheap
    /// enumeration-vs-index diff (watcher-restart catch-up, manual refresh).
    pub fn sync(
        &self,
        library: &Library,
        changes: Option<ChangeSet>,
        cancel: &CancelToken,
        progress: &ProgressFn<'_>,
    ) -> Result<ReconcileOutcome> {
        let changes = match changes {
            Some(c) => c,
            None => self.derive_changes(library)?,
        };
        self.apply_change_set_inner(library, &changes, cancel, progress)
    }

    /// Apply one detector batch. Cancellation is accepted but detector
    /// batches are typically small enough to run to completion.
    pub fn apply_change_set(&self, library: &Library, changes: &ChangeSet) -> Result<ReconcileOutcome> {
        self.apply_change_set_inner(library, changes, &CancelToken::default(), &|_| {})
    }

    // ---- full/resume scan machinery ----

    fn scan_file_list(
        &self,
        library: &Library,
        files: Vec<String>,
        processed_offset: usize,
        total_override: Option<usize>,
        cancel: &CancelToken,
        progress: &ProgressFn<'_>,
    ) -> Result<ReconcileOutcome> {
        let conn = self.pool.acquire(&library.root)?;
        let result = self.scan_file_list_with_conn(
            &conn,
            library,
            files,
            processed_offset,
            total_override,
            cancel,
            progress,
        );
        self.pool.release(&library.root);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_file_list_with_conn(
        &self,
        conn: &std::sync::Mutex<Connection>,
        library: &Library,
        mut files: Vec<String>,
        processed_offset: usize,
        total_override: Option<usize>,
        cancel: &CancelToken,
        progress: &ProgressFn<'_>,
    ) -> Result<ReconcileOutcome> {
        let total = total_override.unwrap_or(processed_offset + files.len());
        let existing = {
            let guard = conn.lock().unwrap();
            index::load_file_meta_map(&guard)?
        };

        let mut outcome = ReconcileOutcome::default();
        let mut touched_folders: BTreeSet<String> = BTreeSet::new();
        let mut cursor = 0;

        while cursor < files.len() {
            if cancel.is_cancelled() {
                outcome.pending = files.split_off(cursor);
                debug!(
                    "scan of '{}' aborted: {} files pending",
                    library.id,
                    outcome.pending.len()
                );
                return Ok(outcome);
            }

            let end = (cursor + self.batch_size).min(files.len());
            let batch = &files[cursor..end];
            let guard = conn.lock().unwrap();
            let tx_result = self.write_batch(&guard, library, batch, &existing, &mut outcome);
            drop(guard);
            tx_result?;

            for rel in batch {
                touched_folders.insert(folder_of(rel));
            }
            cursor = end;
            progress(ScanProgress::new(processed_offset + cursor, total));
        }

        // Completion work: removal pass for rows gone from disk, folder
        // materialization, whole-tree recount. Runs for resumed scans too,
        // so a pause/resume pair converges to the same index as one pass.
        let guard = conn.lock().unwrap();
        let removed = self.remove_missing_rows(&guard, library)?;
        outcome.removed += removed;
        for folder in &touched_folders {
            index::ensure_folder_chain(&guard, folder)?;
        }
        if let Err(e) = index::recount_all_folders(&guard) {
            // Deferred to the next full pass rather than failing the scan.
            warn!("folder recount for '{}' failed: {}", library.id, e);
        }
        let pruned = index::prune_folders_missing_on_disk(&guard, &library.root)?;
        if removed > 0 || pruned > 0 {
            store::bump_modification_version(&guard)?;
        }
        drop(guard);

        Ok(outcome)
    }

    /// One transaction: upsert every batch file that needs it, bump the
    /// modification version, commit.
    fn write_batch(
        &self,
        conn: &Connection,
        library: &Library,
        batch: &[String],
        existing: &std::collections::HashMap<String, StoredFileMeta>,
        outcome: &mut ReconcileOutcome,
    ) -> Result<()> {
        let mut records = Vec::new();
        for rel in batch {
            outcome.processed += 1;
            match self.build_record(conn, library, rel, existing.get(rel.as_str()), &mut outcome.failed) {
                Ok(Some(rec)) => records.push(rec),
                Ok(None) => {} // unchanged, or vanished since enumeration
                Err(e) => {
                    outcome.failed += 1;
                    warn!("indexing {} in '{}': {}", rel, library.id, e);
                }
            }
        }
        if records.is_empty() {
            return Ok(());
        }
        conn.execute_batch("BEGIN")?;
        let write = (|| -> Result<()> {
            for rec in &records {
                index::upsert_file(conn, rec)?;
            }
            store::bump_modification_version(conn)?;
            Ok(())
        })();
        match write {
            Ok(()) => {
                conn.execute_batch("COMMIT")?;
                outcome.indexed += records.len();
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Stat + compare + extract for one file. `Ok(None)` means the stored row
    /// is current or the file is gone (resume skips missing files).
    fn build_record(
        &self,
        conn: &Connection,
        library: &Library,
        rel: &str,
        stored: Option<&StoredFileMeta>,
        failed: &mut usize,
    ) -> Result<Option<FileRecord>> {
        let abs = library.root.join(rel);
        let meta = match std::fs::metadata(&abs) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngineError::io(&abs, e)),
        };
        let size = meta.len();
        let mtime_ns = mtime_ns_of(&meta);

        // Reuse the stored hash when size and mtime are unchanged; a fresh
        // hash settles the remaining size-match cases.
        let reusable = stored.is_some_and(|old| {
            old.size == size && !mtime_changed(mtime_ns, old.modified_at, self.mtime_window_ns)
        });
        if reusable {
            return Ok(None);
        }

        let hash = store::hash_file(&abs, size)?;
        if let Some(old) = stored {
            let same_meta = old.size == size
                && !mtime_changed(mtime_ns, old.modified_at, self.mtime_window_ns);
            if same_meta && store::hash_equals(&hash, &old.content_hash) {
                return Ok(None);
            }
        }

        // An extraction failure is contained to this file: counted, logged,
        // and the row lands with bare filesystem metadata.
        let extracted = self
            .extractor
            .extract(&abs, &library.root, hash.as_ref().map(|h| h.as_slice()), conn)
            .unwrap_or_else(|e| {
                warn!("extract {}: {}", abs.display(), e);
                *failed += 1;
                ExtractedMedia::default()
            });

        let created_at = meta
            .created()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);

        Ok(Some(FileRecord {
            path: rel.to_string(),
            folder: folder_of(rel),
            size,
            width: extracted.width,
            height: extracted.height,
            format: extracted.format,
            content_hash: hash.map(|h| h.to_vec()),
            thumb_path: extracted.thumb_path,
            created_at,
            modified_at: mtime_ns,
            indexed_at: now_secs(),
        }))
    }

    /// Delete rows whose file is no longer on disk.
    fn remove_missing_rows(&self, conn: &Connection, library: &Library) -> Result<usize> {
        let paths = index::all_paths(conn)?;
        let mut removed = 0;
        for path in paths {
            if !library.root.join(&path).is_file() {
                if index::delete_file(conn, &path)? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    // ---- incremental machinery ----

    /// Cheap enumeration-vs-index diff: presence plus size/mtime comparison,
    /// no hashing. Used for watcher-restart catch-up and manual refresh.
    fn derive_changes(&self, library: &Library) -> Result<ChangeSet> {
        let conn = self.pool.acquire(&library.root)?;
        let existing = {
            let guard = conn.lock().unwrap();
            index::load_file_meta_map(&guard)
        };
        self.pool.release(&library.root);
        let existing = existing?;

        let mut changes = ChangeSet::default();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for rel in enumerate_media(&library.root) {
            let abs = library.root.join(&rel);
            let Ok(meta) = std::fs::metadata(&abs) else {
                continue;
            };
            seen.insert(rel.clone());
            match existing.get(&rel) {
                None => {
                    changes.files_added.insert(rel);
                }
                Some(old) => {
                    if old.size != meta.len()
                        || mtime_changed(mtime_ns_of(&meta), old.modified_at, self.mtime_window_ns)
                    {
                        changes.files_changed.insert(rel);
                    }
                }
            }
        }
        for path in existing.keys() {
            if !seen.contains(path) {
                changes.files_removed.insert(path.clone());
            }
        }
        Ok(changes)
    }

    fn apply_change_set_inner(
        &self,
        library: &Library,
        changes: &ChangeSet,
        cancel: &CancelToken,
        progress: &ProgressFn<'_>,
    ) -> Result<ReconcileOutcome> {
        if changes.is_empty() {
            return Ok(ReconcileOutcome::default());
        }
        let conn = self.pool.acquire(&library.root)?;
        let result =
            self.apply_change_set_with_conn(&conn, library, changes, cancel, progress);
        self.pool.release(&library.root);
        result
    }

    fn apply_change_set_with_conn(
        &self,
        conn: &std::sync::Mutex<Connection>,
        library: &Library,
        changes: &ChangeSet,
        cancel: &CancelToken,
        progress: &ProgressFn<'_>,
    ) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();
        let mut touched: BTreeSet<String> = BTreeSet::new();

        // Upserts: added and changed files share one path through the
        // extractor and the write batch.
        let upserts: Vec<String> = changes
            .files_added
            .iter()
            .chain(changes.files_changed.iter())
            .cloned()
            .collect();
        let total = upserts.len();
        let existing = {
            let guard = conn.lock().unwrap();
            index::load_file_meta_map(&guard)?
        };

        let mut cursor = 0;
        let mut files = upserts;
        while cursor < files.len() {
            if cancel.is_cancelled() {
                outcome.pending = files.split_off(cursor);
                return Ok(outcome);
            }
            let end = (cursor + self.batch_size).min(files.len());
            let batch = &files[cursor..end];
            let guard = conn.lock().unwrap();
            self.write_batch(&guard, library, batch, &existing, &mut outcome)?;
            drop(guard);
            for rel in batch {
                touched.insert(folder_of(rel));
            }
            cursor = end;
            progress(ScanProgress::new(cursor, total));
        }

        let guard = conn.lock().unwrap();
        guard.execute_batch("BEGIN")?;
        let write = (|| -> Result<()> {
            // Row deletion only: the derived asset may be shared by content
            // hash with another row, so it is left for the soft-delete
            // subsystem to manage.
            for path in &changes.files_removed {
                if index::delete_file(&guard, path)? {
                    outcome.removed += 1;
                    touched.insert(folder_of(path));
                }
            }
            for dir in &changes.dirs_removed {
                outcome.removed += index::delete_under_dir(&guard, dir)?;
                touched.insert(folder_of(dir));
            }
            for dir in &changes.dirs_added {
                index::ensure_folder_chain(&guard, dir)?;
                touched.insert(dir.clone());
            }
            for folder in &touched {
                index::ensure_folder_chain(&guard, folder)?;
            }
            store::bump_modification_version(&guard)?;
            Ok(())
        })();
        match write {
            Ok(()) => guard.execute_batch("COMMIT")?,
            Err(e) => {
                let _ = guard.execute_batch("ROLLBACK");
                return Err(e);
            }
        }

        // Ancestor-only recount: bounded by the touched set, deferred on
        // failure rather than failing the batch.
        if let Err(e) = index::recount_ancestors(&guard, touched.iter().map(|s| s.as_str())) {
            warn!("ancestor recount for '{}' failed: {}", library.id, e);
        }
        drop(guard);

        Ok(outcome)
    }
}

/// Enumerate eligible media files under `root` as sorted db-string relative
/// paths. The hidden engine directory and OS junk files are skipped; per-entry
/// walk errors are logged and skipped.
pub fn enumerate_media(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("walk: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if is_hidden_index_path(path) || is_os_hidden_file(path) {
            continue;
        }
        if !entry.file_type().is_file() || !is_media_file(path) {
            continue;
        }
        if let Some(rel) = path_relative_to(path, root) {
            files.push(path_to_db_string(&rel));
        }
    }
    files.sort();
    files
}
