//! Reconciler tests: idempotence, folder counts, change-set application,
//! derived diffs, per-file fault tolerance.

use std::path::Path;
use std::sync::{Arc, Mutex};

use mediadex::extract::{MediaExtractor, NullExtractor};
use mediadex::scan::{CancelToken, Reconciler};
use mediadex::store::{ConnectionPool, index};
use mediadex::types::{ChangeSet, ExtractedMedia, Library};
use tempfile::TempDir;

fn seed_files(root: &Path, files: &[&str]) {
    for rel in files {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("content of {rel}").as_bytes()).unwrap();
    }
}

fn library(root: &Path) -> Library {
    Library::new("lib", root, "lib")
}

fn indexed_paths(pool: &ConnectionPool, root: &Path) -> Vec<String> {
    let conn = pool.acquire(root).unwrap();
    let paths = {
        let guard = conn.lock().unwrap();
        index::all_paths(&guard).unwrap()
    };
    pool.release(root);
    let mut v: Vec<String> = paths.into_iter().collect();
    v.sort();
    v
}

/// The §invariant everything else leans on: every folder row's stored count
/// equals the number of file rows at or under its path.
fn assert_folder_counts(pool: &ConnectionPool, root: &Path) {
    let conn = pool.acquire(root).unwrap();
    {
        let guard = conn.lock().unwrap();
        for folder in index::folder_tree(&guard).unwrap() {
            let actual = index::image_count_at_or_under(&guard, &folder.path).unwrap();
            assert_eq!(
                folder.image_count, actual,
                "stored count for '{}' diverged",
                folder.path
            );
        }
    }
    pool.release(root);
}

#[test]
fn test_full_scan_indexes_media_only() {
    let dir = TempDir::new().unwrap();
    seed_files(
        dir.path(),
        &["a.jpg", "b/c.jpg", "b/notes.txt", "b/deep/d.png"],
    );
    let pool = ConnectionPool::new();
    let outcome = Reconciler::new(&pool, &NullExtractor)
        .full_scan(&library(dir.path()), &CancelToken::new(), &|_| {})
        .unwrap();

    assert_eq!(outcome.indexed, 3);
    assert_eq!(outcome.failed, 0);
    assert_eq!(
        indexed_paths(&pool, dir.path()),
        vec!["a.jpg", "b/c.jpg", "b/deep/d.png"]
    );
    assert_folder_counts(&pool, dir.path());
}

#[test]
fn test_second_scan_is_idempotent() {
    let dir = TempDir::new().unwrap();
    seed_files(dir.path(), &["a.jpg", "b/c.jpg", "b/deep/d.png"]);
    let pool = ConnectionPool::new();
    let reconciler = Reconciler::new(&pool, &NullExtractor);

    reconciler
        .full_scan(&library(dir.path()), &CancelToken::new(), &|_| {})
        .unwrap();
    let second = reconciler
        .full_scan(&library(dir.path()), &CancelToken::new(), &|_| {})
        .unwrap();

    assert_eq!(second.indexed, 0, "unchanged tree: zero net mutations");
    assert_eq!(second.removed, 0);
    assert_eq!(second.processed, 3);
}

#[test]
fn test_full_scan_reindexes_changed_and_removes_missing() {
    let dir = TempDir::new().unwrap();
    seed_files(dir.path(), &["a.jpg", "b/c.jpg"]);
    let pool = ConnectionPool::new();
    let reconciler = Reconciler::new(&pool, &NullExtractor);
    reconciler
        .full_scan(&library(dir.path()), &CancelToken::new(), &|_| {})
        .unwrap();

    // Grow one file, delete the other.
    std::fs::write(dir.path().join("a.jpg"), b"much longer replacement body").unwrap();
    std::fs::remove_file(dir.path().join("b/c.jpg")).unwrap();

    let outcome = reconciler
        .full_scan(&library(dir.path()), &CancelToken::new(), &|_| {})
        .unwrap();
    assert_eq!(outcome.indexed, 1);
    assert_eq!(outcome.removed, 1);
    assert_eq!(indexed_paths(&pool, dir.path()), vec!["a.jpg"]);
    assert_folder_counts(&pool, dir.path());
}

#[test]
fn test_scenario_file_then_directory_removal() {
    let dir = TempDir::new().unwrap();
    seed_files(dir.path(), &["a.jpg", "b/c.jpg"]);
    let pool = ConnectionPool::new();
    let reconciler = Reconciler::new(&pool, &NullExtractor);
    reconciler
        .full_scan(&library(dir.path()), &CancelToken::new(), &|_| {})
        .unwrap();

    // Delete b/c.jpg from disk; the detector cycle yields filesRemoved.
    std::fs::remove_file(dir.path().join("b/c.jpg")).unwrap();
    let mut changes = ChangeSet::default();
    changes.files_removed.insert("b/c.jpg".to_string());
    reconciler
        .apply_change_set(&library(dir.path()), &changes)
        .unwrap();

    let conn = pool.acquire(dir.path()).unwrap();
    {
        let guard = conn.lock().unwrap();
        let folders = index::folder_tree(&guard).unwrap();
        let b = folders.iter().find(|f| f.path == "b").expect("row for b");
        // Directory still exists: the row is retained at count zero.
        assert_eq!(b.image_count, 0);
    }
    pool.release(dir.path());

    // Now b/ itself is removed; dirsRemoved deletes the folder row too.
    std::fs::remove_dir(dir.path().join("b")).unwrap();
    let mut changes = ChangeSet::default();
    changes.dirs_removed.insert("b".to_string());
    reconciler
        .apply_change_set(&library(dir.path()), &changes)
        .unwrap();

    let conn = pool.acquire(dir.path()).unwrap();
    {
        let guard = conn.lock().unwrap();
        let folders = index::folder_tree(&guard).unwrap();
        assert!(folders.iter().all(|f| f.path != "b"));
    }
    pool.release(dir.path());
    assert_folder_counts(&pool, dir.path());
}

#[test]
fn test_apply_change_set_additions_and_dirs() {
    let dir = TempDir::new().unwrap();
    seed_files(dir.path(), &["a.jpg"]);
    let pool = ConnectionPool::new();
    let reconciler = Reconciler::new(&pool, &NullExtractor);
    reconciler
        .full_scan(&library(dir.path()), &CancelToken::new(), &|_| {})
        .unwrap();

    seed_files(dir.path(), &["new/x.jpg", "new/y.jpg"]);
    let mut changes = ChangeSet::default();
    changes.dirs_added.insert("new".to_string());
    changes.files_added.insert("new/x.jpg".to_string());
    changes.files_added.insert("new/y.jpg".to_string());
    let outcome = reconciler
        .apply_change_set(&library(dir.path()), &changes)
        .unwrap();

    assert_eq!(outcome.indexed, 2);
    assert_eq!(
        indexed_paths(&pool, dir.path()),
        vec!["a.jpg", "new/x.jpg", "new/y.jpg"]
    );
    assert_folder_counts(&pool, dir.path());
}

#[test]
fn test_sync_derives_diff_when_no_changeset_supplied() {
    let dir = TempDir::new().unwrap();
    seed_files(dir.path(), &["a.jpg", "b/c.jpg"]);
    let pool = ConnectionPool::new();
    let reconciler = Reconciler::new(&pool, &NullExtractor);
    reconciler
        .full_scan(&library(dir.path()), &CancelToken::new(), &|_| {})
        .unwrap();

    // Drift while "the watcher was down": one added, one removed.
    seed_files(dir.path(), &["b/new.jpg"]);
    std::fs::remove_file(dir.path().join("a.jpg")).unwrap();

    let outcome = reconciler
        .sync(&library(dir.path()), None, &CancelToken::new(), &|_| {})
        .unwrap();
    assert_eq!(outcome.indexed, 1);
    assert_eq!(outcome.removed, 1);
    assert_eq!(
        indexed_paths(&pool, dir.path()),
        vec!["b/c.jpg", "b/new.jpg"]
    );
    assert_folder_counts(&pool, dir.path());
}

/// Extractor that fails on a marker substring; failures must be contained to
/// the file, never the batch.
struct FlakyExtractor {
    attempts: Mutex<Vec<String>>,
}

impl MediaExtractor for FlakyExtractor {
    fn extract(
        &self,
        source: &Path,
        _library_root: &Path,
        _content_hash: Option<&[u8]>,
        _conn: &rusqlite::Connection,
    ) -> mediadex::Result<ExtractedMedia> {
        self.attempts
            .lock()
            .unwrap()
            .push(source.display().to_string());
        if source.to_string_lossy().contains("bad") {
            return Err(mediadex::EngineError::Extract("decode failed".into()));
        }
        Ok(ExtractedMedia::default())
    }
}

#[test]
fn test_extraction_failure_does_not_abort_batch() {
    let dir = TempDir::new().unwrap();
    seed_files(dir.path(), &["a.jpg", "bad.jpg", "z.jpg"]);
    let pool = ConnectionPool::new();
    let extractor = FlakyExtractor {
        attempts: Mutex::new(Vec::new()),
    };
    let outcome = Reconciler::new(&pool, &extractor)
        .full_scan(&library(dir.path()), &CancelToken::new(), &|_| {})
        .unwrap();

    // An extract failure downgrades that file's metadata, not the scan: all
    // three rows land, the failure is counted.
    assert_eq!(outcome.indexed, 3);
    assert_eq!(outcome.failed, 1);
    assert_eq!(extractor.attempts.lock().unwrap().len(), 3);
    assert_eq!(
        indexed_paths(&pool, dir.path()),
        vec!["a.jpg", "bad.jpg", "z.jpg"]
    );
}

#[test]
fn test_vanished_file_is_skipped_not_errored() {
    let dir = TempDir::new().unwrap();
    seed_files(dir.path(), &["a.jpg", "b.jpg"]);
    let pool = ConnectionPool::new();
    let reconciler = Reconciler::new(&pool, &NullExtractor);
    reconciler
        .full_scan(&library(dir.path()), &CancelToken::new(), &|_| {})
        .unwrap();

    // A file that vanishes between enumeration and processing is skipped,
    // not errored.
    seed_files(dir.path(), &["c.jpg"]);
    std::fs::remove_file(dir.path().join("c.jpg")).unwrap();
    let mut changes = ChangeSet::default();
    changes.files_added.insert("c.jpg".to_string());
    let outcome = reconciler
        .apply_change_set(&library(dir.path()), &changes)
        .unwrap();
    assert_eq!(outcome.indexed, 0);
    assert_eq!(outcome.failed, 0);
}

#[test]
fn test_cancel_between_batches_returns_remainder() {
    let dir = TempDir::new().unwrap();
    seed_files(
        dir.path(),
        &["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg", "f.jpg"],
    );
    let pool = ConnectionPool::new();
    let cancel = CancelToken::new();
    let reconciler = Reconciler::new(&pool, &NullExtractor).with_batch_size(2);

    // Request abort from the first progress report: the current batch
    // finishes, the rest comes back untouched.
    let cancel_from_progress = cancel.clone();
    let outcome = reconciler
        .full_scan(&library(dir.path()), &cancel, &move |_| {
            cancel_from_progress.request();
        })
        .unwrap();

    assert!(outcome.was_cancelled());
    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.pending.len(), 4);
    assert_eq!(indexed_paths(&pool, dir.path()), vec!["a.jpg", "b.jpg"]);

    // Resume with exactly the preserved remainder: nothing twice, nothing
    // omitted.
    let resumed = reconciler
        .resume(
            &library(dir.path()),
            outcome.pending.clone(),
            outcome.processed,
            6,
            &CancelToken::new(),
            &|_| {},
        )
        .unwrap();
    assert!(!resumed.was_cancelled());
    assert_eq!(resumed.indexed, 4);
    assert_eq!(indexed_paths(&pool, dir.path()).len(), 6);
    assert_folder_counts(&pool, dir.path());
}
