//! Cache tests: freshness versioning, folder keys, invalidation ops.

use std::path::Path;
use std::sync::Arc;

use mediadex::cache::{ReadCache, cache_dir, folder_key};
use mediadex::extract::NullExtractor;
use mediadex::scan::{CancelToken, Reconciler};
use mediadex::store::ConnectionPool;
use mediadex::types::{ChangeSet, Library};
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

fn full_scan(pool: &ConnectionPool, root: &Path) {
    let reconciler = Reconciler::new(pool, &NullExtractor);
    reconciler
        .full_scan(&library(root), &CancelToken::new(), &|_| {})
        .unwrap();
}

fn library_cache_file(root: &Path) -> std::path::PathBuf {
    cache_dir(root).join("library.json")
}

#[test]
fn test_folder_key_sentinel_and_stability() {
    assert_eq!(folder_key(""), "root");
    assert_eq!(folder_key("a/b"), folder_key("a/b"));
    assert_ne!(folder_key("a/b"), folder_key("a/c"));
    assert_ne!(folder_key("a/b"), "root");
}

#[test]
fn test_folder_tree_populates_cache_on_miss() {
    let dir = TempDir::new().unwrap();
    seed_files(dir.path(), &["a.jpg", "b/c.jpg"]);
    let pool = Arc::new(ConnectionPool::new());
    full_scan(&pool, dir.path());

    let cache = ReadCache::new(Arc::clone(&pool));
    let snapshot = cache.folder_tree(dir.path()).unwrap();
    assert_eq!(snapshot.total_images, 2);
    assert!(library_cache_file(dir.path()).exists());
}

#[test]
fn test_fresh_entry_is_served_without_recompute() {
    let dir = TempDir::new().unwrap();
    seed_files(dir.path(), &["a.jpg"]);
    let pool = Arc::new(ConnectionPool::new());
    full_scan(&pool, dir.path());

    let cache = ReadCache::new(Arc::clone(&pool));
    cache.folder_tree(dir.path()).unwrap();

    // Doctor the cached payload, keeping its version tag. A fresh-enough
    // entry is served as-is, so the doctored value comes back.
    let path = library_cache_file(dir.path());
    let mut value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    value["payload"]["total_images"] = serde_json::json!(999);
    std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

    let snapshot = cache.folder_tree(dir.path()).unwrap();
    assert_eq!(snapshot.total_images, 999, "valid entry should hit");
}

#[test]
fn test_committed_write_invalidates_stale_entry() {
    let dir = TempDir::new().unwrap();
    seed_files(dir.path(), &["a.jpg"]);
    let pool = Arc::new(ConnectionPool::new());
    full_scan(&pool, dir.path());

    let cache = ReadCache::new(Arc::clone(&pool));
    cache.folder_tree(dir.path()).unwrap();

    // Doctor the cache, then commit a write that bumps the version: the
    // doctored entry is now stale and must never be served.
    let path = library_cache_file(dir.path());
    let mut value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    value["payload"]["total_images"] = serde_json::json!(999);
    std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

    seed_files(dir.path(), &["b.jpg"]);
    let mut changes = ChangeSet::default();
    changes.files_added.insert("b.jpg".to_string());
    Reconciler::new(&pool, &NullExtractor)
        .apply_change_set(&library(dir.path()), &changes)
        .unwrap();

    let snapshot = cache.folder_tree(dir.path()).unwrap();
    assert_eq!(snapshot.total_images, 2, "stale entry must miss");
}

#[test]
fn test_folder_listing_round_trip_and_invalidation() {
    let dir = TempDir::new().unwrap();
    seed_files(dir.path(), &["b/c.jpg", "b/d.jpg"]);
    let pool = Arc::new(ConnectionPool::new());
    full_scan(&pool, dir.path());

    let cache = ReadCache::new(Arc::clone(&pool));
    let listing = cache.folder_listing(dir.path(), "b").unwrap();
    assert_eq!(listing.len(), 2);
    assert!(listing.iter().any(|r| r.path == "b/c.jpg"));

    // Removal commits a write; the next listing read recomputes.
    std::fs::remove_file(dir.path().join("b/c.jpg")).unwrap();
    let mut changes = ChangeSet::default();
    changes.files_removed.insert("b/c.jpg".to_string());
    Reconciler::new(&pool, &NullExtractor)
        .apply_change_set(&library(dir.path()), &changes)
        .unwrap();

    let listing = cache.folder_listing(dir.path(), "b").unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].path, "b/d.jpg");
}

#[test]
fn test_corrupt_cache_entry_resolves_as_miss() {
    let dir = TempDir::new().unwrap();
    seed_files(dir.path(), &["a.jpg"]);
    let pool = Arc::new(ConnectionPool::new());
    full_scan(&pool, dir.path());

    let cache = ReadCache::new(Arc::clone(&pool));
    cache.folder_tree(dir.path()).unwrap();

    std::fs::write(library_cache_file(dir.path()), b"not json").unwrap();
    let snapshot = cache.folder_tree(dir.path()).unwrap();
    assert_eq!(snapshot.total_images, 1);
}

#[test]
fn test_explicit_cache_deletion() {
    let dir = TempDir::new().unwrap();
    seed_files(dir.path(), &["a.jpg", "b/c.jpg"]);
    let pool = Arc::new(ConnectionPool::new());
    full_scan(&pool, dir.path());

    let cache = ReadCache::new(Arc::clone(&pool));
    cache.folder_tree(dir.path()).unwrap();
    cache.folder_listing(dir.path(), "b").unwrap();
    cache.folder_listing(dir.path(), "").unwrap();

    cache.delete_library_cache(dir.path());
    assert!(!library_cache_file(dir.path()).exists());

    cache.delete_folder_cache(dir.path(), "b");
    let folder_file = cache_dir(dir.path())
        .join("folders")
        .join(format!("{}.json", folder_key("b")));
    assert!(!folder_file.exists());

    cache.clear_all_cache(dir.path());
    assert!(!cache_dir(dir.path()).exists());

    // Reads still work after a full clear (recomputed from the index).
    assert_eq!(cache.folder_tree(dir.path()).unwrap().total_images, 2);
}
