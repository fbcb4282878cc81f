//! Pool tests: reference discipline, idle sweep, forced close, close_all.

use std::time::Duration;

use mediadex::store::ConnectionPool;
use tempfile::TempDir;

fn short_sweep_pool() -> ConnectionPool {
    ConnectionPool::with_timeouts(Duration::from_millis(200), Duration::from_millis(100))
}

#[test]
fn test_acquire_opens_and_release_keeps_open() {
    let dir = TempDir::new().unwrap();
    let pool = short_sweep_pool();

    let conn = pool.acquire(dir.path()).unwrap();
    assert!(pool.is_open(dir.path()));
    drop(conn);
    pool.release(dir.path());

    // Balanced acquire/release never closes eagerly; only the sweep may.
    assert!(pool.is_open(dir.path()));
}

#[test]
fn test_idle_sweep_closes_after_timeout() {
    let dir = TempDir::new().unwrap();
    let pool = short_sweep_pool();

    let conn = pool.acquire(dir.path()).unwrap();
    drop(conn);
    pool.release(dir.path());
    assert!(pool.is_open(dir.path()));

    std::thread::sleep(Duration::from_millis(600));
    assert!(!pool.is_open(dir.path()), "idle handle should be swept");
}

#[test]
fn test_sweep_skips_referenced_handles() {
    let dir = TempDir::new().unwrap();
    let pool = short_sweep_pool();

    let _conn = pool.acquire(dir.path()).unwrap();
    std::thread::sleep(Duration::from_millis(600));
    assert!(
        pool.is_open(dir.path()),
        "handle with refcount > 0 must survive the sweep"
    );

    pool.release(dir.path());
    std::thread::sleep(Duration::from_millis(600));
    assert!(!pool.is_open(dir.path()));
}

#[test]
fn test_balanced_acquire_release_pairs() {
    let dir = TempDir::new().unwrap();
    let pool = short_sweep_pool();

    let a = pool.acquire(dir.path()).unwrap();
    let b = pool.acquire(dir.path()).unwrap();
    pool.release(dir.path());
    drop(b);
    // One reference still out: survives the sweep.
    std::thread::sleep(Duration::from_millis(600));
    assert!(pool.is_open(dir.path()));

    drop(a);
    pool.release(dir.path());
    std::thread::sleep(Duration::from_millis(600));
    assert!(!pool.is_open(dir.path()));
}

#[test]
fn test_release_floors_at_zero() {
    let dir = TempDir::new().unwrap();
    let pool = short_sweep_pool();

    let conn = pool.acquire(dir.path()).unwrap();
    drop(conn);
    // Unbalanced releases must not underflow or panic.
    pool.release(dir.path());
    pool.release(dir.path());
    pool.release(dir.path());
    assert!(pool.is_open(dir.path()));
}

#[test]
fn test_forced_close_ignores_refcount() {
    let dir = TempDir::new().unwrap();
    let pool = short_sweep_pool();

    let _conn = pool.acquire(dir.path()).unwrap();
    pool.close(dir.path());
    assert!(!pool.is_open(dir.path()));

    // Reacquire reopens cleanly.
    let _conn2 = pool.acquire(dir.path()).unwrap();
    assert!(pool.is_open(dir.path()));
}

#[test]
fn test_close_all_empties_pool() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let mut pool = short_sweep_pool();

    pool.acquire(dir_a.path()).unwrap();
    pool.acquire(dir_b.path()).unwrap();
    assert_eq!(pool.tracked(), 2);

    pool.close_all();
    assert_eq!(pool.tracked(), 0);
}

#[test]
fn test_distinct_roots_tracked_independently() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let pool = short_sweep_pool();

    pool.acquire(dir_a.path()).unwrap();
    pool.acquire(dir_b.path()).unwrap();
    pool.release(dir_a.path());

    std::thread::sleep(Duration::from_millis(600));
    assert!(!pool.is_open(dir_a.path()), "idle root swept");
    assert!(pool.is_open(dir_b.path()), "referenced root kept");
}
