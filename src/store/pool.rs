//! Reference-counted lifecycle for one persistent-store handle per library.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, bounded};
use log::{debug, warn};
use rusqlite::Connection;

use crate::error::Result;
use crate::utils::config::PoolConsts;

/// Shared handle to one library's index connection. Callers lock per
/// statement or batch; the single-writer discipline lives above this layer.
pub type SharedConnection = Arc<Mutex<Connection>>;

struct PoolEntry {
    conn: SharedConnection,
    refcount: usize,
    last_used: Instant,
}

type PoolMap = Arc<Mutex<HashMap<PathBuf, PoolEntry>>>;

/// Connection pool: opens one handle per library root on first acquire, hands
/// out shared references, and closes handles only when idle past a threshold
/// (background sweep) or on explicit lifecycle events.
///
/// Acquire/release pairing is a caller contract; the pool floors the refcount
/// at zero and never verifies pairing. The map of tracked roots is unbounded.
pub struct ConnectionPool {
    entries: PoolMap,
    idle_timeout: Duration,
    sweep_stop: Option<Sender<()>>,
    sweep_handle: Option<JoinHandle<()>>,
}

impl ConnectionPool {
    /// Pool with default idle timeout and sweep interval.
    pub fn new() -> Self {
        Self::with_timeouts(
            Duration::from_secs(PoolConsts::IDLE_TIMEOUT_SECS),
            Duration::from_secs(PoolConsts::SWEEP_INTERVAL_SECS),
        )
    }

    /// Pool with explicit idle timeout and sweep interval (tests use short ones).
    pub fn with_timeouts(idle_timeout: Duration, sweep_interval: Duration) -> Self {
        let entries: PoolMap = Arc::new(Mutex::new(HashMap::new()));
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let sweep_entries = Arc::clone(&entries);
        let handle = std::thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(sweep_interval) {
                    Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        sweep_idle(&sweep_entries, idle_timeout);
                    }
                }
            }
        });

        Self {
            entries,
            idle_timeout,
            sweep_stop: Some(stop_tx),
            sweep_handle: Some(handle),
        }
    }

    /// Open (on first call) or share the handle for `root`, incrementing the
    /// refcount. Store corruption surfaces here, unmodified.
    pub fn acquire(&self, root: &Path) -> Result<SharedConnection> {
        let mut map = self.entries.lock().unwrap();
        if let Some(entry) = map.get_mut(root) {
            entry.refcount += 1;
            entry.last_used = Instant::now();
            return Ok(Arc::clone(&entry.conn));
        }
        let conn = super::open_index_db(root)?;
        debug!("pool: opened handle for {}", root.display());
        let shared: SharedConnection = Arc::new(Mutex::new(conn));
        map.insert(
            root.to_path_buf(),
            PoolEntry {
                conn: Arc::clone(&shared),
                refcount: 1,
                last_used: Instant::now(),
            },
        );
        Ok(shared)
    }

    /// Decrement the refcount (floored at zero) and stamp last-use. The
    /// handle stays open; only the idle sweep or an explicit close ends it.
    pub fn release(&self, root: &Path) {
        let mut map = self.entries.lock().unwrap();
        if let Some(entry) = map.get_mut(root) {
            entry.refcount = entry.refcount.saturating_sub(1);
            entry.last_used = Instant::now();
        }
    }

    /// Force-close the handle for `root` regardless of refcount: checkpoint
    /// the WAL, then drop. For explicit lifecycle events only (library
    /// removal or switch).
    pub fn close(&self, root: &Path) {
        let entry = self.entries.lock().unwrap().remove(root);
        if let Some(entry) = entry {
            if entry.refcount > 0 {
                warn!(
                    "pool: force-closing {} with refcount {}",
                    root.display(),
                    entry.refcount
                );
            }
            checkpoint_and_drop(root, entry.conn);
        }
    }

    /// Stop the sweep first, then force-close every handle. Process shutdown.
    pub fn close_all(&mut self) {
        if let Some(stop) = self.sweep_stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.sweep_handle.take() {
            let _ = handle.join();
        }
        let drained: Vec<(PathBuf, PoolEntry)> =
            self.entries.lock().unwrap().drain().collect();
        for (root, entry) in drained {
            checkpoint_and_drop(&root, entry.conn);
        }
    }

    /// True while a handle for `root` is open (tests).
    pub fn is_open(&self, root: &Path) -> bool {
        self.entries.lock().unwrap().contains_key(root)
    }

    /// Number of distinct roots currently tracked (tests / diagnostics).
    pub fn tracked(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Run one sweep pass now (tests; the background thread does this on its
    /// own interval).
    pub fn sweep_now(&self) {
        sweep_idle(&self.entries, self.idle_timeout);
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Close every handle with refcount 0 idle beyond the timeout.
fn sweep_idle(entries: &PoolMap, idle_timeout: Duration) {
    let mut expired = Vec::new();
    {
        let mut map = entries.lock().unwrap();
        let now = Instant::now();
        let keys: Vec<PathBuf> = map
            .iter()
            .filter(|(_, e)| e.refcount == 0 && now.duration_since(e.last_used) >= idle_timeout)
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            if let Some(entry) = map.remove(&key) {
                expired.push((key, entry.conn));
            }
        }
    }
    for (root, conn) in expired {
        debug!("pool: closing idle handle for {}", root.display());
        checkpoint_and_drop(&root, conn);
    }
}

/// Checkpoint the WAL, then drop our reference. When no other clone of the
/// handle is live this closes the database; a still-shared handle closes when
/// the last holder drops it.
fn checkpoint_and_drop(root: &Path, conn: SharedConnection) {
    if let Ok(guard) = conn.lock() {
        if let Err(e) = guard.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())) {
            warn!("pool: WAL checkpoint failed for {}: {}", root.display(), e);
        }
    }
    drop(conn);
}
