//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived paths: built once from `CARGO_PKG_NAME`, then cached.
/// Everything the engine writes lives under one hidden directory per library
/// root; the directory is excluded from every walk and watch.
pub struct PackagePaths {
    pkg_name: &'static str,
    hidden_dir_name: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache paths from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                hidden_dir_name: format!(".{pkg}"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Hidden per-library directory name (e.g. `.mediadex`), holding the
    /// index DB, scan state, cache files, and derived assets.
    pub fn hidden_dir_name(&self) -> &str {
        &self.hidden_dir_name
    }

    pub const INDEX_DB_FILENAME: &'static str = "index.db";
    pub const SCAN_STATE_FILENAME: &'static str = "scan_state.json";
    pub const CACHE_DIR_NAME: &'static str = "cache";
    pub const FOLDER_CACHE_DIR_NAME: &'static str = "folders";
    pub const LIBRARY_CACHE_FILENAME: &'static str = "library.json";
    pub const THUMBS_DIR_NAME: &'static str = "thumbs";
}

// ---- Media eligibility ----

/// File extensions the engine indexes (lowercase, no dot).
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "tif", "heic", "heif", "avif", "raw",
    "cr2", "cr3", "nef", "arw", "orf", "rw2", "dng",
];

// ---- Scanning ----

/// Files per reconciliation batch: one transaction per batch, abort flag and
/// progress checked at batch boundaries (bounds cancellation latency).
pub const SCAN_BATCH_SIZE: usize = 200;

/// Delay before auto-resuming a scan found interrupted at process start (ms).
pub const RESUME_SETTLE_MS: u64 = 1_500;

// ---- Hashing ----

/// Hashing I/O thresholds and buffer sizes.
pub struct HashingConsts;

impl HashingConsts {
    /// File size above which hashing uses memory-mapped I/O (bytes). 100 MB.
    pub const HASH_MMAP_THRESHOLD: u64 = 100 * 1024 * 1024;
    /// Chunk size for reading files below mmap threshold (bytes). 1 MB.
    pub const HASH_READ_CHUNK_SIZE: usize = 1024 * 1024;
    /// Files smaller than this are not hashed; mtime/size only (bytes).
    pub const SMALL_FILE_THRESHOLD: u64 = 4 * 1024;
}

// ---- Change detection ----

/// Polling detector cadence and event detector debounce tuning.
pub struct DetectorConsts;

impl DetectorConsts {
    /// Default poll interval for the polling detector (ms).
    pub const POLL_INTERVAL_MS: u64 = 5_000;
    /// Floor of the adaptive debounce window (ms): small batches flush
    /// almost immediately.
    pub const DEBOUNCE_BASE_MS: u64 = 100;
    /// Added per buffered path: larger bursts wait longer before flushing.
    pub const DEBOUNCE_PER_EVENT_MS: u64 = 10;
    /// Cap of the adaptive debounce window (ms).
    pub const DEBOUNCE_MAX_MS: u64 = 2_000;
    /// How long a rejected flush waits before retrying (reconciliation gate
    /// closed mid-scan; the buffer is kept) (ms).
    pub const FLUSH_RETRY_MS: u64 = 1_000;
    /// Bounded wait for the event thread to drain on shutdown before the
    /// handle is detached (ms).
    pub const DRAIN_WAIT_MS: u64 = 3_000;
    /// Receive timeout inside detector loops; bounds stop-signal latency (ms).
    pub const RECV_TICK_MS: u64 = 50;
}

// ---- Connection pool ----

/// Pool sweep cadence and SQLite tuning.
pub struct PoolConsts;

impl PoolConsts {
    /// Handles with refcount 0 idle beyond this are closed by the sweep (secs).
    pub const IDLE_TIMEOUT_SECS: u64 = 300;
    /// Fixed interval of the background idle sweep (secs).
    pub const SWEEP_INTERVAL_SECS: u64 = 60;
    /// SQLite page cache bound, in KiB (negative `cache_size` pragma form).
    pub const PAGE_CACHE_KIB: i64 = 2_048;
}

// ---- Database ----

/// Mtime tolerance window when judging whether a file changed (ns).
pub const DEFAULT_MTIME_WINDOW_NS: i64 = 0;

// ---- Runtime configuration ----

/// Which change-detection strategy to run. Selected once by configuration;
/// call sites only ever see the [`crate::watch::ChangeDetector`] trait.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Polling,
    #[default]
    Event,
}

/// Runtime tunables, file- or caller-supplied. Defaults mirror the consts
/// above.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub detector: DetectorKind,
    pub poll_interval_ms: u64,
    pub debounce_max_ms: u64,
    pub idle_timeout_secs: u64,
    pub mtime_window_ns: i64,
    pub scan_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::default(),
            poll_interval_ms: DetectorConsts::POLL_INTERVAL_MS,
            debounce_max_ms: DetectorConsts::DEBOUNCE_MAX_MS,
            idle_timeout_secs: PoolConsts::IDLE_TIMEOUT_SECS,
            mtime_window_ns: DEFAULT_MTIME_WINDOW_NS,
            scan_batch_size: SCAN_BATCH_SIZE,
        }
    }
}
