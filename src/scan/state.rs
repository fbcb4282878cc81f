//! Persisted per-library scan state. Round-trips {status, progress,
//! pending_files, started_at} across process restarts; writes are
//! best-effort (a lost file degrades to a fresh idle state, never a crash).

use std::path::{Path, PathBuf};

use log::warn;

use crate::store::hidden_dir;
use crate::types::ScanState;
use crate::utils::config::PackagePaths;

/// State file path for a library root.
pub fn state_file_path(root: &Path) -> PathBuf {
    hidden_dir(root).join(PackagePaths::SCAN_STATE_FILENAME)
}

/// Load persisted state from `root` if present. Returns None when the file is
/// missing or unreadable (warn and continue, like any cache artifact).
pub fn load_state(root: &Path) -> Option<ScanState> {
    let path = state_file_path(root);
    let s = std::fs::read_to_string(&path).ok()?;
    serde_json::from_str(&s)
        .map_err(|e| warn!("{}: {}", path.display(), e))
        .ok()
}

/// Persist `state` for `root`. Failures are logged and swallowed.
pub fn persist_state(root: &Path, state: &ScanState) {
    let path = state_file_path(root);
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("scan state dir {}: {}", parent.display(), e);
            return;
        }
    }
    match serde_json::to_string_pretty(state) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&path, json) {
                warn!("scan state write {}: {}", path.display(), e);
            }
        }
        Err(e) => warn!("scan state encode: {}", e),
    }
}

/// Remove the persisted state (library removal).
pub fn reset_state(root: &Path) {
    let path = state_file_path(root);
    if path.exists() {
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("scan state remove {}: {}", path.display(), e);
        }
    }
}
