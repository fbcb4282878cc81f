//! Public types for the mediadex API: libraries, scan state, change sets, index rows.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A user-designated root directory indexed by the engine. One index and one
/// cache set exist per library.
#[derive(Clone, Debug)]
pub struct Library {
    pub id: String,
    pub root: PathBuf,
    pub name: String,
}

impl Library {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            name: name.into(),
        }
    }
}

/// Lifecycle of a library's scan/sync state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    #[default]
    Idle,
    Scanning,
    Paused,
    Completed,
}

/// Progress snapshot reported after each batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub processed: usize,
    pub total: usize,
    pub percent: f32,
}

impl ScanProgress {
    pub fn new(processed: usize, total: usize) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            (processed as f32 / total as f32) * 100.0
        };
        Self {
            processed,
            total,
            percent,
        }
    }
}

/// Per-library scan state, persisted across restarts.
/// `pending_files` is non-empty only while `status` is [`ScanStatus::Paused`];
/// it holds the untouched remainder of an aborted scan, in enumeration order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScanState {
    pub status: ScanStatus,
    pub progress: ScanProgress,
    #[serde(default)]
    pub pending_files: Vec<String>,
    #[serde(default)]
    pub started_at: i64,
}

impl ScanState {
    pub fn idle() -> Self {
        Self::default()
    }
}

/// One batch of detected filesystem deltas awaiting reconciliation.
/// All members are relative paths (forward slashes) under the library root.
/// Produced once per detector cycle and consumed exactly once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub files_added: BTreeSet<String>,
    pub files_changed: BTreeSet<String>,
    pub files_removed: BTreeSet<String>,
    pub dirs_added: BTreeSet<String>,
    pub dirs_removed: BTreeSet<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.files_added.is_empty()
            && self.files_changed.is_empty()
            && self.files_removed.is_empty()
            && self.dirs_added.is_empty()
            && self.dirs_removed.is_empty()
    }

    /// Total number of paths across all members.
    pub fn len(&self) -> usize {
        self.files_added.len()
            + self.files_changed.len()
            + self.files_removed.len()
            + self.dirs_added.len()
            + self.dirs_removed.len()
    }

    /// Fold `other` into this set. Repeated paths collapse (set semantics);
    /// a path both added and removed keeps both markers and the reconciler
    /// resolves against the live filesystem.
    pub fn merge(&mut self, other: ChangeSet) {
        self.files_added.extend(other.files_added);
        self.files_changed.extend(other.files_changed);
        self.files_removed.extend(other.files_removed);
        self.dirs_added.extend(other.dirs_added);
        self.dirs_removed.extend(other.dirs_removed);
    }
}

/// One file row in the index. `path` is the unique key, relative to the
/// library root; `folder` is its parent folder path ("" for the root).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub folder: String,
    pub size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub content_hash: Option<Vec<u8>>,
    pub thumb_path: Option<String>,
    pub created_at: Option<i64>,
    /// Modification time in nanoseconds since epoch.
    pub modified_at: i64,
    /// Wall-clock seconds at index time.
    pub indexed_at: i64,
}

/// One folder row in the index. `image_count` equals the number of file rows
/// whose path is at or under `path`; recomputed after any batch touching the
/// subtree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub path: String,
    pub parent_path: Option<String>,
    pub name: String,
    pub image_count: i64,
    pub last_scan: Option<i64>,
}

/// Result of the derived-asset collaborator for one source file.
#[derive(Clone, Debug, Default)]
pub struct ExtractedMedia {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub thumb_path: Option<String>,
}
