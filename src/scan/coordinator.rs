//! Per-library scan/sync state machine.
//!
//! One coordinator instance per process. The status field is the gate: at
//! most one active reconciliation per library, enforced as a checked
//! precondition, not a lock. Every transition is persisted immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::extract::MediaExtractor;
use crate::observer::{ObserverRegistry, ScanEvent};
use crate::scan::state::{load_state, persist_state, reset_state};
use crate::scan::{CancelToken, ReconcileOutcome, Reconciler};
use crate::store::ConnectionPool;
use crate::types::{ChangeSet, Library, ScanProgress, ScanState, ScanStatus};
use crate::utils::config::{EngineConfig, RESUME_SETTLE_MS};
use crate::utils::paths::now_secs;

struct LibraryEntry {
    library: Library,
    state: ScanState,
    cancel: CancelToken,
    /// True while a ChangeSet apply is running. Extends the status gate to
    /// detector batches without persisting a `scanning` status for them.
    reconciling: bool,
    worker: Option<JoinHandle<()>>,
}

/// Owns every library's scan state machine, its persistence, and the worker
/// threads running reconciliation. Constructed explicitly with its
/// collaborators (dependency injection; tests build independent instances).
pub struct ScanCoordinator {
    pool: Arc<ConnectionPool>,
    extractor: Arc<dyn MediaExtractor>,
    observers: Arc<ObserverRegistry>,
    config: EngineConfig,
    libraries: Mutex<HashMap<String, LibraryEntry>>,
    /// Self-handle for worker threads.
    me: Weak<ScanCoordinator>,
}

impl ScanCoordinator {
    pub fn new(
        pool: Arc<ConnectionPool>,
        extractor: Arc<dyn MediaExtractor>,
        observers: Arc<ObserverRegistry>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            pool,
            extractor,
            observers,
            config,
            libraries: Mutex::new(HashMap::new()),
            me: me.clone(),
        })
    }

    /// Register a library and reload its persisted scan state. Libraries
    /// found mid-scan stay `scanning` until [`Self::startup_resume`] picks
    /// them up.
    pub fn register_library(&self, library: Library) {
        let state = load_state(&library.root).unwrap_or_else(ScanState::idle);
        debug!(
            "registered library '{}' ({}), status {:?}",
            library.id,
            library.root.display(),
            state.status
        );
        self.libraries.lock().unwrap().insert(
            library.id.clone(),
            LibraryEntry {
                library,
                state,
                cancel: CancelToken::new(),
                reconciling: false,
                worker: None,
            },
        );
    }

    /// Stop any active scan, reset persisted state, force-close the pooled
    /// handle, and forget the library. The caller clears the read cache.
    pub fn remove_library(&self, library_id: &str) -> Result<()> {
        let (root, cancel, worker) = {
            let mut map = self.libraries.lock().unwrap();
            let entry = map
                .remove(library_id)
                .ok_or_else(|| EngineError::NotFound(format!("library '{library_id}'")))?;
            (entry.library.root, entry.cancel, entry.worker)
        };
        cancel.request();
        if let Some(handle) = worker {
            let _ = handle.join();
        }
        reset_state(&root);
        self.pool.close(&root);
        self.observers.unsubscribe_all(library_id);
        Ok(())
    }

    /// Current state snapshot for a library.
    pub fn state(&self, library_id: &str) -> Result<ScanState> {
        let map = self.libraries.lock().unwrap();
        map.get(library_id)
            .map(|e| e.state.clone())
            .ok_or_else(|| EngineError::NotFound(format!("library '{library_id}'")))
    }

    /// Registered library by id.
    pub fn library(&self, library_id: &str) -> Result<Library> {
        let map = self.libraries.lock().unwrap();
        map.get(library_id)
            .map(|e| e.library.clone())
            .ok_or_else(|| EngineError::NotFound(format!("library '{library_id}'")))
    }

    /// Start a full scan. Fails with `AlreadyInProgress` while a scan or sync
    /// is active for this library.
    pub fn request_full_scan(&self, library_id: &str) -> Result<()> {
        let (library, cancel) = self.begin_scan(library_id)?;
        self.spawn_worker(library_id, move |coord, id| {
            let reconciler = coord.reconciler();
            let progress_coord = Arc::clone(coord);
            let id_owned = id.to_string();
            reconciler.full_scan(&library, &cancel, &move |p| {
                progress_coord.update_progress(&id_owned, p);
            })
        });
        Ok(())
    }

    /// Start an on-demand incremental sync (derived diff). Same gate as a
    /// full scan.
    pub fn request_sync(&self, library_id: &str) -> Result<()> {
        let (library, cancel) = self.begin_scan(library_id)?;
        self.spawn_worker(library_id, move |coord, id| {
            let reconciler = coord.reconciler();
            let progress_coord = Arc::clone(coord);
            let id_owned = id.to_string();
            reconciler.sync(&library, None, &cancel, &move |p| {
                progress_coord.update_progress(&id_owned, p);
            })
        });
        Ok(())
    }

    /// Request a cooperative pause of the active scan. The reconciler
    /// observes the flag at the next batch boundary and hands back the
    /// untouched remainder.
    pub fn request_stop(&self, library_id: &str) -> Result<()> {
        let map = self.libraries.lock().unwrap();
        let entry = map
            .get(library_id)
            .ok_or_else(|| EngineError::NotFound(format!("library '{library_id}'")))?;
        if entry.state.status != ScanStatus::Scanning {
            return Err(EngineError::InvalidState(format!(
                "no active scan for library '{library_id}'"
            )));
        }
        entry.cancel.request();
        Ok(())
    }

    /// Resume a paused scan with exactly the preserved pending list — no
    /// re-enumeration.
    pub fn request_resume(&self, library_id: &str) -> Result<()> {
        let (library, cancel, pending, progress) = {
            let mut map = self.libraries.lock().unwrap();
            let entry = map
                .get_mut(library_id)
                .ok_or_else(|| EngineError::NotFound(format!("library '{library_id}'")))?;
            if entry.state.status != ScanStatus::Paused || entry.state.pending_files.is_empty() {
                return Err(EngineError::InvalidState(format!(
                    "library '{library_id}' has no paused scan to resume"
                )));
            }
            let pending = std::mem::take(&mut entry.state.pending_files);
            entry.state.status = ScanStatus::Scanning;
            entry.cancel = CancelToken::new();
            persist_state(&entry.library.root, &entry.state);
            (
                entry.library.clone(),
                entry.cancel.clone(),
                pending,
                entry.state.progress,
            )
        };
        self.spawn_worker(library_id, move |coord, id| {
            let reconciler = coord.reconciler();
            let progress_coord = Arc::clone(coord);
            let id_owned = id.to_string();
            reconciler.resume(
                &library,
                pending,
                progress.processed,
                progress.total,
                &cancel,
                &move |p| {
                    progress_coord.update_progress(&id_owned, p);
                },
            )
        });
        Ok(())
    }

    /// Apply one detector ChangeSet through the status gate. Returns
    /// `Ok(false)` without applying when a reconciliation is active — the
    /// event detector re-buffers, the polling detector self-heals next cycle.
    pub fn submit_changes(&self, library_id: &str, changes: ChangeSet) -> Result<bool> {
        let library = {
            let mut map = self.libraries.lock().unwrap();
            let entry = map
                .get_mut(library_id)
                .ok_or_else(|| EngineError::NotFound(format!("library '{library_id}'")))?;
            if entry.state.status == ScanStatus::Scanning || entry.reconciling {
                return Ok(false);
            }
            entry.reconciling = true;
            entry.library.clone()
        };

        let result = self.reconciler().apply_change_set(&library, &changes);

        if let Some(entry) = self.libraries.lock().unwrap().get_mut(library_id) {
            entry.reconciling = false;
        }

        match result {
            Ok(outcome) => {
                debug!(
                    "applied {} changes to '{}': {} indexed, {} removed",
                    changes.len(),
                    library_id,
                    outcome.indexed,
                    outcome.removed
                );
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Reload-time recovery: re-announce last known progress for every
    /// library found mid-scan, then auto-resume it after a settle delay, so
    /// observers never see a false idle gap.
    pub fn startup_resume(&self) {
        let interrupted: Vec<(String, ScanProgress)> = {
            let map = self.libraries.lock().unwrap();
            map.iter()
                .filter(|(_, e)| e.state.status == ScanStatus::Scanning)
                .map(|(id, e)| (id.clone(), e.state.progress))
                .collect()
        };
        let Some(coord) = self.me.upgrade() else {
            return;
        };
        for (id, progress) in interrupted {
            let coord = Arc::clone(&coord);
            std::thread::spawn(move || {
                coord.observers.emit(&id, &ScanEvent::Progress(progress));
                std::thread::sleep(Duration::from_millis(RESUME_SETTLE_MS));
                info!("auto-resuming interrupted scan of '{}'", id);
                if let Some(entry) = coord.libraries.lock().unwrap().get_mut(&id) {
                    // No pending list was preserved (pause persists one, a
                    // crash does not), so the scan restarts from a fresh
                    // enumeration; unchanged files are skipped by the diff.
                    entry.state.status = ScanStatus::Idle;
                }
                if let Err(e) = coord.request_full_scan(&id) {
                    warn!("auto-resume of '{}' failed: {}", id, e);
                }
            });
        }
    }

    /// Request abort everywhere and grant in-flight batches a bounded grace
    /// window. States persist on each transition, so nothing further is
    /// written here.
    pub fn shutdown(&self, grace: Duration) {
        let handles: Vec<JoinHandle<()>> = {
            let mut map = self.libraries.lock().unwrap();
            for entry in map.values_mut() {
                if entry.state.status == ScanStatus::Scanning {
                    entry.cancel.request();
                }
            }
            map.values_mut().filter_map(|e| e.worker.take()).collect()
        };
        let deadline = Instant::now() + grace;
        for handle in handles {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
            // Still running past the grace window: detached, it observes the
            // abort flag at its next batch boundary.
        }
    }

    // ---- internals ----

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(&self.pool, self.extractor.as_ref())
            .with_batch_size(self.config.scan_batch_size)
            .with_mtime_window(self.config.mtime_window_ns)
    }

    /// Gate check + transition to `scanning` + persist. Returns the library
    /// and a fresh cancel token for the worker.
    fn begin_scan(&self, library_id: &str) -> Result<(Library, CancelToken)> {
        let mut map = self.libraries.lock().unwrap();
        let entry = map
            .get_mut(library_id)
            .ok_or_else(|| EngineError::NotFound(format!("library '{library_id}'")))?;
        if entry.state.status == ScanStatus::Scanning || entry.reconciling {
            return Err(EngineError::AlreadyInProgress(library_id.to_string()));
        }
        entry.state = ScanState {
            status: ScanStatus::Scanning,
            progress: ScanProgress::default(),
            pending_files: Vec::new(),
            started_at: now_secs(),
        };
        entry.cancel = CancelToken::new();
        persist_state(&entry.library.root, &entry.state);
        Ok((entry.library.clone(), entry.cancel.clone()))
    }

    fn spawn_worker<F>(&self, library_id: &str, work: F)
    where
        F: FnOnce(&Arc<ScanCoordinator>, &str) -> Result<ReconcileOutcome> + Send + 'static,
    {
        let Some(coord) = self.me.upgrade() else {
            return;
        };
        let id = library_id.to_string();
        let handle = std::thread::spawn(move || {
            let result = work(&coord, &id);
            coord.finish_scan(&id, result);
        });
        if let Some(entry) = self.libraries.lock().unwrap().get_mut(library_id) {
            entry.worker = Some(handle);
        }
    }

    /// Terminal transition for a worker: paused with remainder, completed, or
    /// back to idle on error. Persist + notify.
    fn finish_scan(&self, library_id: &str, result: Result<ReconcileOutcome>) {
        let mut map = self.libraries.lock().unwrap();
        let Some(entry) = map.get_mut(library_id) else {
            return;
        };
        match result {
            Ok(outcome) if outcome.was_cancelled() => {
                entry.state.status = ScanStatus::Paused;
                entry.state.pending_files = outcome.pending;
                persist_state(&entry.library.root, &entry.state);
                let event = ScanEvent::Paused(entry.state.progress);
                drop(map);
                self.observers.emit(library_id, &event);
            }
            Ok(outcome) => {
                entry.state.status = ScanStatus::Completed;
                entry.state.pending_files.clear();
                persist_state(&entry.library.root, &entry.state);
                drop(map);
                self.observers.emit(
                    library_id,
                    &ScanEvent::Completed {
                        processed: outcome.processed,
                    },
                );
            }
            Err(e) => {
                warn!("scan of '{}' failed: {}", library_id, e);
                entry.state.status = ScanStatus::Idle;
                entry.state.pending_files.clear();
                persist_state(&entry.library.root, &entry.state);
                let event = ScanEvent::Error {
                    message: e.to_string(),
                };
                drop(map);
                self.observers.emit(library_id, &event);
            }
        }
    }

    /// Batch progress: update the retained snapshot, persist, notify.
    fn update_progress(&self, library_id: &str, progress: ScanProgress) {
        {
            let mut map = self.libraries.lock().unwrap();
            if let Some(entry) = map.get_mut(library_id) {
                entry.state.progress = progress;
                persist_state(&entry.library.root, &entry.state);
            }
        }
        self.observers
            .emit(library_id, &ScanEvent::Progress(progress));
    }
}
