//! Event-based change detection.
//!
//! The OS-native subscription (via `notify`) runs inside a dedicated thread
//! per library, keeping event bursts off the primary control flow. Raw events
//! accumulate in a shared buffer with set semantics; an adaptive debounce
//! flushes it — larger pending batches wait longer (capped) so a burst can
//! finish, small ones flush almost immediately. The buffer lives outside the
//! processing loop, so a crashed loop restarts without losing buffered
//! changes.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::{debug, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};

use crate::error::{EngineError, Result};
use crate::types::{ChangeSet, Library};
use crate::utils::config::DetectorConsts;
use crate::utils::paths::{
    is_hidden_index_path, is_media_file, is_os_hidden_file, path_relative_to, path_to_db_string,
};

use super::{ChangeDetector, ChangeSink};

struct EventWatch {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct EventDetector {
    sink: ChangeSink,
    debounce_max_ms: u64,
    watches: HashMap<String, EventWatch>,
}

impl EventDetector {
    pub fn new(sink: ChangeSink, debounce_max_ms: u64) -> Self {
        Self {
            sink,
            debounce_max_ms,
            watches: HashMap::new(),
        }
    }
}

impl ChangeDetector for EventDetector {
    fn watch(&mut self, library: &Library) -> Result<()> {
        if self.watches.contains_key(&library.id) {
            return Ok(());
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let sink = Arc::clone(&self.sink);
        let library = library.clone();
        let id = library.id.clone();
        let debounce_max = self.debounce_max_ms;

        // Buffer shared across restarts of the processing loop.
        let buffer: Arc<Mutex<ChangeSet>> = Arc::new(Mutex::new(ChangeSet::default()));

        let handle = std::thread::spawn(move || {
            loop {
                let run = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    event_loop(&library, &sink, &buffer, &stop_rx, debounce_max)
                }));
                match run {
                    Ok(Ok(())) => break,
                    Ok(Err(e)) => {
                        warn!("watcher for '{}' failed: {}; restarting", library.id, e);
                    }
                    Err(_) => {
                        warn!("watcher loop for '{}' panicked; restarting", library.id);
                    }
                }
                // Buffered changes survive the restart. Bail out if the stop
                // signal arrives while backing off.
                match stop_rx.recv_timeout(Duration::from_millis(250)) {
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
            }
        });
        self.watches.insert(id, EventWatch { stop_tx, handle });
        Ok(())
    }

    fn unwatch(&mut self, library_id: &str) {
        if let Some(w) = self.watches.remove(library_id) {
            stop_and_drain(w);
        }
    }

    fn shutdown(mut self: Box<Self>) {
        for (_, w) in self.watches.drain() {
            stop_and_drain(w);
        }
    }
}

/// Drain signal, bounded wait, then forced detach.
fn stop_and_drain(w: EventWatch) {
    let _ = w.stop_tx.send(());
    let deadline = Instant::now() + Duration::from_millis(DetectorConsts::DRAIN_WAIT_MS);
    while !w.handle.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    if w.handle.is_finished() {
        let _ = w.handle.join();
    } else {
        warn!("event watcher did not drain in time; detaching");
    }
}

/// Subscription + buffer + debounce for one library. Returns Ok on stop,
/// Err when the native watcher cannot be created or attached (the supervisor
/// backs off and retries).
fn event_loop(
    library: &Library,
    sink: &ChangeSink,
    buffer: &Arc<Mutex<ChangeSet>>,
    stop_rx: &Receiver<()>,
    debounce_max_ms: u64,
) -> Result<()> {
    let (raw_tx, raw_rx) = unbounded::<notify::Result<notify::Event>>();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = raw_tx.send(res);
    })
    .map_err(|e| EngineError::Watch(e.to_string()))?;
    watcher
        .watch(&library.root, RecursiveMode::Recursive)
        .map_err(|e| EngineError::Watch(e.to_string()))?;
    debug!("watching '{}' ({})", library.id, library.root.display());

    let mut deadline: Option<Instant> = None;
    loop {
        if stop_rx.try_recv().is_ok() {
            // Drain: one final flush attempt for whatever is buffered.
            let pending = std::mem::take(&mut *buffer.lock().unwrap());
            if !pending.is_empty() && !(sink)(&library.id, pending.clone()) {
                buffer.lock().unwrap().merge(pending);
            }
            return Ok(());
        }

        match raw_rx.recv_timeout(Duration::from_millis(DetectorConsts::RECV_TICK_MS)) {
            Ok(Ok(event)) => {
                let mut buf = buffer.lock().unwrap();
                if classify_event(&library.root, &event, &mut buf) {
                    let len = buf.len();
                    drop(buf);
                    deadline = Some(Instant::now() + adaptive_delay(len, debounce_max_ms));
                }
            }
            Ok(Err(e)) => warn!("watch error on '{}': {}", library.id, e),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return Ok(()),
        }

        if let Some(d) = deadline {
            if Instant::now() >= d {
                let pending = std::mem::take(&mut *buffer.lock().unwrap());
                if pending.is_empty() {
                    deadline = None;
                } else if (sink)(&library.id, pending.clone()) {
                    deadline = None;
                } else {
                    // Reconciliation gate closed: re-buffer and retry after a
                    // fixed backoff. Nothing is dropped.
                    buffer.lock().unwrap().merge(pending);
                    deadline = Some(
                        Instant::now() + Duration::from_millis(DetectorConsts::FLUSH_RETRY_MS),
                    );
                }
            }
        }
    }
}

/// Debounce window for the current buffer size: small batches flush almost
/// immediately, bursts wait longer, capped.
fn adaptive_delay(pending: usize, max_ms: u64) -> Duration {
    let ms = DetectorConsts::DEBOUNCE_BASE_MS
        .saturating_add(DetectorConsts::DEBOUNCE_PER_EVENT_MS.saturating_mul(pending as u64));
    Duration::from_millis(ms.min(max_ms))
}

/// Fold one native event into the buffer. Returns true when anything was
/// recorded. Repeated events for the same path collapse via set semantics.
fn classify_event(root: &Path, event: &notify::Event, changes: &mut ChangeSet) -> bool {
    let before = changes.len();
    match &event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                record_added(root, path, changes);
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                record_removed(root, path, changes);
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => {
                for path in &event.paths {
                    record_removed(root, path, changes);
                }
            }
            RenameMode::To => {
                for path in &event.paths {
                    record_added(root, path, changes);
                }
            }
            RenameMode::Both => {
                if let [from, to] = event.paths.as_slice() {
                    record_removed(root, from, changes);
                    record_added(root, to, changes);
                }
            }
            _ => {
                // Ambiguous rename: resolve by existence.
                for path in &event.paths {
                    if path.exists() {
                        record_added(root, path, changes);
                    } else {
                        record_removed(root, path, changes);
                    }
                }
            }
        },
        EventKind::Modify(_) => {
            for path in &event.paths {
                if let Some(rel) = eligible_rel(root, path) {
                    if path.is_file() && is_media_file(path) {
                        changes.files_changed.insert(rel);
                    }
                }
            }
        }
        _ => {}
    }
    changes.len() > before
}

fn record_added(root: &Path, path: &Path, changes: &mut ChangeSet) {
    if let Some(rel) = eligible_rel(root, path) {
        if path.is_dir() {
            changes.dirs_added.insert(rel);
        } else if is_media_file(path) {
            changes.files_added.insert(rel);
        }
    }
}

fn record_removed(root: &Path, path: &Path, changes: &mut ChangeSet) {
    if let Some(rel) = eligible_rel(root, path) {
        // The path is gone, so the kind is judged by shape: media extension
        // means file, anything else is treated as a directory.
        if is_media_file(path) {
            changes.files_removed.insert(rel);
        } else {
            changes.dirs_removed.insert(rel);
        }
    }
}

/// Relative db-string for an event path, or None when it falls outside the
/// root or inside the hidden engine directory.
fn eligible_rel(root: &Path, path: &Path) -> Option<String> {
    if is_hidden_index_path(path) || is_os_hidden_file(path) {
        return None;
    }
    let rel = path_relative_to(path, root)?;
    if rel.as_os_str().is_empty() {
        return None;
    }
    Some(path_to_db_string(&rel))
}
