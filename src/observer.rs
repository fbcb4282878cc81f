//! Scan notification channel: per-library observers, fire-and-forget.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::types::ScanProgress;

/// Events emitted per library id. Delivery is fire-and-forget: no
/// acknowledgment, no ordering guarantee across libraries.
#[derive(Clone, Debug)]
pub enum ScanEvent {
    Progress(ScanProgress),
    Completed { processed: usize },
    Paused(ScanProgress),
    Error { message: String },
}

/// Receives scan events for the library ids it subscribed to. Implementations
/// must be quick; they run on the scanning thread.
pub trait ScanObserver: Send + Sync {
    fn notify(&self, library_id: &str, event: &ScanEvent);
}

/// Per-library observer registry. Constructed explicitly and passed to the
/// components that emit (never a process-wide singleton), so tests can run
/// independent instances.
#[derive(Default)]
pub struct ObserverRegistry {
    subs: Mutex<HashMap<String, Vec<Arc<dyn ScanObserver>>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, library_id: &str, observer: Arc<dyn ScanObserver>) {
        self.subs
            .lock()
            .unwrap()
            .entry(library_id.to_string())
            .or_default()
            .push(observer);
    }

    pub fn unsubscribe_all(&self, library_id: &str) {
        self.subs.lock().unwrap().remove(library_id);
    }

    /// Dispatch to every observer of `library_id`. Never fails.
    pub fn emit(&self, library_id: &str, event: &ScanEvent) {
        let observers: Vec<Arc<dyn ScanObserver>> = {
            let subs = self.subs.lock().unwrap();
            subs.get(library_id).cloned().unwrap_or_default()
        };
        for obs in observers {
            obs.notify(library_id, event);
        }
    }
}
