//! Continuous change detection.
//!
//! Two interchangeable strategies behind one trait, selected once by
//! configuration — call sites never special-case which is active. Detected
//! deltas are delivered as [`ChangeSet`]s to a [`ChangeSink`]; the sink
//! returns false when the reconciliation gate is closed (scan in progress),
//! in which case the event detector re-buffers and the polling detector
//! relies on its next cycle's diff.

mod event;
mod poll;

pub use event::EventDetector;
pub use poll::PollingDetector;

use std::sync::Arc;

use crate::error::Result;
use crate::scan::ScanCoordinator;
use crate::store::ConnectionPool;
use crate::types::{ChangeSet, Library};
use crate::utils::config::{DetectorKind, EngineConfig};

/// Delivery target for detector batches. Returns true when the batch was
/// consumed, false when it was rejected by the reconciliation gate.
pub type ChangeSink = Arc<dyn Fn(&str, ChangeSet) -> bool + Send + Sync>;

/// Filesystem change detection for registered libraries. Each watched
/// library gets its own background machinery; `unwatch` tears it down.
pub trait ChangeDetector: Send {
    fn watch(&mut self, library: &Library) -> Result<()>;
    fn unwatch(&mut self, library_id: &str);
    /// Graceful teardown of every watch: drain signal, bounded wait, then
    /// forced detach.
    fn shutdown(self: Box<Self>);
}

/// Build the configured detector strategy.
pub fn create_detector(
    kind: DetectorKind,
    sink: ChangeSink,
    pool: Arc<ConnectionPool>,
    config: &EngineConfig,
) -> Box<dyn ChangeDetector> {
    match kind {
        DetectorKind::Polling => Box::new(PollingDetector::new(
            sink,
            pool,
            std::time::Duration::from_millis(config.poll_interval_ms),
        )),
        DetectorKind::Event => Box::new(EventDetector::new(sink, config.debounce_max_ms)),
    }
}

/// Sink that routes batches into the coordinator's status gate.
pub fn coordinator_sink(coordinator: &Arc<ScanCoordinator>) -> ChangeSink {
    let coordinator = Arc::clone(coordinator);
    Arc::new(move |library_id: &str, changes: ChangeSet| {
        match coordinator.submit_changes(library_id, changes) {
            Ok(consumed) => consumed,
            Err(e) => {
                // Unknown library or store failure: drop the batch; the next
                // full pass reconverges.
                log::warn!("change batch for '{}' dropped: {}", library_id, e);
                true
            }
        }
    })
}
