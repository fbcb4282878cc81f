//! Scan subsystem: coordinator state machine, reconciler, persisted state.

mod coordinator;
mod reconciler;
pub mod state;

pub use coordinator::ScanCoordinator;
pub use reconciler::{ReconcileOutcome, Reconciler, enumerate_media};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation token. Checked by the reconciler at batch
/// boundaries only, never mid-file, so cancellation latency is bounded by one
/// batch.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request abort. The active pass returns its untouched remainder at the
    /// next batch boundary.
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
