//! Build progress: `{processed, total}` under its own lock.

#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Point-in-time progress of one build.
///
/// `total` grows as listings discover non-ignored leaves; `processed` counts
/// leaves whose attribute lookup succeeded. At completion they are equal
/// unless some lookups failed or were refused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub processed: u64,
    pub total: u64,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.processed == self.total
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }
}

/// Callback invoked after every progress change.
pub type ProgressObserver = Arc<dyn Fn(Progress) + Send + Sync>;

/// Shared progress counter for the duration of one build call.
///
/// The observer runs while the progress lock is held, so successive
/// observations are totally ordered and never go backwards. Observers should
/// be quick (print a line, bump a gauge).
#[derive(Default)]
pub struct ProgressTracker {
    state: Mutex<Progress>,
    observer: Option<ProgressObserver>,
}

impl ProgressTracker {
    pub fn new(observer: Option<ProgressObserver>) -> Self {
        Self {
            state: Mutex::new(Progress::default()),
            observer,
        }
    }

    /// Account for `n` newly discovered leaves.
    pub fn add_total(&self, n: u64) {
        if n == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.total = state.total.saturating_add(n);
        self.notify(*state);
    }

    /// One leaf merged into the snapshot.
    pub fn record_processed(&self) {
        let mut state = self.state.lock();
        state.processed = state.processed.saturating_add(1);
        self.notify(*state);
    }

    pub fn snapshot(&self) -> Progress {
        *self.state.lock()
    }

    fn notify(&self, progress: Progress) {
        if let Some(observer) = &self.observer {
            observer(progress);
        }
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("state", &*self.state.lock())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
