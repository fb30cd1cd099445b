use crate::{FatalHandler, FatalReason};
use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_sync::SpinLock;

/// Test double that records fatal reports instead of halting.
#[derive(Debug, Default)]
pub struct RecordingFatal {
    count: AtomicUsize,
    last: SpinLock<Option<FatalReason>>,
}

impl RecordingFatal {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            last: SpinLock::new(None),
        }
    }

    /// Number of fatal reports so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// The most recent report.
    #[must_use]
    pub fn last(&self) -> Option<FatalReason> {
        *self.last.lock()
    }
}

impl FatalHandler for RecordingFatal {
    fn fatal(&self, reason: FatalReason) {
        log::error!("fatal (recorded): {reason}");
        *self.last.lock() = Some(reason);
        self.count.fetch_add(1, Ordering::AcqRel);
    }
}
