use std::sync::{Mutex, MutexGuard};

use crate::types::Sample;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    sample: Sample,
    fresh: bool,
}

/// Latest-sample hand-off between the telemetry thread and its readers.
///
/// One writer (the server loop), any number of readers. Both sides copy a
/// fixed-size value under a single mutex, so a reader always observes the
/// sample and the fresh flag from the same completed write.
///
/// `fresh` is never cleared by readers: once a sample has been published it
/// stays "fresh" until [`SampleStore::reset`].
#[derive(Debug, Default)]
pub struct SampleStore {
    slot: Mutex<Slot>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock still holds a whole Slot; the critical sections never
    // leave it half-written.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the current sample and mark it fresh.
    pub fn publish(&self, sample: Sample) {
        *self.lock() = Slot {
            sample,
            fresh: true,
        };
    }

    /// Copy out the current sample and the fresh flag.
    pub fn read(&self) -> (Sample, bool) {
        let slot = *self.lock();
        (slot.sample, slot.fresh)
    }

    /// Back to the identity sample, not fresh.
    pub fn reset(&self) {
        *self.lock() = Slot::default();
    }
}
