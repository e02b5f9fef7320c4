//! Single-slot hand-off for images received through the OS share sheet

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::models::SharedImage;

/// Holds at most one shared image.
///
/// `take` empties the slot in the same critical section that reads it, so
/// each share is delivered at most once even when several pages ask at the
/// same time. The first asker wins; the rest see an empty mailbox.
#[derive(Debug, Clone, Default)]
pub struct SharedImageMailbox {
    slot: Arc<Mutex<Option<SharedImage>>>,
}

impl SharedImageMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<SharedImage>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the slot contents with a newly shared image (or nothing)
    pub fn deliver(&self, image: Option<SharedImage>) {
        *self.slot() = image;
    }

    /// Remove and return the pending image, if any
    pub fn take(&self) -> Option<SharedImage> {
        self.slot().take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot().is_none()
    }
}
