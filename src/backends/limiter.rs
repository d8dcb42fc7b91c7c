//! Per-slot bound on outbound archive calls.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::collect::Slot;

/// One semaphore per slot, created up front.
#[derive(Debug)]
pub struct SlotLimiter {
    semaphores: HashMap<Slot, Arc<Semaphore>>,
}

impl SlotLimiter {
    /// `per_slot` calls may run at once against each slot. Zero is treated as one.
    #[must_use]
    pub fn new(per_slot: usize) -> Self {
        let per_slot = per_slot.max(1);
        Self {
            semaphores: Slot::PLAYBACK
                .into_iter()
                .map(|slot| (slot, Arc::new(Semaphore::new(per_slot))))
                .collect(),
        }
    }

    /// Wait until a call to `slot` may start.
    ///
    /// `None` means no semaphore exists for `slot`; every [`Slot`] has one.
    pub async fn acquire(&self, slot: Slot) -> Option<SlotPermit> {
        let semaphore = Arc::clone(self.semaphores.get(&slot)?);
        semaphore.acquire_owned().await.ok().map(SlotPermit)
    }

    /// Free permits of `slot` right now.
    #[must_use]
    pub fn available(&self, slot: Slot) -> usize {
        self.semaphores
            .get(&slot)
            .map_or(0, |semaphore| semaphore.available_permits())
    }
}

/// Held for the duration of one call; dropping it frees the slot.
#[derive(Debug)]
pub struct SlotPermit(OwnedSemaphorePermit);
