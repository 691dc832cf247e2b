//! Latest-frame slots, one per stream. Publishing replaces the slot's `Arc`
//! under the write lock, so readers see either the old packet or the new one.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::{session::{Epoch, StreamId}, stream::FramePacket};

struct Slot {
    epoch: Epoch,
    latest: Option<Arc<FramePacket>>,
}

#[derive(Default)]
pub struct FrameCache {
    slots: RwLock<HashMap<StreamId, Slot>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty slot owned by `epoch`, discarding whatever was there.
    pub fn open(&self, id: &StreamId, epoch: Epoch) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.insert(id.clone(), Slot { epoch, latest: None });
    }

    /// Replaces the slot's frame. Ignored unless the slot exists and belongs to `epoch`.
    pub fn publish(&self, id: &StreamId, epoch: Epoch, packet: FramePacket) -> bool {
        let packet = Arc::new(packet);
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        match slots.get_mut(id) {
            Some(slot) if slot.epoch == epoch => {
                slot.latest = Some(packet);
                true
            }
            _ => false,
        }
    }

    pub fn read_latest(&self, id: &StreamId) -> Option<Arc<FramePacket>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(id).and_then(|slot| slot.latest.clone())
    }

    pub fn remove_epoch(&self, id: &StreamId, epoch: Epoch) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.get(id).is_some_and(|slot| slot.epoch == epoch) {
            slots.remove(id);
        }
    }
}
