use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use crate::domain::{
    session::{Epoch, StreamId},
    stream::{FrameTally, StreamStats},
};

/// Cumulative per-session counters. Entries exist only while their session does.
#[derive(Default)]
pub struct StatsAggregator {
    entries: RwLock<HashMap<StreamId, (Epoch, StreamStats)>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts fresh counters for `epoch` if `current` still holds. The check runs
    /// under the write lock, so a stop that removes this epoch afterwards always
    /// wins and a stop that came first leaves no entry behind.
    pub fn begin(&self, id: &StreamId, epoch: Epoch, current: impl FnOnce() -> bool) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !current() {
            return false;
        }
        entries.insert(id.clone(), (epoch, StreamStats::new(Utc::now())));
        true
    }

    /// Adds one processed frame. A missing or foreign entry means the session was
    /// stopped; the update is dropped rather than resurrecting the entry.
    pub fn record(&self, id: &StreamId, epoch: Epoch, tally: &FrameTally, at: DateTime<Utc>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(id) {
            Some((owner, stats)) if *owner == epoch => {
                stats.record(tally, at);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: &StreamId) -> Option<StreamStats> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(id).map(|(_, stats)| stats.clone())
    }

    pub fn get_all(&self) -> BTreeMap<StreamId, StreamStats> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .map(|(id, (_, stats))| (id.clone(), stats.clone()))
            .collect()
    }

    pub fn remove_epoch(&self, id: &StreamId, epoch: Epoch) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(id).is_some_and(|(owner, _)| *owner == epoch) {
            entries.remove(id);
        }
    }
}
