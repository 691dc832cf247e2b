//! Session registry: the single source of truth for which streams are active.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::{
    errors::{DomainError, DomainResult},
    session::{Epoch, SessionState, StreamId, StreamSession},
};

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<StreamId, StreamSession>>,
    next_epoch: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<StreamId, StreamSession>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<StreamId, StreamSession>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new session in `Starting` state.
    ///
    /// Rejected with `AlreadyActive` while a session with this id is starting or running.
    /// A session that is still `Stopping` is replaced; its loop notices the epoch change.
    pub fn start(&self, id: &StreamId, source_uri: &str) -> DomainResult<StreamSession> {
        let mut sessions = self.write();
        if sessions.get(id).is_some_and(StreamSession::is_active) {
            return Err(DomainError::AlreadyActive(id.to_string()));
        }
        let session = StreamSession {
            id: id.clone(),
            source_uri: source_uri.to_string(),
            state: SessionState::Starting,
            epoch: self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1,
            created_at: Utc::now(),
        };
        sessions.insert(id.clone(), session.clone());
        Ok(session)
    }

    /// Starting -> Running. False if the session was stopped or replaced meanwhile.
    pub fn mark_running(&self, id: &StreamId, epoch: Epoch) -> bool {
        match self.write().get_mut(id) {
            Some(s) if s.epoch == epoch && s.state == SessionState::Starting => {
                s.state = SessionState::Running;
                true
            }
            _ => false,
        }
    }

    /// Flags the session for termination without waiting for its loop and
    /// returns it. `None` when the id is unknown or already stopping.
    pub fn stop(&self, id: &StreamId) -> Option<StreamSession> {
        match self.write().get_mut(id) {
            Some(s) if s.is_active() => {
                s.state = SessionState::Stopping;
                Some(s.clone())
            }
            _ => None,
        }
    }

    pub fn is_active(&self, id: &StreamId) -> bool {
        self.read().get(id).is_some_and(StreamSession::is_active)
    }

    /// Whether the loop (or viewer) bound to `epoch` should keep going.
    pub fn is_current(&self, id: &StreamId, epoch: Epoch) -> bool {
        self.read()
            .get(id)
            .is_some_and(|s| s.epoch == epoch && s.is_active())
    }

    pub fn get(&self, id: &StreamId) -> Option<StreamSession> {
        self.read().get(id).cloned()
    }

    pub fn list_active(&self) -> BTreeSet<StreamId> {
        self.read()
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.read().values().filter(|s| s.is_active()).count()
    }

    /// Removes the entry if it still belongs to `epoch`. Called by an exiting loop.
    pub fn finish(&self, id: &StreamId, epoch: Epoch) -> bool {
        let mut sessions = self.write();
        if sessions.get(id).is_some_and(|s| s.epoch == epoch) {
            sessions.remove(id);
            true
        } else {
            false
        }
    }
}
