//! Session store
//!
//! The single source of truth for live calls. Every mutation goes through one
//! mutex and nothing in here awaits or does I/O, so the lock is only ever held
//! for a map lookup plus whatever non-blocking effect the caller attaches to a
//! transition.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::call::{CallId, CallSession, CallState, UserAction};
use crate::error::{VoipError, VoipResult};

/// Result of applying an action to a tracked session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The session moved to a new state
    Changed { from: CallState, to: CallState },
    /// The session was already in a state that absorbs the action
    Unchanged(CallState),
}

impl Transition {
    /// State the session is in after the transition
    pub fn state(&self) -> CallState {
        match self {
            Transition::Changed { to, .. } => *to,
            Transition::Unchanged(state) => *state,
        }
    }
}

/// Counters kept alongside the sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStoreStats {
    /// Sessions currently tracked
    pub active: usize,
    /// Sessions ever created
    pub total_created: usize,
    /// Sessions removed from the store
    pub total_removed: usize,
}

#[derive(Debug, Default)]
struct StoreInner {
    sessions: HashMap<CallId, CallSession>,
    total_created: usize,
    total_removed: usize,
}

/// In-memory map from call identifier to call session
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<StoreInner>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new session
    ///
    /// Fails with [`VoipError::SessionExists`] when the id is already tracked;
    /// the existing session is left untouched.
    pub fn create(&self, session: CallSession) -> VoipResult<()> {
        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(&session.id) {
            return Err(VoipError::SessionExists { call_id: session.id });
        }

        tracing::debug!(call_id = %session.id, caller = %session.caller_label, "Session created");
        inner.sessions.insert(session.id, session);
        inner.total_created += 1;
        Ok(())
    }

    /// Snapshot of one session
    pub fn get(&self, call_id: &CallId) -> VoipResult<CallSession> {
        self.inner
            .lock()
            .sessions
            .get(call_id)
            .cloned()
            .ok_or(VoipError::SessionNotFound { call_id: *call_id })
    }

    /// Whether a session with this id is tracked
    pub fn contains(&self, call_id: &CallId) -> bool {
        self.inner.lock().sessions.contains_key(call_id)
    }

    /// Apply `action` to a session
    pub fn transition(&self, call_id: &CallId, action: UserAction) -> VoipResult<Transition> {
        self.transition_with(call_id, action, |_, _| {})
    }

    /// Apply `action` and run `effect` while the lock is still held
    ///
    /// `effect` sees the transition and the updated session. It must not
    /// block: it exists so that event emission is ordered with the transition
    /// that caused it. A session reaching `Ended` is removed before the lock
    /// is released, so no other caller ever observes it.
    pub fn transition_with<F>(
        &self,
        call_id: &CallId,
        action: UserAction,
        effect: F,
    ) -> VoipResult<Transition>
    where
        F: FnOnce(&Transition, &CallSession),
    {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .get_mut(call_id)
            .ok_or(VoipError::SessionNotFound { call_id: *call_id })?;

        let from = session.state;
        let to = from.apply(action).ok_or(VoipError::InvalidTransition {
            call_id: *call_id,
            state: from,
            action,
        })?;

        let transition = if from == to {
            Transition::Unchanged(to)
        } else {
            session.state = to;
            if to == CallState::Answered {
                session.answered_at = Some(Utc::now());
            }
            Transition::Changed { from, to }
        };

        if to.is_terminal() {
            if let Some(ended) = inner.sessions.remove(call_id) {
                inner.total_removed += 1;
                tracing::debug!(call_id = %call_id, "Session ended and removed");
                effect(&transition, &ended);
            }
        } else {
            effect(&transition, session);
        }
        Ok(transition)
    }

    /// Stop tracking a session
    pub fn remove(&self, call_id: &CallId) -> Option<CallSession> {
        let mut inner = self.inner.lock();
        let removed = inner.sessions.remove(call_id);
        if removed.is_some() {
            inner.total_removed += 1;
            tracing::debug!(call_id = %call_id, "Session removed");
        }
        removed
    }

    /// Remove every tracked session and return the ones still live
    pub fn drain(&self) -> Vec<CallSession> {
        self.drain_with(|_| {})
    }

    /// Like [`SessionStore::drain`], running `effect` on each live session
    /// before the lock is released
    pub fn drain_with<F>(&self, mut effect: F) -> Vec<CallSession>
    where
        F: FnMut(&CallSession),
    {
        let mut inner = self.inner.lock();
        let drained: Vec<CallSession> = inner.sessions.drain().map(|(_, s)| s).collect();
        inner.total_removed += drained.len();
        let live: Vec<CallSession> = drained.into_iter().filter(|s| !s.state.is_terminal()).collect();
        live.iter().for_each(&mut effect);
        live
    }

    /// Copies of every tracked session
    pub fn snapshot(&self) -> Vec<CallSession> {
        self.inner.lock().sessions.values().cloned().collect()
    }

    /// Number of tracked sessions
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Whether no session is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters
    pub fn stats(&self) -> SessionStoreStats {
        let inner = self.inner.lock();
        SessionStoreStats {
            active: inner.sessions.len(),
            total_created: inner.total_created,
            total_removed: inner.total_removed,
        }
    }
}
