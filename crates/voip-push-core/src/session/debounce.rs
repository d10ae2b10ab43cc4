//! Action debouncer
//!
//! The telephony UI occasionally delivers the same action twice in quick
//! succession. The debouncer keeps a guard per `(call, action)` while an
//! action is being applied: an `end` guard is dropped as soon as the end has
//! been processed, an `answer` guard is held for a short cool-down so that a
//! near-simultaneous duplicate is absorbed without blocking a later,
//! legitimate replay.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::store::{SessionStore, Transition};
use crate::call::{CallId, CallState, UserAction};
use crate::error::VoipError;
use crate::events::{EventBridge, EventSource, VoipEvent};

/// Result of [`ActionDebouncer::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action went through the state machine
    Applied(AppliedAction),
    /// An identical action for this call is still in flight or cooling down
    Suppressed,
}

/// What happened to an action that was not suppressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedAction {
    /// The session changed state and the matching event was published
    Transitioned(Transition),
    /// The session is already gone or already absorbs this action
    NoOp,
    /// The action is not valid in the session's current state
    Rejected(CallState),
}

type Guard = (CallId, UserAction);

struct DebouncerInner {
    guards: Mutex<HashSet<Guard>>,
    store: Arc<SessionStore>,
    events: EventBridge,
    cooldown: Duration,
    runtime: Handle,
    shutdown: CancellationToken,
}

/// Guards user actions against duplicate delivery
#[derive(Clone)]
pub struct ActionDebouncer {
    inner: Arc<DebouncerInner>,
}

impl ActionDebouncer {
    pub fn new(
        store: Arc<SessionStore>,
        events: EventBridge,
        cooldown: Duration,
        runtime: Handle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(DebouncerInner {
                guards: Mutex::new(HashSet::new()),
                store,
                events,
                cooldown,
                runtime,
                shutdown,
            }),
        }
    }

    /// Apply a user action unless an identical one is already in flight
    pub fn apply(&self, call_id: CallId, action: UserAction, source: EventSource) -> ActionOutcome {
        let guard = (call_id, action);
        if !self.inner.guards.lock().insert(guard) {
            tracing::debug!(call_id = %call_id, %action, "Duplicate action suppressed");
            return ActionOutcome::Suppressed;
        }

        let applied = self.transition(call_id, action, source);

        match action {
            UserAction::End => {
                self.inner.guards.lock().remove(&guard);
            }
            UserAction::Answer => self.schedule_release(guard),
        }

        ActionOutcome::Applied(applied)
    }

    /// Whether a guard is currently held
    pub fn is_pending(&self, call_id: &CallId, action: UserAction) -> bool {
        self.inner.guards.lock().contains(&(*call_id, action))
    }

    /// Drop every guard, e.g. after the telephony UI reset
    pub fn clear(&self) {
        self.inner.guards.lock().clear();
    }

    fn transition(&self, call_id: CallId, action: UserAction, source: EventSource) -> AppliedAction {
        let events = &self.inner.events;
        let result = self.inner.store.transition_with(&call_id, action, |transition, _session| {
            if let Transition::Changed { to, .. } = transition {
                let timestamp = Utc::now();
                match to {
                    CallState::Answered => events.publish(VoipEvent::CallAnswered { call_id, timestamp, source }),
                    CallState::Ended => events.publish(VoipEvent::CallEnded { call_id, timestamp, source }),
                    CallState::Reported => {}
                }
            }
        });

        match result {
            Ok(transition) => match transition {
                Transition::Changed { from, to } => {
                    tracing::info!(call_id = %call_id, %action, %from, %to, "Call state changed");
                    AppliedAction::Transitioned(transition)
                }
                Transition::Unchanged(_) => AppliedAction::NoOp,
            },
            Err(VoipError::SessionNotFound { .. }) => {
                tracing::debug!(call_id = %call_id, %action, "No session for action, treating as ended");
                AppliedAction::NoOp
            }
            Err(VoipError::InvalidTransition { state, .. }) => {
                tracing::debug!(call_id = %call_id, %action, %state, "Action not valid in current state");
                AppliedAction::Rejected(state)
            }
            Err(e) => {
                tracing::warn!(call_id = %call_id, %action, error = %e, "Unexpected error applying action");
                AppliedAction::NoOp
            }
        }
    }

    fn schedule_release(&self, guard: Guard) {
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(inner.cooldown) => {}
                _ = inner.shutdown.cancelled() => {}
            }
            inner.guards.lock().remove(&guard);
        });
    }
}
