//! Call session types
//!
//! A [`CallSession`] is created when a push (or the application) reports an
//! incoming call and lives until the call ends. Its state machine is tiny:
//!
//! ```text
//!  Reported ──answer──► Answered
//!     │                    │
//!     └───────end──────────┴──end──► Ended   (Ended + anything = Ended)
//! ```
//!
//! # Examples
//!
//! ```rust
//! use voip_push_core::call::{CallState, UserAction};
//!
//! assert_eq!(CallState::Reported.apply(UserAction::Answer), Some(CallState::Answered));
//! assert_eq!(CallState::Answered.apply(UserAction::End), Some(CallState::Ended));
//! assert_eq!(CallState::Ended.apply(UserAction::Answer), Some(CallState::Ended));
//! assert_eq!(CallState::Answered.apply(UserAction::Answer), None);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a call session
pub type CallId = Uuid;

/// Lifecycle state of a call session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Reported to the telephony UI and ringing
    Reported,
    /// The user answered
    Answered,
    /// The call is over; the session is about to be removed
    Ended,
}

impl CallState {
    /// Next state after `action`, or `None` when the action is not valid here
    ///
    /// `Ended` absorbs every action so that late or repeated callbacks are
    /// harmless no-ops.
    pub fn apply(self, action: UserAction) -> Option<CallState> {
        match (self, action) {
            (CallState::Reported, UserAction::Answer) => Some(CallState::Answered),
            (CallState::Reported, UserAction::End) => Some(CallState::Ended),
            (CallState::Answered, UserAction::End) => Some(CallState::Ended),
            (CallState::Answered, UserAction::Answer) => None,
            (CallState::Ended, _) => Some(CallState::Ended),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Reported => write!(f, "Reported"),
            CallState::Answered => write!(f, "Answered"),
            CallState::Ended => write!(f, "Ended"),
        }
    }
}

/// User action delivered by the telephony UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    Answer,
    End,
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserAction::Answer => write!(f, "answer"),
            UserAction::End => write!(f, "end"),
        }
    }
}

/// One tracked call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    /// Identifier shared with the telephony UI
    pub id: CallId,
    /// Display string for the caller, a placeholder when the push carried none
    pub caller_label: String,
    /// Whether the call offers video
    pub has_video: bool,
    /// Current lifecycle state
    pub state: CallState,
    /// When the call was reported
    pub reported_at: DateTime<Utc>,
    /// When the call was answered, if it was
    pub answered_at: Option<DateTime<Utc>>,
}

impl CallSession {
    /// Create a session in the `Reported` state
    pub fn new(id: CallId, caller_label: impl Into<String>, has_video: bool) -> Self {
        Self {
            id,
            caller_label: caller_label.into(),
            has_video,
            state: CallState::Reported,
            reported_at: Utc::now(),
            answered_at: None,
        }
    }
}
