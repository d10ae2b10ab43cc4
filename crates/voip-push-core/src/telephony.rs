//! Telephony UI boundary
//!
//! The platform surface that rings, answers and hangs up calls lives outside
//! this crate. The core talks to it through [`TelephonyUi`] and receives user
//! actions back through the call manager, each carrying an [`ActionAck`] that
//! must be fulfilled exactly once so the platform never stays waiting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::oneshot;

use crate::call::{CallId, CallSession};
use crate::error::VoipResult;

/// What the telephony UI needs to ring a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCallInfo {
    pub call_id: CallId,
    pub caller_label: String,
    pub has_video: bool,
    pub received_at: DateTime<Utc>,
}

impl From<&CallSession> for IncomingCallInfo {
    fn from(session: &CallSession) -> Self {
        Self {
            call_id: session.id,
            caller_label: session.caller_label.clone(),
            has_video: session.has_video,
            received_at: session.reported_at,
        }
    }
}

/// Outbound interface to the platform telephony UI
///
/// # Examples
///
/// ```rust
/// use voip_push_core::telephony::{TelephonyUi, IncomingCallInfo};
/// use voip_push_core::{CallId, VoipResult};
/// use async_trait::async_trait;
///
/// struct LoggingUi;
///
/// #[async_trait]
/// impl TelephonyUi for LoggingUi {
///     async fn present_incoming_call(&self, call: &IncomingCallInfo) -> VoipResult<()> {
///         println!("Ringing for {}", call.caller_label);
///         Ok(())
///     }
///
///     async fn request_end_call(&self, call_id: CallId) -> VoipResult<()> {
///         println!("Ending {}", call_id);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait TelephonyUi: Send + Sync {
    /// Ring an incoming call; an error means the call was not shown
    async fn present_incoming_call(&self, call: &IncomingCallInfo) -> VoipResult<()>;

    /// Ask the UI to end a call
    ///
    /// On success the UI is expected to report the end back through
    /// `CallManager::on_user_ended`.
    async fn request_end_call(&self, call_id: CallId) -> VoipResult<()>;
}

/// One-shot acknowledgment of a user action
///
/// Consumed by [`ActionAck::fulfill`]. An ack that is dropped without being
/// fulfilled fulfils itself, so the platform is released on every path.
pub struct ActionAck {
    fulfil: Option<Box<dyn FnOnce() + Send>>,
}

impl ActionAck {
    /// Wrap the platform's completion callback
    pub fn new<F>(fulfil: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            fulfil: Some(Box::new(fulfil)),
        }
    }

    /// Ack with no platform counterpart
    pub fn noop() -> Self {
        Self { fulfil: None }
    }

    /// Ack paired with a receiver that resolves once it is fulfilled
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let ack = Self::new(move || {
            let _ = tx.send(());
        });
        (ack, rx)
    }

    pub fn fulfill(mut self) {
        if let Some(fulfil) = self.fulfil.take() {
            fulfil();
        }
    }
}

impl fmt::Debug for ActionAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionAck")
            .field("pending", &self.fulfil.is_some())
            .finish()
    }
}

impl Drop for ActionAck {
    fn drop(&mut self) {
        if let Some(fulfil) = self.fulfil.take() {
            tracing::warn!("Action acknowledgment dropped unfulfilled, fulfilling now");
            fulfil();
        }
    }
}
