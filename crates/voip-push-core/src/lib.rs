//! # voip-push-core
//!
//! Native call-session layer for a mobile VoIP application.
//!
//! This crate provides:
//! - A session store tracking every push-triggered call from report to end
//! - Duplicate suppression for redelivered pushes and repeated user actions
//! - Device token registration with buffering and fixed-delay retry
//! - Ordered, non-blocking lifecycle events for the application layer
//!
//! ## Architecture
//!
//! ```text
//!  push transport ──► CallIngress ──► SessionStore ──► TelephonyUi
//!  TelephonyUi ─────► ActionDebouncer ──► SessionStore ──► EventBridge ──► app
//!  push / app ──────► TokenRegistrar ──► RegistrationBackend
//!                                   └──► EventBridge ──► app
//! ```
//!
//! [`CallManager`] owns all of the above and is the only type most hosts need.
//! The platform telephony UI and the registration backend are reached through
//! the [`TelephonyUi`] and [`RegistrationBackend`] traits.

pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod ingress;
pub mod logging;
pub mod manager;
pub mod registration;
pub mod session;
pub mod telephony;

pub use call::{CallId, CallSession, CallState, UserAction};
pub use config::{CallConfig, RegistrationConfig, VoipConfig};
pub use error::{VoipError, VoipResult};
pub use events::{
    EventBridge, EventKey, EventKind, EventReceiver, EventSource, VoipEvent, VoipEventHandler,
};
pub use ingress::{CallIngress, IncomingCallRequest, IngressOutcome, PushPayload};
pub use logging::{setup_logging, LoggingConfig};
pub use manager::{CallManager, CallManagerBuilder};
pub use registration::{
    DeviceMetadata, DeviceToken, HttpRegistrationBackend, RegistrationBackend, RegistrationRequest,
    TokenRegistrar, TokenStatus, UserIdentity,
};
pub use session::{ActionDebouncer, ActionOutcome, AppliedAction, SessionStore, Transition};
pub use telephony::{ActionAck, IncomingCallInfo, TelephonyUi};
