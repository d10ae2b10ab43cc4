//! Error types for the call session layer
//!
//! Nothing in this crate is fatal to the process. Most failures either degrade
//! to "retry later" (token registration) or to "drop the duplicate" (pushes and
//! user actions), so the variants below are mostly consumed internally and only
//! a handful ever reach the application.

use thiserror::Error;

use crate::call::{CallId, CallState, UserAction};

/// Result type used throughout the crate
pub type VoipResult<T> = Result<T, VoipError>;

/// Errors produced by the call session layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoipError {
    /// A session with this identifier is already tracked
    #[error("Call session {call_id} already exists")]
    SessionExists { call_id: CallId },

    /// No session with this identifier is tracked
    #[error("Call session {call_id} not found")]
    SessionNotFound { call_id: CallId },

    /// The action is not valid for the session's current state
    #[error("Cannot {action} call {call_id} while {state}")]
    InvalidTransition {
        call_id: CallId,
        state: CallState,
        action: UserAction,
    },

    /// The telephony UI could not present an incoming call
    #[error("Telephony UI failed to present call {call_id}: {reason}")]
    PresentationFailed { call_id: CallId, reason: String },

    /// The telephony UI rejected a request to end a call
    #[error("Telephony UI failed to end call {call_id}: {reason}")]
    EndCallFailed { call_id: CallId, reason: String },

    /// The registration backend answered with a non-success status
    #[error("Token registration rejected with status {status}")]
    RegistrationRejected { status: u16 },

    /// Transport-level failure talking to the backend
    #[error("Network error: {reason}")]
    NetworkError { reason: String },

    /// An operation exceeded its deadline
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Configuration value is missing or malformed
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Components must be created from within a tokio runtime (or be handed one)
    #[error("No tokio runtime available: {reason}")]
    RuntimeUnavailable { reason: String },

    /// Anything else
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl VoipError {
    pub fn network(reason: impl Into<String>) -> Self {
        Self::NetworkError { reason: reason.into() }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout { operation: operation.into() }
    }

    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Whether retrying the same operation later can succeed
    ///
    /// The token registrar retries every registration failure regardless, but
    /// uses this to pick the log level: recoverable failures are expected on a
    /// flaky mobile network, the rest usually point at a backend or config bug.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NetworkError { .. } | Self::Timeout { .. } => true,
            // 5xx and rate limiting are transient, other 4xx are not
            Self::RegistrationRejected { status } => *status >= 500 || *status == 429,
            Self::SessionExists { .. }
            | Self::SessionNotFound { .. }
            | Self::InvalidTransition { .. }
            | Self::PresentationFailed { .. }
            | Self::EndCallFailed { .. }
            | Self::InvalidConfiguration { .. }
            | Self::RuntimeUnavailable { .. }
            | Self::InternalError { .. } => false,
        }
    }

    /// Short category label for structured logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::SessionExists { .. }
            | Self::SessionNotFound { .. }
            | Self::InvalidTransition { .. } => "session",
            Self::PresentationFailed { .. } | Self::EndCallFailed { .. } => "telephony",
            Self::RegistrationRejected { .. } => "registration",
            Self::NetworkError { .. } | Self::Timeout { .. } => "network",
            Self::InvalidConfiguration { .. } => "configuration",
            Self::RuntimeUnavailable { .. } | Self::InternalError { .. } => "internal",
        }
    }
}

impl From<reqwest::Error> for VoipError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout("registration request")
        } else if let Some(status) = err.status() {
            Self::RegistrationRejected {
                status: status.as_u16(),
            }
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<toml::de::Error> for VoipError {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid_configuration("toml", err.to_string())
    }
}

impl From<std::io::Error> for VoipError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(format!("I/O error: {}", err))
    }
}
