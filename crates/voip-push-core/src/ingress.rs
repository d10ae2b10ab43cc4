//! Call ingress
//!
//! Turns a push notification (or an application request) into a tracked
//! session and asks the telephony UI to ring it. The session is created
//! before presenting, and only a successful create leads to a presentation,
//! so a redelivered push for a call that is already tracked never rings twice.
//! A presentation failure rolls the session back.
//!
//! # Payload Format
//!
//! The push payload is a JSON object. Every field is optional and unknown
//! fields are ignored:
//!
//! | field | aliases | default |
//! |---|---|---|
//! | `caller_name` | `caller`, `callerName` | `"Unknown"` |
//! | `has_video` | `video`, `hasVideo` | `true` |
//! | `call_id` | `callUUID`, `uuid` | fresh v4 UUID |
//!
//! A payload that isn't JSON at all is treated as carrying no metadata.

use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::call::{CallId, CallSession};
use crate::config::CallConfig;
use crate::session::SessionStore;
use crate::telephony::{IncomingCallInfo, TelephonyUi};

const CALLER_KEYS: &[&str] = &["caller_name", "caller", "callerName"];
const VIDEO_KEYS: &[&str] = &["has_video", "video", "hasVideo"];
const CALL_ID_KEYS: &[&str] = &["call_id", "callUUID", "uuid"];

/// Caller metadata extracted from a push payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPayload {
    pub caller_name: Option<String>,
    pub has_video: Option<bool>,
    pub call_id: Option<CallId>,
}

impl PushPayload {
    /// Decode leniently: malformed fields are dropped individually
    pub fn decode(bytes: &[u8]) -> Self {
        let value: Value = match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Push payload is not JSON, using defaults");
                return Self::default();
            }
        };
        let Some(object) = value.as_object() else {
            tracing::debug!("Push payload is not an object, using defaults");
            return Self::default();
        };

        let lookup = |keys: &[&str]| keys.iter().find_map(|key| object.get(*key));

        let caller_name = lookup(CALLER_KEYS)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let has_video = lookup(VIDEO_KEYS).and_then(|v| match v {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_u64().map(|n| n != 0),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        });

        let call_id = lookup(CALL_ID_KEYS)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());

        Self {
            caller_name,
            has_video,
            call_id,
        }
    }
}

/// Request to report an incoming call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingCallRequest {
    pub caller_label: Option<String>,
    pub has_video: Option<bool>,
    /// Identifier to use; a fresh one is generated when absent
    pub call_id: Option<CallId>,
}

impl IncomingCallRequest {
    pub fn new(caller_label: impl Into<String>) -> Self {
        Self {
            caller_label: Some(caller_label.into()),
            ..Default::default()
        }
    }

    pub fn with_video(mut self, has_video: bool) -> Self {
        self.has_video = Some(has_video);
        self
    }

    pub fn with_call_id(mut self, call_id: CallId) -> Self {
        self.call_id = Some(call_id);
        self
    }
}

impl From<PushPayload> for IncomingCallRequest {
    fn from(payload: PushPayload) -> Self {
        Self {
            caller_label: payload.caller_name,
            has_video: payload.has_video,
            call_id: payload.call_id,
        }
    }
}

/// What happened to an incoming call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressOutcome {
    /// The call is tracked and ringing
    Presented(CallId),
    /// A session with this id already exists; nothing was presented
    Duplicate(CallId),
    /// The telephony UI refused the call; the session was rolled back
    PresentationFailed { call_id: CallId, reason: String },
}

impl IngressOutcome {
    pub fn call_id(&self) -> CallId {
        match self {
            IngressOutcome::Presented(id) | IngressOutcome::Duplicate(id) => *id,
            IngressOutcome::PresentationFailed { call_id, .. } => *call_id,
        }
    }

    pub fn is_presented(&self) -> bool {
        matches!(self, IngressOutcome::Presented(_))
    }
}

/// Creates sessions for incoming calls and hands them to the telephony UI
#[derive(Clone)]
pub struct CallIngress {
    store: Arc<SessionStore>,
    telephony: Arc<dyn TelephonyUi>,
    placeholder_label: String,
    default_has_video: bool,
}

impl CallIngress {
    pub fn new(store: Arc<SessionStore>, telephony: Arc<dyn TelephonyUi>, config: &CallConfig) -> Self {
        Self {
            store,
            telephony,
            placeholder_label: config.placeholder_caller_label.clone(),
            default_has_video: config.default_has_video,
        }
    }

    /// Handle a raw push payload
    pub async fn on_incoming_push(&self, payload: &[u8]) -> IngressOutcome {
        let request = IncomingCallRequest::from(PushPayload::decode(payload));
        self.report_incoming_call(request).await
    }

    /// Create a session and present it
    pub async fn report_incoming_call(&self, request: IncomingCallRequest) -> IngressOutcome {
        let call_id = request.call_id.unwrap_or_else(Uuid::new_v4);
        let caller_label = request
            .caller_label
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| self.placeholder_label.clone());
        let has_video = request.has_video.unwrap_or(self.default_has_video);

        let session = CallSession::new(call_id, caller_label, has_video);
        let info = IncomingCallInfo::from(&session);

        if self.store.create(session).is_err() {
            tracing::info!(call_id = %call_id, "Call already tracked, ignoring duplicate");
            return IngressOutcome::Duplicate(call_id);
        }

        match self.telephony.present_incoming_call(&info).await {
            Ok(()) => {
                tracing::info!(call_id = %call_id, caller = %info.caller_label, has_video, "Incoming call presented");
                IngressOutcome::Presented(call_id)
            }
            Err(e) => {
                self.store.remove(&call_id);
                tracing::warn!(call_id = %call_id, error = %e, "Failed to present incoming call, rolled back");
                IngressOutcome::PresentationFailed {
                    call_id,
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{VoipError, VoipResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingUi {
        presented: Mutex<Vec<IncomingCallInfo>>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl TelephonyUi for RecordingUi {
        async fn present_incoming_call(&self, call: &IncomingCallInfo) -> VoipResult<()> {
            if *self.fail.lock() {
                return Err(VoipError::PresentationFailed {
                    call_id: call.call_id,
                    reason: "busy".into(),
                });
            }
            self.presented.lock().push(call.clone());
            Ok(())
        }

        async fn request_end_call(&self, _call_id: CallId) -> VoipResult<()> {
            Ok(())
        }
    }

    fn ingress() -> (CallIngress, Arc<SessionStore>, Arc<RecordingUi>) {
        let store = Arc::new(SessionStore::new());
        let ui = Arc::new(RecordingUi::default());
        let ingress = CallIngress::new(store.clone(), ui.clone(), &CallConfig::default());
        (ingress, store, ui)
    }

    #[test]
    fn test_decode_aliases() {
        let payload = PushPayload::decode(br#"{"callerName": "Alice", "hasVideo": false}"#);
        assert_eq!(payload.caller_name.as_deref(), Some("Alice"));
        assert_eq!(payload.has_video, Some(false));
        assert_eq!(payload.call_id, None);

        let id = Uuid::new_v4();
        let raw = format!(r#"{{"caller": "Bob", "video": "yes", "callUUID": "{}"}}"#, id);
        let payload = PushPayload::decode(raw.as_bytes());
        assert_eq!(payload.caller_name.as_deref(), Some("Bob"));
        assert_eq!(payload.has_video, Some(true));
        assert_eq!(payload.call_id, Some(id));
    }

    #[test]
    fn test_decode_garbage_yields_defaults() {
        assert_eq!(PushPayload::decode(b"\x00\xffnot json"), PushPayload::default());
        assert_eq!(PushPayload::decode(b"[1, 2, 3]"), PushPayload::default());

        // One bad field doesn't discard the rest
        let payload = PushPayload::decode(br#"{"caller_name": "Carol", "has_video": [], "uuid": "nope"}"#);
        assert_eq!(payload.caller_name.as_deref(), Some("Carol"));
        assert_eq!(payload.has_video, None);
        assert_eq!(payload.call_id, None);
    }

    #[tokio::test]
    async fn test_missing_metadata_uses_placeholder() {
        let (ingress, store, ui) = ingress();
        let outcome = ingress.on_incoming_push(b"{}").await;

        assert!(outcome.is_presented());
        let session = store.get(&outcome.call_id()).unwrap();
        assert_eq!(session.caller_label, "Unknown");
        assert!(session.has_video);
        assert_eq!(ui.presented.lock().len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_duplicate_push_presents_once() {
        let (ingress, store, ui) = ingress();
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"caller_name": "Alice", "call_id": "{}"}}"#, id);

        let first = ingress.on_incoming_push(raw.as_bytes()).await;
        let second = ingress.on_incoming_push(raw.as_bytes()).await;

        assert_eq!(first, IngressOutcome::Presented(id));
        assert_eq!(second, IngressOutcome::Duplicate(id));
        assert_eq!(ui.presented.lock().len(), 1);
        assert_eq!(store.len(), 1);
        assert!(logs_contain("ignoring duplicate"));
    }

    #[tokio::test]
    async fn test_presentation_failure_rolls_back() {
        let (ingress, store, ui) = ingress();
        *ui.fail.lock() = true;

        let request = IncomingCallRequest::new("Dave").with_video(false);
        let outcome = ingress.report_incoming_call(request).await;

        assert!(matches!(outcome, IngressOutcome::PresentationFailed { .. }));
        assert!(!store.contains(&outcome.call_id()));
        assert!(store.is_empty());
    }
}
