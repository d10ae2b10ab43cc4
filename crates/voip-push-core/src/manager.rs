//! Call manager
//!
//! [`CallManager`] wires the session store, action debouncer, call ingress,
//! token registrar and event bridge together and is the single entry point
//! for the push transport, the telephony UI and the application.
//!
//! # Examples
//!
//! ```rust,no_run
//! use voip_push_core::{CallManager, VoipConfig, UserIdentity};
//! use voip_push_core::telephony::{TelephonyUi, IncomingCallInfo, ActionAck};
//! use voip_push_core::{CallId, VoipResult};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Ui;
//!
//! #[async_trait]
//! impl TelephonyUi for Ui {
//!     async fn present_incoming_call(&self, _call: &IncomingCallInfo) -> VoipResult<()> { Ok(()) }
//!     async fn request_end_call(&self, _call_id: CallId) -> VoipResult<()> { Ok(()) }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> VoipResult<()> {
//! let manager = CallManager::builder()
//!     .with_config(VoipConfig::new().with_endpoint("https://api.example.com/register-voip-token"))
//!     .with_telephony(Arc::new(Ui))
//!     .build()?;
//!
//! manager.on_token_rotated("device-token");
//! manager.on_identity_known(UserIdentity::new("user-1").with_auth_token("jwt"));
//!
//! let outcome = manager.on_incoming_push(br#"{"caller_name": "Alice"}"#).await;
//! manager.on_user_answered(outcome.call_id(), ActionAck::noop());
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::call::{CallId, CallSession, UserAction};
use crate::config::VoipConfig;
use crate::error::{VoipError, VoipResult};
use crate::events::{EventBridge, EventReceiver, EventSource, VoipEvent, VoipEventHandler};
use crate::ingress::{CallIngress, IncomingCallRequest, IngressOutcome};
use crate::registration::{
    DeviceMetadata, DeviceToken, HttpRegistrationBackend, RegistrationBackend, TokenRegistrar,
    TokenStatus, UserIdentity,
};
use crate::session::{ActionDebouncer, ActionOutcome, SessionStore, SessionStoreStats};
use crate::telephony::{ActionAck, TelephonyUi};

/// Builder for [`CallManager`]
///
/// A [`TelephonyUi`] is required. Without an explicit backend the manager
/// registers tokens over HTTP against `config.registration.endpoint`. Without
/// an explicit runtime the builder must be called from within a tokio runtime.
#[derive(Default)]
pub struct CallManagerBuilder {
    config: VoipConfig,
    telephony: Option<Arc<dyn TelephonyUi>>,
    backend: Option<Arc<dyn RegistrationBackend>>,
    handler: Option<Arc<dyn VoipEventHandler>>,
    runtime: Option<Handle>,
}

impl CallManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: VoipConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_telephony(mut self, telephony: Arc<dyn TelephonyUi>) -> Self {
        self.telephony = Some(telephony);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn RegistrationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn VoipEventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Runtime used for timers, sends and event dispatch
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> VoipResult<Arc<CallManager>> {
        self.config.validate()?;

        let telephony = self.telephony.ok_or_else(|| {
            VoipError::invalid_configuration("telephony", "a TelephonyUi implementation is required")
        })?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| VoipError::RuntimeUnavailable {
                reason: e.to_string(),
            })?,
        };
        let backend: Arc<dyn RegistrationBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpRegistrationBackend::from_config(&self.config.registration)?),
        };

        let shutdown = CancellationToken::new();
        let (events, dispatcher) = EventBridge::start(&runtime, self.handler, shutdown.clone());

        let store = Arc::new(SessionStore::new());
        let debouncer = ActionDebouncer::new(
            store.clone(),
            events.clone(),
            self.config.calls.answer_cooldown(),
            runtime.clone(),
            shutdown.clone(),
        );
        let ingress = CallIngress::new(store.clone(), telephony.clone(), &self.config.calls);
        let registrar = TokenRegistrar::new(
            backend,
            DeviceMetadata::from_config(&self.config.registration),
            self.config.registration.retry_delay(),
            events.clone(),
            runtime,
            shutdown.clone(),
        );

        tracing::info!(
            endpoint = %self.config.registration.endpoint,
            cooldown_ms = self.config.calls.answer_cooldown_ms,
            retry_delay_ms = self.config.registration.retry_delay_ms,
            "Call manager started"
        );

        Ok(Arc::new(CallManager {
            config: self.config,
            store,
            debouncer,
            ingress,
            registrar,
            events,
            telephony,
            shutdown,
            dispatcher: Mutex::new(Some(dispatcher)),
        }))
    }
}

/// Entry point of the call session layer
pub struct CallManager {
    config: VoipConfig,
    store: Arc<SessionStore>,
    debouncer: ActionDebouncer,
    ingress: CallIngress,
    registrar: TokenRegistrar,
    events: EventBridge,
    telephony: Arc<dyn TelephonyUi>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl CallManager {
    pub fn builder() -> CallManagerBuilder {
        CallManagerBuilder::new()
    }

    pub fn config(&self) -> &VoipConfig {
        &self.config
    }

    // ===== Push transport =====

    /// A call push arrived
    pub async fn on_incoming_push(&self, payload: &[u8]) -> IngressOutcome {
        self.ingress.on_incoming_push(payload).await
    }

    /// The push transport issued a device token
    pub fn on_token_rotated(&self, token: impl Into<String>) {
        self.registrar.on_token_rotated(token);
    }

    // ===== Telephony UI =====

    /// The user answered; `ack` is fulfilled whatever the outcome
    pub fn on_user_answered(&self, call_id: CallId, ack: ActionAck) -> ActionOutcome {
        self.user_action(call_id, UserAction::Answer, ack)
    }

    /// The user (or the UI on our request) ended a call; `ack` is fulfilled whatever the outcome
    pub fn on_user_ended(&self, call_id: CallId, ack: ActionAck) -> ActionOutcome {
        self.user_action(call_id, UserAction::End, ack)
    }

    fn user_action(&self, call_id: CallId, action: UserAction, ack: ActionAck) -> ActionOutcome {
        let outcome = self.debouncer.apply(call_id, action, EventSource::NativeUi);
        ack.fulfill();
        outcome
    }

    /// The telephony UI dropped every call
    ///
    /// Each live session ends with source [`EventSource::ProviderReset`].
    /// Calls that already ended through the UI are not ended again.
    pub fn on_provider_reset(&self) -> usize {
        let events = &self.events;
        let ended = self.store.drain_with(|session| {
            events.publish(VoipEvent::CallEnded {
                call_id: session.id,
                timestamp: Utc::now(),
                source: EventSource::ProviderReset,
            });
        });
        self.debouncer.clear();
        tracing::warn!(count = ended.len(), "Telephony provider reset, all calls ended");
        ended.len()
    }

    // ===== Application =====

    /// Report a call the application learned about by other means
    pub async fn report_incoming_call(&self, request: IncomingCallRequest) -> VoipResult<CallId> {
        match self.ingress.report_incoming_call(request).await {
            IngressOutcome::Presented(call_id) => Ok(call_id),
            IngressOutcome::Duplicate(call_id) => Err(VoipError::SessionExists { call_id }),
            IngressOutcome::PresentationFailed { call_id, reason } => {
                Err(VoipError::PresentationFailed { call_id, reason })
            }
        }
    }

    /// Ask the telephony UI to end a call
    ///
    /// The session itself ends when the UI reports back through
    /// [`CallManager::on_user_ended`].
    pub async fn end_call(&self, call_id: CallId) -> VoipResult<()> {
        if !self.store.contains(&call_id) {
            return Err(VoipError::SessionNotFound { call_id });
        }
        self.telephony
            .request_end_call(call_id)
            .await
            .map_err(|e| VoipError::EndCallFailed {
                call_id,
                reason: e.to_string(),
            })
    }

    /// Request the end of every tracked call, returning how many were accepted
    pub async fn end_all_calls(&self) -> usize {
        let requests = self.store.snapshot().into_iter().map(|session| async move {
            let result = self.end_call(session.id).await;
            if let Err(e) = &result {
                tracing::warn!(call_id = %session.id, error = %e, "Failed to end call");
            }
            result.is_ok()
        });
        join_all(requests).await.into_iter().filter(|accepted| *accepted).count()
    }

    pub fn on_identity_known(&self, identity: UserIdentity) {
        self.registrar.on_identity_known(identity);
    }

    pub fn on_identity_cleared(&self) {
        self.registrar.on_identity_cleared();
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn active_calls(&self) -> Vec<CallSession> {
        self.store.snapshot()
    }

    pub fn call(&self, call_id: &CallId) -> Option<CallSession> {
        self.store.get(call_id).ok()
    }

    pub fn token(&self) -> Option<DeviceToken> {
        self.registrar.token()
    }

    pub fn token_status(&self) -> Option<TokenStatus> {
        self.registrar.status()
    }

    pub fn stats(&self) -> SessionStoreStats {
        self.store.stats()
    }

    /// Cancel timers and stop event dispatch after delivering queued events
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.registrar.cancel_retry();

        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.await {
                tracing::warn!(error = %e, "Event dispatcher ended abnormally");
            }
        }
        tracing::info!("Call manager stopped");
    }
}

impl Drop for CallManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
