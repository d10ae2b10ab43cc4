//! Device token registration
//!
//! The push transport hands out a device token whenever it likes; the backend
//! needs it together with the signed-in user. [`TokenRegistrar`] keeps exactly
//! one token, buffers it until an identity is known and then registers it,
//! retrying failed attempts after a fixed delay until the backend confirms.
//!
//! # Token Lifecycle
//!
//! ```text
//!               rotation, no identity
//!   (none) ─────────────────────────────► Buffered
//!     │                                      │ identity known
//!     │ rotation, identity known             ▼
//!     └────────────────────────────────► Pending ◄──┐ failure, retry after delay
//!                                            │──────┘
//!                                            │ 2xx
//!                                            ▼
//!                                        Confirmed
//! ```
//!
//! A rotation or a newly known identity starts a new *generation*: the pending
//! retry is cancelled and results of attempts still in flight for an older
//! generation are discarded on arrival. At most one retry is outstanding.
//!
//! All network I/O happens outside the registrar's lock: state is copied out,
//! the lock released, the request sent, and the lock re-taken only to record
//! the result.

pub mod backend;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

pub use backend::{HttpRegistrationBackend, RegistrationBackend, RegistrationRequest};

use crate::config::RegistrationConfig;
use crate::error::VoipResult;
use crate::events::{EventBridge, VoipEvent};

/// Registration status of the device token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    /// Held locally, waiting for an identity
    Buffered,
    /// A registration attempt is in flight or a retry is scheduled
    Pending,
    /// The backend acknowledged this token
    Confirmed,
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenStatus::Buffered => write!(f, "Buffered"),
            TokenStatus::Pending => write!(f, "Pending"),
            TokenStatus::Confirmed => write!(f, "Confirmed"),
        }
    }
}

/// The device push token and where it stands with the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceToken {
    pub value: String,
    pub status: TokenStatus,
    pub updated_at: DateTime<Utc>,
}

/// The signed-in user a token is registered for
#[derive(Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    /// Bearer token for the registration endpoint
    pub auth_token: Option<String>,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, auth_token: impl Into<String>) -> Self {
        self.auth_token = Some(auth_token.into());
        self
    }
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserIdentity")
            .field("user_id", &self.user_id)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Device description sent with every registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub platform: String,
    pub bundle_id: String,
    pub environment: String,
    pub device_model: String,
    pub system_version: String,
}

impl DeviceMetadata {
    pub fn from_config(config: &RegistrationConfig) -> Self {
        Self {
            platform: config.platform.clone(),
            bundle_id: config.bundle_id.clone(),
            environment: config.environment.clone(),
            device_model: config.device_model.clone(),
            system_version: config.system_version.clone(),
        }
    }
}

struct RetryTimer {
    id: u64,
    cancel: CancellationToken,
}

struct SendJob {
    generation: u64,
    request: RegistrationRequest,
}

#[derive(Default)]
struct RegistrarState {
    token: Option<DeviceToken>,
    identity: Option<UserIdentity>,
    generation: u64,
    retry: Option<RetryTimer>,
    next_timer_id: u64,
    failed_attempts: u32,
    ever_confirmed: bool,
}

impl RegistrarState {
    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry.take() {
            timer.cancel.cancel();
        }
    }

    /// Start a new generation and return the job for its first attempt
    fn begin_send(&mut self, device: &DeviceMetadata) -> Option<SendJob> {
        self.cancel_retry();
        self.generation += 1;
        self.failed_attempts = 0;

        let identity = self.identity.as_ref()?;
        let token = self.token.as_mut()?;
        token.status = TokenStatus::Pending;
        token.updated_at = Utc::now();

        Some(SendJob {
            generation: self.generation,
            request: RegistrationRequest::new(token.value.clone(), identity, device),
        })
    }
}

struct RegistrarInner {
    state: Mutex<RegistrarState>,
    backend: Arc<dyn RegistrationBackend>,
    device: DeviceMetadata,
    retry_delay: Duration,
    events: EventBridge,
    runtime: Handle,
    shutdown: CancellationToken,
}

/// Owns the device token and its registration with the backend
///
/// Every entry point returns immediately; sends and retries run as tasks on
/// the runtime handed to [`TokenRegistrar::new`].
#[derive(Clone)]
pub struct TokenRegistrar {
    inner: Arc<RegistrarInner>,
}

impl TokenRegistrar {
    pub fn new(
        backend: Arc<dyn RegistrationBackend>,
        device: DeviceMetadata,
        retry_delay: Duration,
        events: EventBridge,
        runtime: Handle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(RegistrarInner {
                state: Mutex::new(RegistrarState::default()),
                backend,
                device,
                retry_delay,
                events,
                runtime,
                shutdown,
            }),
        }
    }

    /// The push transport issued a token
    ///
    /// Always replaces the stored token. Registers immediately when an
    /// identity is known, otherwise buffers.
    pub fn on_token_rotated(&self, token: impl Into<String>) {
        let value = token.into();
        let job = {
            let mut state = self.inner.state.lock();
            state.token = Some(DeviceToken {
                value: value.clone(),
                status: TokenStatus::Buffered,
                updated_at: Utc::now(),
            });
            let job = state.begin_send(&self.inner.device);
            self.inner.events.publish(VoipEvent::TokenReceived {
                token: value,
                timestamp: Utc::now(),
            });
            job
        };

        match job {
            Some(job) => self.inner.spawn_send(job),
            None => tracing::info!("Device token buffered until identity is known"),
        }
    }

    /// The application learned who the user is
    ///
    /// Sends the held token once. Does nothing else if no token has arrived yet.
    pub fn on_identity_known(&self, identity: UserIdentity) {
        tracing::debug!(user_id = %identity.user_id, "Identity known");
        let job = {
            let mut state = self.inner.state.lock();
            state.identity = Some(identity);
            if state.token.is_some() {
                state.begin_send(&self.inner.device)
            } else {
                None
            }
        };

        if let Some(job) = job {
            self.inner.spawn_send(job);
        }
    }

    /// The user signed out
    ///
    /// Forgets the identity, cancels any retry and returns the token to
    /// `Buffered` so it is sent again for the next identity.
    pub fn on_identity_cleared(&self) {
        let mut state = self.inner.state.lock();
        state.identity = None;
        state.cancel_retry();
        state.generation += 1;
        state.failed_attempts = 0;
        if let Some(token) = state.token.as_mut() {
            token.status = TokenStatus::Buffered;
            token.updated_at = Utc::now();
        }
        tracing::info!("Identity cleared, device token buffered");
    }

    /// The held device token, if one has arrived
    pub fn token(&self) -> Option<DeviceToken> {
        self.inner.state.lock().token.clone()
    }

    /// Registration status of the held token
    pub fn status(&self) -> Option<TokenStatus> {
        self.inner.state.lock().token.as_ref().map(|t| t.status)
    }

    /// The signed-in user, if known
    pub fn identity(&self) -> Option<UserIdentity> {
        self.inner.state.lock().identity.clone()
    }

    /// Failed attempts for the current generation
    pub fn failed_attempts(&self) -> u32 {
        self.inner.state.lock().failed_attempts
    }

    /// Whether a retry timer is armed
    pub fn has_pending_retry(&self) -> bool {
        self.inner.state.lock().retry.is_some()
    }

    /// Cancel the outstanding retry, if any
    ///
    /// Only for shutdown: the token stays `Pending` with nothing left to
    /// send it again.
    pub(crate) fn cancel_retry(&self) {
        self.inner.state.lock().cancel_retry();
    }
}

impl RegistrarInner {
    fn spawn_send(self: &Arc<Self>, job: SendJob) {
        tracing::debug!(generation = job.generation, "Scheduling token registration");
        self.runtime.spawn(Arc::clone(self).send(job));
    }

    async fn send(self: Arc<Self>, job: SendJob) {
        let result: VoipResult<()> = tokio::select! {
            result = self.backend.register(&job.request) => result,
            _ = self.shutdown.cancelled() => return,
        };
        self.complete(job, result);
    }

    fn complete(self: &Arc<Self>, job: SendJob, result: VoipResult<()>) {
        let mut state = self.state.lock();
        if state.generation != job.generation {
            tracing::debug!(
                generation = job.generation,
                current = state.generation,
                "Discarding result for superseded token"
            );
            return;
        }

        match result {
            Ok(()) => {
                state.cancel_retry();
                state.failed_attempts = 0;
                state.ever_confirmed = true;
                if let Some(token) = state.token.as_mut() {
                    token.status = TokenStatus::Confirmed;
                    token.updated_at = Utc::now();
                }
                tracing::info!(user_id = %job.request.user_id, "Device token registered");
                self.events.publish(VoipEvent::TokenConfirmed {
                    token: job.request.voip_token,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                state.failed_attempts += 1;
                let attempt = state.failed_attempts;
                if e.is_recoverable() {
                    tracing::warn!(attempt, error = %e, category = e.category(), "Token registration failed, will retry");
                } else {
                    tracing::error!(attempt, error = %e, category = e.category(), "Token registration failed, will retry");
                }

                if !state.ever_confirmed {
                    self.events.publish(VoipEvent::TokenRegistrationFailed {
                        token: job.request.voip_token,
                        attempt,
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
                self.schedule_retry(&mut state);
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, state: &mut RegistrarState) {
        state.cancel_retry();
        state.next_timer_id += 1;
        let timer_id = state.next_timer_id;
        let cancel = CancellationToken::new();
        state.retry = Some(RetryTimer {
            id: timer_id,
            cancel: cancel.clone(),
        });

        let inner = Arc::clone(self);
        let delay = self.retry_delay;
        self.runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return,
                _ = inner.shutdown.cancelled() => return,
            }
            inner.fire_retry(timer_id);
        });
    }

    fn fire_retry(self: &Arc<Self>, timer_id: u64) {
        let job = {
            let mut state = self.state.lock();
            if state.retry.as_ref().map(|t| t.id) != Some(timer_id) {
                return;
            }
            state.retry = None;

            let generation = state.generation;
            match (&state.identity, &state.token) {
                (Some(identity), Some(token)) if token.status == TokenStatus::Pending => SendJob {
                    generation,
                    request: RegistrationRequest::new(token.value.clone(), identity, &self.device),
                },
                _ => return,
            }
        };

        tracing::debug!(generation = job.generation, "Retrying token registration");
        self.spawn_send(job);
    }
}
