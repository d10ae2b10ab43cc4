//! Shared test doubles for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use voip_push_core::{
    CallId, CallManager, EventKind, EventReceiver, IncomingCallInfo, RegistrationBackend,
    RegistrationRequest, TelephonyUi, VoipConfig, VoipError, VoipEvent, VoipResult,
};

/// Telephony UI that records what it was asked to do
#[derive(Default)]
pub struct MockTelephony {
    pub presented: Mutex<Vec<IncomingCallInfo>>,
    pub end_requests: Mutex<Vec<CallId>>,
    fail_presentations: Mutex<u32>,
    fail_end_requests: Mutex<bool>,
}

impl MockTelephony {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse the next `count` presentations
    pub fn fail_next_presentations(&self, count: u32) {
        *self.fail_presentations.lock() = count;
    }

    pub fn fail_end_requests(&self, fail: bool) {
        *self.fail_end_requests.lock() = fail;
    }

    pub fn presentation_count(&self) -> usize {
        self.presented.lock().len()
    }
}

#[async_trait]
impl TelephonyUi for MockTelephony {
    async fn present_incoming_call(&self, call: &IncomingCallInfo) -> VoipResult<()> {
        {
            let mut failures = self.fail_presentations.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(VoipError::PresentationFailed {
                    call_id: call.call_id,
                    reason: "provider unavailable".into(),
                });
            }
        }
        self.presented.lock().push(call.clone());
        Ok(())
    }

    async fn request_end_call(&self, call_id: CallId) -> VoipResult<()> {
        if *self.fail_end_requests.lock() {
            return Err(VoipError::EndCallFailed {
                call_id,
                reason: "transaction rejected".into(),
            });
        }
        self.end_requests.lock().push(call_id);
        Ok(())
    }
}

/// Registration backend that fails a scripted number of times
#[derive(Default)]
pub struct MockBackend {
    failures_left: Mutex<u32>,
    pub attempts: Mutex<Vec<(String, Instant)>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(times: u32) -> Arc<Self> {
        let backend = Self::default();
        *backend.failures_left.lock() = times;
        Arc::new(backend)
    }

    /// Fail the next `times` attempts
    pub fn fail_next(&self, times: u32) {
        *self.failures_left.lock() = times;
    }

    pub fn tokens(&self) -> Vec<String> {
        self.attempts.lock().iter().map(|(token, _)| token.clone()).collect()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Gaps between consecutive attempts
    pub fn intervals(&self) -> Vec<Duration> {
        let attempts = self.attempts.lock();
        attempts.windows(2).map(|pair| pair[1].1 - pair[0].1).collect()
    }
}

#[async_trait]
impl RegistrationBackend for MockBackend {
    async fn register(&self, request: &RegistrationRequest) -> VoipResult<()> {
        self.attempts.lock().push((request.voip_token.clone(), Instant::now()));
        let mut failures = self.failures_left.lock();
        if *failures > 0 {
            *failures -= 1;
            Err(VoipError::network("connection refused"))
        } else {
            Ok(())
        }
    }
}

/// Registration backend that keeps its first request open until released
///
/// Later requests succeed immediately.
pub struct GatedBackend {
    gate: Semaphore,
    fail_first: bool,
    attempts: Mutex<Vec<String>>,
}

impl GatedBackend {
    pub fn new(fail_first: bool) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            fail_first,
            attempts: Mutex::new(Vec::new()),
        })
    }

    /// Let the held first request complete
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn tokens(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

#[async_trait]
impl RegistrationBackend for GatedBackend {
    async fn register(&self, request: &RegistrationRequest) -> VoipResult<()> {
        let first = {
            let mut attempts = self.attempts.lock();
            attempts.push(request.voip_token.clone());
            attempts.len() == 1
        };
        if !first {
            return Ok(());
        }
        let _permit = self.gate.acquire().await;
        if self.fail_first {
            Err(VoipError::network("connection reset"))
        } else {
            Ok(())
        }
    }
}

pub fn test_config() -> VoipConfig {
    VoipConfig::new()
        .with_endpoint("http://127.0.0.1:9/register-voip-token")
        .with_answer_cooldown(Duration::from_secs(2))
        .with_retry_delay(Duration::from_secs(30))
}

pub fn manager<B: RegistrationBackend + 'static>(
    telephony: Arc<MockTelephony>,
    backend: Arc<B>,
) -> Arc<CallManager> {
    CallManager::builder()
        .with_config(test_config())
        .with_telephony(telephony)
        .with_backend(backend)
        .build()
        .expect("manager should build")
}

/// Let spawned tasks run, then collect every event delivered so far
pub async fn collect_events(rx: &mut EventReceiver) -> Vec<VoipEvent> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Every event until the dispatcher stops; call after `shutdown`
pub async fn collect_until_closed(rx: &mut EventReceiver) -> Vec<VoipEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn kinds(events: &[VoipEvent]) -> Vec<EventKind> {
    events.iter().map(VoipEvent::kind).collect()
}
