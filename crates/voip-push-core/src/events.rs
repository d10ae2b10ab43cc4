//! Event bridge between the call session layer and the application
//!
//! Lifecycle notifications (token received/confirmed, call answered/ended) are
//! produced from whatever thread delivered the underlying callback. Publishing
//! never blocks: events go into an unbounded queue that a single dispatcher
//! task drains, forwarding each event to the registered
//! [`VoipEventHandler`] and to every subscriber.
//!
//! Since one queue feeds one dispatcher, events are delivered in the order
//! they were published, which in particular keeps every call's events in
//! order. Each subscriber owns an unbounded channel, so a slow reader never
//! loses events. Delivery is at-least-once from the application's point of
//! view: consumers should deduplicate on [`VoipEvent::dedup_key`].
//!
//! # Examples
//!
//! ```rust
//! use voip_push_core::events::{EventBridge, EventSource, VoipEvent};
//! use tokio_util::sync::CancellationToken;
//! use chrono::Utc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (bridge, _dispatcher) = EventBridge::start(
//!     &tokio::runtime::Handle::current(),
//!     None,
//!     CancellationToken::new(),
//! );
//! let mut rx = bridge.subscribe();
//!
//! bridge.publish(VoipEvent::CallEnded {
//!     call_id: uuid::Uuid::new_v4(),
//!     timestamp: Utc::now(),
//!     source: EventSource::NativeUi,
//! });
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.kind(), voip_push_core::events::EventKind::CallEnded);
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::call::CallId;

/// Where a call lifecycle event originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// The platform telephony UI (user tapped answer / end)
    NativeUi,
    /// The telephony UI reset and dropped every call
    ProviderReset,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::NativeUi => write!(f, "native_ui"),
            EventSource::ProviderReset => write!(f, "provider_reset"),
        }
    }
}

/// Discriminant of [`VoipEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TokenReceived,
    TokenConfirmed,
    TokenRegistrationFailed,
    CallAnswered,
    CallEnded,
}

/// Notification delivered to the application layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoipEvent {
    /// The push transport issued a (new) device token
    TokenReceived {
        token: String,
        timestamp: DateTime<Utc>,
    },
    /// The backend acknowledged the device token
    TokenConfirmed {
        token: String,
        timestamp: DateTime<Utc>,
    },
    /// A registration attempt failed before the token was ever confirmed
    TokenRegistrationFailed {
        token: String,
        attempt: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// The user answered a call
    CallAnswered {
        call_id: CallId,
        timestamp: DateTime<Utc>,
        source: EventSource,
    },
    /// A call ended
    CallEnded {
        call_id: CallId,
        timestamp: DateTime<Utc>,
        source: EventSource,
    },
}

/// Identity of an event for duplicate suppression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub kind: EventKind,
    pub call_id: Option<CallId>,
    pub timestamp: DateTime<Utc>,
}

impl VoipEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            VoipEvent::TokenReceived { .. } => EventKind::TokenReceived,
            VoipEvent::TokenConfirmed { .. } => EventKind::TokenConfirmed,
            VoipEvent::TokenRegistrationFailed { .. } => EventKind::TokenRegistrationFailed,
            VoipEvent::CallAnswered { .. } => EventKind::CallAnswered,
            VoipEvent::CallEnded { .. } => EventKind::CallEnded,
        }
    }

    /// Call the event is about, if any
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            VoipEvent::CallAnswered { call_id, .. } | VoipEvent::CallEnded { call_id, .. } => {
                Some(*call_id)
            }
            _ => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            VoipEvent::TokenReceived { timestamp, .. }
            | VoipEvent::TokenConfirmed { timestamp, .. }
            | VoipEvent::TokenRegistrationFailed { timestamp, .. }
            | VoipEvent::CallAnswered { timestamp, .. }
            | VoipEvent::CallEnded { timestamp, .. } => *timestamp,
        }
    }

    /// Key under which a redelivered copy of this event compares equal
    pub fn dedup_key(&self) -> EventKey {
        EventKey {
            kind: self.kind(),
            call_id: self.call_id(),
            timestamp: self.timestamp(),
        }
    }
}

/// Application-side receiver of lifecycle notifications
///
/// Every method has an empty default so implementors only override what they
/// care about. Methods are awaited one at a time by the dispatcher; a slow
/// handler delays later events but never the callbacks that produced them.
#[async_trait]
pub trait VoipEventHandler: Send + Sync {
    async fn on_token_received(&self, _token: &str) {}

    async fn on_token_confirmed(&self, _token: &str) {}

    async fn on_token_registration_failed(&self, _token: &str, _attempt: u32, _reason: &str) {}

    async fn on_call_answered(&self, _call_id: CallId, _timestamp: DateTime<Utc>, _source: EventSource) {}

    async fn on_call_ended(&self, _call_id: CallId, _timestamp: DateTime<Utc>, _source: EventSource) {}
}

async fn dispatch(handler: &dyn VoipEventHandler, event: &VoipEvent) {
    match event {
        VoipEvent::TokenReceived { token, .. } => handler.on_token_received(token).await,
        VoipEvent::TokenConfirmed { token, .. } => handler.on_token_confirmed(token).await,
        VoipEvent::TokenRegistrationFailed { token, attempt, reason, .. } => {
            handler.on_token_registration_failed(token, *attempt, reason).await
        }
        VoipEvent::CallAnswered { call_id, timestamp, source } => {
            handler.on_call_answered(*call_id, *timestamp, *source).await
        }
        VoipEvent::CallEnded { call_id, timestamp, source } => {
            handler.on_call_ended(*call_id, *timestamp, *source).await
        }
    }
}

/// Receiving end handed out by [`EventBridge::subscribe`]
pub type EventReceiver = mpsc::UnboundedReceiver<VoipEvent>;

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<VoipEvent>>>>;

/// Non-blocking publisher side of the event pipeline
#[derive(Clone)]
pub struct EventBridge {
    queue_tx: mpsc::UnboundedSender<VoipEvent>,
    subscribers: Subscribers,
}

impl fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBridge")
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

impl EventBridge {
    /// Create the bridge and spawn its dispatcher on `runtime`
    ///
    /// The dispatcher stops once `shutdown` is cancelled, after delivering
    /// whatever was already queued.
    pub fn start(
        runtime: &Handle,
        handler: Option<Arc<dyn VoipEventHandler>>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<VoipEvent>();
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));

        let fanout = Arc::clone(&subscribers);
        let dispatcher = runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    event = queue_rx.recv() => match event {
                        Some(event) => deliver(&fanout, handler.as_deref(), event).await,
                        None => break,
                    },
                    _ = shutdown.cancelled() => break,
                }
            }

            queue_rx.close();
            while let Ok(event) = queue_rx.try_recv() {
                deliver(&fanout, handler.as_deref(), event).await;
            }
            // Receivers see the end of the stream once the dispatcher is done
            fanout.lock().clear();
            tracing::debug!("Event dispatcher stopped");
        });

        (Self { queue_tx, subscribers }, dispatcher)
    }

    /// Queue an event for delivery
    ///
    /// Returns immediately. Events published after shutdown are dropped.
    pub fn publish(&self, event: VoipEvent) {
        tracing::trace!(kind = ?event.kind(), call_id = ?event.call_id(), "Publishing event");
        if self.queue_tx.send(event).is_err() {
            tracing::debug!("Event dispatcher gone, dropping event");
        }
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        // After shutdown the receiver just reports the end of the stream
        if !self.queue_tx.is_closed() {
            self.subscribers.lock().push(tx);
        }
        rx
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

async fn deliver(fanout: &Subscribers, handler: Option<&dyn VoipEventHandler>, event: VoipEvent) {
    if let Some(handler) = handler {
        dispatch(handler, &event).await;
    }
    // Dropped receivers are pruned here
    fanout.lock().retain(|tx| tx.send(event.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VoipEventHandler for RecordingHandler {
        async fn on_token_confirmed(&self, token: &str) {
            self.seen.lock().push(format!("confirmed:{}", token));
        }

        async fn on_call_answered(&self, call_id: CallId, _ts: DateTime<Utc>, _source: EventSource) {
            self.seen.lock().push(format!("answered:{}", call_id));
        }

        async fn on_call_ended(&self, call_id: CallId, _ts: DateTime<Utc>, source: EventSource) {
            self.seen.lock().push(format!("ended:{}:{}", call_id, source));
        }
    }

    #[tokio::test]
    async fn test_events_delivered_in_publish_order() {
        let handler = Arc::new(RecordingHandler::default());
        let (bridge, _task) = EventBridge::start(
            &Handle::current(),
            Some(handler.clone()),
            CancellationToken::new(),
        );
        let mut rx = bridge.subscribe();

        let call_id = Uuid::new_v4();
        let now = Utc::now();
        bridge.publish(VoipEvent::CallAnswered { call_id, timestamp: now, source: EventSource::NativeUi });
        bridge.publish(VoipEvent::CallEnded { call_id, timestamp: now, source: EventSource::NativeUi });
        bridge.publish(VoipEvent::TokenConfirmed { token: "abc".into(), timestamp: now });

        let kinds: Vec<EventKind> = vec![
            rx.recv().await.unwrap().kind(),
            rx.recv().await.unwrap().kind(),
            rx.recv().await.unwrap().kind(),
        ];
        assert_eq!(kinds, vec![EventKind::CallAnswered, EventKind::CallEnded, EventKind::TokenConfirmed]);

        assert_eq!(
            *handler.seen.lock(),
            vec![
                format!("answered:{}", call_id),
                format!("ended:{}:native_ui", call_id),
                "confirmed:abc".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let handler = Arc::new(RecordingHandler::default());
        let shutdown = CancellationToken::new();
        let (bridge, task) = EventBridge::start(&Handle::current(), Some(handler.clone()), shutdown.clone());

        bridge.publish(VoipEvent::TokenConfirmed { token: "t1".into(), timestamp: Utc::now() });
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

        assert_eq!(*handler.seen.lock(), vec!["confirmed:t1".to_string()]);

        // Dispatcher is gone; publishing must not panic or block
        bridge.publish(VoipEvent::TokenConfirmed { token: "t2".into(), timestamp: Utc::now() });
    }

    #[tokio::test]
    async fn test_slow_subscriber_misses_nothing() {
        let shutdown = CancellationToken::new();
        let (bridge, task) = EventBridge::start(&Handle::current(), None, shutdown.clone());
        let mut slow = bridge.subscribe();

        for n in 0..1000 {
            bridge.publish(VoipEvent::TokenReceived { token: format!("tok-{}", n), timestamp: Utc::now() });
        }
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

        // Nothing was read while publishing; every event is still there, in order
        let mut tokens = Vec::new();
        while let Some(event) = slow.recv().await {
            if let VoipEvent::TokenReceived { token, .. } = event {
                tokens.push(token);
            }
        }
        assert_eq!(tokens.len(), 1000);
        assert_eq!(tokens[0], "tok-0");
        assert_eq!(tokens[999], "tok-999");
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let (bridge, _task) = EventBridge::start(&Handle::current(), None, CancellationToken::new());
        let mut kept = bridge.subscribe();
        drop(bridge.subscribe());
        assert_eq!(bridge.subscriber_count(), 2);

        bridge.publish(VoipEvent::TokenConfirmed { token: "t".into(), timestamp: Utc::now() });
        assert_eq!(kept.recv().await.unwrap().kind(), EventKind::TokenConfirmed);
        assert_eq!(bridge.subscriber_count(), 1);
    }

    #[test]
    fn test_dedup_key_identifies_redelivery() {
        let call_id = Uuid::new_v4();
        let ts = Utc::now();
        let a = VoipEvent::CallEnded { call_id, timestamp: ts, source: EventSource::NativeUi };
        let b = a.clone();
        let c = VoipEvent::CallAnswered { call_id, timestamp: ts, source: EventSource::NativeUi };

        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), c.dedup_key());
        assert_eq!(a.dedup_key().call_id, Some(call_id));
    }

    #[test]
    fn test_event_serialization_shape() {
        let call_id = Uuid::nil();
        let event = VoipEvent::CallAnswered {
            call_id,
            timestamp: Utc::now(),
            source: EventSource::NativeUi,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "call_answered");
        assert_eq!(json["source"], "native_ui");
        assert_eq!(json["call_id"], call_id.to_string());
    }
}
