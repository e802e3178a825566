//! Core types for the mock broker.

use crate::error::BusError;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Unique identifier for a subscription.
///
/// Assigned at subscribe time, unique for the lifetime of the registry,
/// and the key for `unsubscribe` and `timeout` lookups.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message handed to `publish`, before the codec round trip.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Plain text.
    Text(String),

    /// Raw bytes.
    Binary(Vec<u8>),

    /// A structured value (round-trips losslessly in JSON mode).
    Json(serde_json::Value),
}

impl Message {
    /// Build a JSON message from any serializable value.
    ///
    /// A value the serializer rejects (e.g. a map with non-string keys)
    /// fails here rather than at delivery time, which is the point of the
    /// serialization boundary the broker simulates.
    pub fn json(value: &impl Serialize) -> Result<Self, BusError> {
        Ok(Message::Json(serde_json::to_value(value)?))
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(s.to_string())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(s)
    }
}

impl From<Vec<u8>> for Message {
    fn from(b: Vec<u8>) -> Self {
        Message::Binary(b)
    }
}

impl From<&[u8]> for Message {
    fn from(b: &[u8]) -> Self {
        Message::Binary(b.to_vec())
    }
}

impl From<serde_json::Value> for Message {
    fn from(v: serde_json::Value) -> Self {
        Message::Json(v)
    }
}

/// A payload as seen by subscription handlers, after the codec round trip.
///
/// Which variant arrives is decided by the broker configuration: `json`
/// mode always delivers `Json`, `preserve_binary` delivers `Binary`, and
/// the default delivers `Text`.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
    Json(serde_json::Value),
}

impl Payload {
    /// The payload as text, if it was delivered as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The payload as raw bytes, if it was delivered as bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// The payload as a structured value, if it was delivered as JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// The argument passed to a subscription handler on every delivery.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Concrete subject the message was published on (never a pattern).
    pub subject: String,

    /// Reply subject, when the publisher supplied one.
    pub reply_to: Option<String>,

    /// Decoded payload.
    pub payload: Payload,
}

/// Callback invoked on every delivery to a subscription.
///
/// Shared `Fn` rather than `FnMut` so the registry lock is never held while
/// user code runs and re-entrant publishing from inside a handler works;
/// handlers that accumulate state capture an `Arc<Mutex<_>>`. A returned
/// error propagates to the `publish` caller and aborts delivery to the
/// remaining selected subscriptions.
pub type Handler = Arc<dyn Fn(Delivery) -> Result<(), BusError> + Send + Sync>;

/// Options for `subscribe_with`.
#[derive(Clone, Debug, Default)]
pub struct SubscribeOptions {
    /// Queue group name. Subscriptions sharing a group receive one delivery
    /// per publish between them instead of one each. An empty string is
    /// treated as "no group".
    pub queue: Option<String>,

    /// Auto-unsubscribe once this many messages have been delivered.
    pub max: Option<u64>,
}

impl SubscribeOptions {
    /// Options joining the given queue group.
    pub fn queue(group: impl Into<String>) -> Self {
        Self {
            queue: Some(group.into()),
            ..Default::default()
        }
    }

    /// Remove the subscription after `max` deliveries.
    pub fn with_max(mut self, max: u64) -> Self {
        self.max = Some(max);
        self
    }
}

/// Lifecycle events emitted by the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrokerEvent {
    /// The deferred connect tick ran; the connected flag is now true.
    Connected,

    /// `close` ran; the registry was wiped and the flag is false.
    Disconnected,
}

/// Handle for observing broker lifecycle events.
///
/// Obtained from `MockBroker::events`. Events are buffered in a bounded
/// channel; a handle that is never drained eventually gets pruned rather
/// than blocking the broker.
pub struct EventHandle {
    receiver: crossbeam_channel::Receiver<BrokerEvent>,
}

impl EventHandle {
    pub(crate) fn new(receiver: crossbeam_channel::Receiver<BrokerEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<BrokerEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<BrokerEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<BrokerEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
