//! Main MockBroker struct tying all components together.

use crate::error::{BusError, Result};
use crate::registry::SubscriptionRegistry;
use crate::subject;
use crate::types::{
    BrokerEvent, Delivery, EventHandle, Handler, Message, Payload, SubscribeOptions,
    SubscriptionId,
};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Broker configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Encode published messages as JSON and deliver decoded values.
    pub json: bool,

    /// When `json` is off, deliver raw bytes instead of text.
    pub preserve_binary: bool,
}

/// Delay before a connect call flips the connected flag and notifies
/// listeners. Emulates the scheduling tick of a real client.
const CONNECT_NOTIFY_DELAY: Duration = Duration::from_millis(5);

/// Prefix for generated reply subjects.
const INBOX_PREFIX: &str = "_INBOX.";

/// Lifecycle events buffered per listener before it is dropped.
const EVENT_BUFFER: usize = 64;

/// An in-process message broker that emulates a subject-based bus client.
///
/// Provides a unified interface for:
/// - Connection lifecycle with asynchronous notifications
/// - Subscribing handlers to subject patterns (wildcards, queue groups)
/// - Synchronous publish with full fan-out before return
/// - Request/reply with generated correlation subjects
/// - Per-subscription delivery expectations and timeouts
///
/// Every published payload takes a real encode/decode round trip, so tests
/// exercise the same serialization boundary a live bus would impose.
pub struct MockBroker {
    /// Broker configuration.
    config: BrokerConfig,

    /// Live subscriptions and routing state.
    registry: Arc<SubscriptionRegistry>,

    /// Connected flag, flipped by the deferred connect tick.
    connected: Arc<AtomicBool>,

    /// Lifecycle event listeners.
    listeners: Arc<Mutex<Vec<Sender<BrokerEvent>>>>,

    /// Counter for generating reply subjects.
    next_inbox: AtomicU64,
}

impl MockBroker {
    /// Create a broker with the given configuration.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(SubscriptionRegistry::new()),
            connected: Arc::new(AtomicBool::new(false)),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_inbox: AtomicU64::new(1),
        }
    }

    /// The configuration this broker was built with.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    // --- Lifecycle ---

    /// Register a lifecycle event listener.
    ///
    /// The handle observes every `Connected` / `Disconnected` transition
    /// from registration onward. Dropping the handle unregisters it.
    pub fn events(&self) -> EventHandle {
        let (sender, receiver) = bounded(EVENT_BUFFER);
        self.listeners.lock().push(sender);
        EventHandle::new(receiver)
    }

    /// Begin the emulated connection. Always succeeds.
    ///
    /// The connected flag flips and listeners observe `Connected` only after
    /// a short deferred tick, never synchronously within this call. Poll
    /// `is_connected` or wait on an event handle.
    pub fn connect(&self) {
        debug!("connect requested");
        let connected = Arc::clone(&self.connected);
        let listeners = Arc::clone(&self.listeners);
        thread::spawn(move || {
            thread::sleep(CONNECT_NOTIFY_DELAY);
            connected.store(true, Ordering::SeqCst);
            Self::emit(&listeners, BrokerEvent::Connected);
        });
    }

    /// Tear the emulated connection down. Always succeeds.
    ///
    /// The registry wipe and the flag reset happen synchronously, which also
    /// cancels any pending delivery timeouts. Listeners observe
    /// `Disconnected` through their handles.
    pub fn close(&self) {
        debug!("close requested");
        self.registry.clear();
        self.connected.store(false, Ordering::SeqCst);
        Self::emit(&self.listeners, BrokerEvent::Disconnected);
    }

    /// Current connected flag.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send an event to every listener, pruning the dropped and the full.
    fn emit(listeners: &Mutex<Vec<Sender<BrokerEvent>>>, event: BrokerEvent) {
        listeners.lock().retain(|sender| sender.try_send(event).is_ok());
    }

    // --- Subscriptions ---

    /// Subscribe a handler to a subject pattern.
    ///
    /// The pattern may contain `*` (exactly one segment) and a trailing `>`
    /// (one or more segments). Returns the subscription id.
    pub fn subscribe<F>(&self, pattern: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(Delivery) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe_with(pattern, SubscribeOptions::default(), handler)
    }

    /// Subscribe with explicit options (queue group, delivery cap).
    pub fn subscribe_with<F>(
        &self,
        pattern: impl Into<String>,
        options: SubscribeOptions,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(Delivery) -> Result<()> + Send + Sync + 'static,
    {
        self.registry.subscribe(pattern, options, Arc::new(handler) as Handler)
    }

    /// Remove a subscription, cancelling its pending timeout. Unknown ids
    /// are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.registry.unsubscribe(id);
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.registry.subscription_count()
    }

    /// Deliveries received so far by a subscription, if it is still live.
    pub fn received_count(&self, id: SubscriptionId) -> Option<u64> {
        self.registry.received_count(id)
    }

    // --- Publishing ---

    /// Publish a message on a subject.
    ///
    /// Fully synchronous: encoding, decoding, matching, and every selected
    /// handler complete before this returns. A handler error stops the
    /// remaining deliveries and propagates to the caller.
    pub fn publish(&self, subject: &str, message: impl Into<Message>) -> Result<()> {
        self.dispatch(subject, message.into(), None)
    }

    /// Publish with a reply subject attached for request/reply flows.
    pub fn publish_with_reply(
        &self,
        subject: &str,
        message: impl Into<Message>,
        reply_to: &str,
    ) -> Result<()> {
        self.dispatch(subject, message.into(), Some(reply_to))
    }

    fn dispatch(&self, subject: &str, message: Message, reply_to: Option<&str>) -> Result<()> {
        if !subject::is_valid_subject(subject) {
            warn!(subject = %subject, "publishing on a malformed subject");
        }

        // The intentional round trip: what a real broker's serialization
        // boundary would do to the payload.
        let bytes = self.encode(message)?;
        let payload = self.decode(bytes)?;

        let selected = self.registry.route(subject);
        trace!(subject = %subject, count = selected.len(), "delivering");

        for (id, handler) in selected {
            self.registry.record_delivery(id);
            handler(Delivery {
                subject: subject.to_string(),
                reply_to: reply_to.map(str::to_string),
                payload: payload.clone(),
            })?;
        }

        Ok(())
    }

    fn encode(&self, message: Message) -> Result<Vec<u8>> {
        if self.config.json {
            let bytes = match message {
                Message::Text(text) => serde_json::to_vec(&text)?,
                Message::Binary(bytes) => serde_json::to_vec(&bytes)?,
                Message::Json(value) => serde_json::to_vec(&value)?,
            };
            return Ok(bytes);
        }

        Ok(match message {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            // Without JSON mode, structured values travel as their JSON text.
            Message::Json(value) => value.to_string().into_bytes(),
        })
    }

    fn decode(&self, bytes: Vec<u8>) -> Result<Payload> {
        if self.config.json {
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| BusError::Deserialization(e.to_string()))?;
            Ok(Payload::Json(value))
        } else if self.config.preserve_binary {
            Ok(Payload::Binary(bytes))
        } else {
            Ok(Payload::Text(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }

    // --- Request/reply ---

    /// Publish a request and wire up a one-shot reply subscription.
    ///
    /// A fresh `_INBOX.<n>` subject correlates the exchange: responders see
    /// it as `reply_to` on their delivery and answer by publishing to it.
    /// The reply subscription removes itself after the first reply. Returns
    /// the inbox subject.
    pub fn request<F>(&self, subject: &str, message: impl Into<Message>, on_reply: F) -> Result<String>
    where
        F: Fn(Delivery) -> Result<()> + Send + Sync + 'static,
    {
        let inbox = format!(
            "{}{}",
            INBOX_PREFIX,
            self.next_inbox.fetch_add(1, Ordering::SeqCst)
        );
        debug!(subject = %subject, inbox = %inbox, "request");

        // Install the reply subscription first so a responder may answer
        // from inside its own handler.
        self.subscribe_with(&inbox, SubscribeOptions::default().with_max(1), on_reply);
        self.publish_with_reply(subject, message, &inbox)?;

        Ok(inbox)
    }

    // --- Timeouts ---

    /// Arm a delivery timeout on a subscription.
    ///
    /// Unless `expected` deliveries arrive within `duration`, `on_timeout`
    /// fires once with the subscription id on a timer thread. Meeting the
    /// expectation cancels the timer, as do unsubscribe and close. Arming
    /// again replaces the previous timer. Unknown ids are ignored.
    pub fn timeout<F>(&self, id: SubscriptionId, duration: Duration, expected: u64, on_timeout: F)
    where
        F: FnOnce(SubscriptionId) + Send + 'static,
    {
        self.registry.arm_timeout(id, duration, expected, on_timeout);
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}
