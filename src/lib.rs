//! # Mock Message Bus
//!
//! An in-process, deterministic stand-in for a subject-based publish/subscribe
//! bus client, built for automated tests.
//!
//! ## Core Concepts
//!
//! - **Subjects**: Dot-delimited names with `*` and trailing `>` wildcards
//! - **Subscriptions**: Handlers routed in registration order, with optional
//!   queue groups that deliver to one member each
//! - **Synchronous delivery**: A publish encodes, decodes, and runs every
//!   selected handler before returning
//! - **Expectations**: Per-subscription delivery counts with timeout callbacks
//!
//! ## Example
//!
//! ```ignore
//! use fauxbus::{BrokerConfig, MockBroker};
//!
//! let broker = MockBroker::new(BrokerConfig { json: true, ..Default::default() });
//! broker.connect();
//!
//! broker.subscribe("orders.*", |delivery| {
//!     println!("got {:?} on {}", delivery.payload, delivery.subject);
//!     Ok(())
//! });
//!
//! // Delivered to the subscription above before publish returns
//! broker.publish("orders.created", serde_json::json!({ "id": 7 }))?;
//!
//! // Request/reply with a generated inbox subject
//! broker.subscribe("time.now", |delivery| Ok(()));
//! broker.request("time.now", "ping", |reply| Ok(()))?;
//! ```

pub mod broker;
pub mod error;
pub mod registry;
pub mod subject;
pub mod types;

// Re-exports
pub use broker::{BrokerConfig, MockBroker};
pub use error::{BusError, Result};
pub use registry::SubscriptionRegistry;
pub use types::{
    BrokerEvent, Delivery, EventHandle, Handler, Message, Payload, SubscribeOptions,
    SubscriptionId,
};
