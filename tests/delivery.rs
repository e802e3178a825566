//! Integration tests for subject routing and delivery.

use fauxbus::{BrokerConfig, BusError, MockBroker, SubscribeOptions};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn counter() -> (Arc<AtomicUsize>, impl Fn(fauxbus::Delivery) -> fauxbus::Result<()>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    (count, move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

// --- Wildcard Routing ---

#[test]
fn test_order_service_fanout() {
    let broker = MockBroker::default();

    let (exact, on_exact) = counter();
    let (single, on_single) = counter();
    let (tail, on_tail) = counter();
    broker.subscribe("orders.created", on_exact);
    broker.subscribe("orders.*", on_single);
    broker.subscribe("orders.>", on_tail);

    broker.publish("orders.created", "order 7").unwrap();

    assert_eq!(exact.load(Ordering::SeqCst), 1);
    assert_eq!(single.load(Ordering::SeqCst), 1);
    assert_eq!(tail.load(Ordering::SeqCst), 1);
}

#[test]
fn test_single_wildcard_needs_exact_depth() {
    let broker = MockBroker::default();

    let (count, handler) = counter();
    broker.subscribe("sensors.*.temperature", handler);

    broker.publish("sensors.kitchen.temperature", "21.5").unwrap();
    broker.publish("sensors.temperature", "20.0").unwrap();
    broker.publish("sensors.kitchen.window.temperature", "19.0").unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_tail_wildcard_spans_remaining_segments() {
    let broker = MockBroker::default();

    let (count, handler) = counter();
    broker.subscribe("logs.>", handler);

    broker.publish("logs.api", "a").unwrap();
    broker.publish("logs.api.auth.failed", "b").unwrap();
    broker.publish("logs", "c").unwrap();
    broker.publish("metrics.api", "d").unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_publish_without_subscribers_is_ok() {
    let broker = MockBroker::default();
    broker.publish("nobody.home", "hello").unwrap();
}

// --- Queue Groups ---

#[test]
fn test_queue_group_delivers_to_one_member() {
    let broker = MockBroker::default();

    let (first, on_first) = counter();
    let (second, on_second) = counter();
    let (third, on_third) = counter();
    broker.subscribe_with("jobs.encode", SubscribeOptions::queue("workers"), on_first);
    broker.subscribe_with("jobs.encode", SubscribeOptions::queue("workers"), on_second);
    broker.subscribe_with("jobs.encode", SubscribeOptions::queue("workers"), on_third);

    for _ in 0..5 {
        broker.publish("jobs.encode", "frame").unwrap();
    }

    // Selection is deterministic: the group member registered first.
    assert_eq!(first.load(Ordering::SeqCst), 5);
    assert_eq!(second.load(Ordering::SeqCst), 0);
    assert_eq!(third.load(Ordering::SeqCst), 0);
}

#[test]
fn test_groups_and_plain_subscribers_mix() {
    let broker = MockBroker::default();

    let (worker, on_worker) = counter();
    let (spare, on_spare) = counter();
    let (audit, on_audit) = counter();
    let (metrics, on_metrics) = counter();
    broker.subscribe_with("jobs.*", SubscribeOptions::queue("workers"), on_worker);
    broker.subscribe_with("jobs.*", SubscribeOptions::queue("workers"), on_spare);
    broker.subscribe("jobs.*", on_audit);
    broker.subscribe_with("jobs.*", SubscribeOptions::queue("metrics"), on_metrics);

    broker.publish("jobs.encode", "frame").unwrap();

    // One per group plus every ungrouped subscriber.
    assert_eq!(worker.load(Ordering::SeqCst), 1);
    assert_eq!(spare.load(Ordering::SeqCst), 0);
    assert_eq!(audit.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.load(Ordering::SeqCst), 1);
}

// --- Delivery Semantics ---

#[test]
fn test_delivery_follows_subscription_order() {
    let broker = MockBroker::default();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    for name in ["alpha", "beta", "gamma"] {
        let order = Arc::clone(&order);
        broker.subscribe("events", move |_| {
            order.lock().push(name);
            Ok(())
        });
    }

    broker.publish("events", "tick").unwrap();
    assert_eq!(*order.lock(), vec!["alpha", "beta", "gamma"]);
}

#[test]
fn test_handler_error_stops_remaining_deliveries() {
    let broker = MockBroker::default();

    broker.subscribe("payments", |_| Err(BusError::handler("ledger unavailable")));
    let (late, on_late) = counter();
    broker.subscribe("payments", on_late);

    let err = broker.publish("payments", "charge").unwrap_err();
    assert!(matches!(err, BusError::Handler(_)));
    assert_eq!(late.load(Ordering::SeqCst), 0);

    // A handler error does not remove the subscription.
    assert_eq!(broker.subscription_count(), 2);
}

#[test]
fn test_handler_may_publish_reentrantly() {
    let broker = Arc::new(MockBroker::default());

    let (done, on_done) = counter();
    broker.subscribe("pipeline.done", on_done);

    let inner = Arc::clone(&broker);
    broker.subscribe("pipeline.start", move |_| {
        inner.publish("pipeline.done", "finished")
    });

    broker.publish("pipeline.start", "go").unwrap();

    // The nested publish completed before the outer one returned.
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[test]
fn test_subscription_added_during_delivery_misses_current_message() {
    let broker = Arc::new(MockBroker::default());
    let (late, on_late) = counter();

    let inner = Arc::clone(&broker);
    let on_late = Arc::new(Mutex::new(Some(on_late)));
    broker.subscribe("news", move |_| {
        if let Some(handler) = on_late.lock().take() {
            inner.subscribe("news", handler);
        }
        Ok(())
    });

    broker.publish("news", "first").unwrap();
    assert_eq!(late.load(Ordering::SeqCst), 0);

    broker.publish("news", "second").unwrap();
    assert_eq!(late.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unsubscribed_peer_still_gets_current_round() {
    let broker = Arc::new(MockBroker::default());
    let (peer, on_peer) = counter();

    let inner = Arc::clone(&broker);
    let peer_id = Arc::new(Mutex::new(None));
    let stored = Arc::clone(&peer_id);
    broker.subscribe("feed", move |_| {
        if let Some(id) = *stored.lock() {
            inner.unsubscribe(id);
        }
        Ok(())
    });
    *peer_id.lock() = Some(broker.subscribe("feed", on_peer));

    broker.publish("feed", "item").unwrap();

    // Routing snapshotted both before the first handler removed the peer.
    assert_eq!(peer.load(Ordering::SeqCst), 1);
    assert_eq!(broker.subscription_count(), 1);

    broker.publish("feed", "item").unwrap();
    assert_eq!(peer.load(Ordering::SeqCst), 1);
}

// --- Bookkeeping ---

#[test]
fn test_received_count_tracks_deliveries() {
    let broker = MockBroker::default();
    let id = broker.subscribe("ticks", |_| Ok(()));

    assert_eq!(broker.received_count(id), Some(0));
    broker.publish("ticks", "1").unwrap();
    broker.publish("ticks", "2").unwrap();
    assert_eq!(broker.received_count(id), Some(2));

    broker.unsubscribe(id);
    assert_eq!(broker.received_count(id), None);
}

#[test]
fn test_delivery_cap_auto_unsubscribes() {
    let broker = MockBroker::default();

    let (count, handler) = counter();
    broker.subscribe_with("ticks", SubscribeOptions::default().with_max(2), handler);

    for _ in 0..4 {
        broker.publish("ticks", "tick").unwrap();
    }

    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(broker.subscription_count(), 0);
}

// --- Request/Reply ---

#[test]
fn test_request_reply_roundtrip() {
    let broker = Arc::new(MockBroker::new(BrokerConfig {
        json: true,
        ..Default::default()
    }));

    // Echo service: answers on the reply subject it was handed.
    let service = Arc::clone(&broker);
    let seen_reply_to = Arc::new(Mutex::new(None));
    let observed = Arc::clone(&seen_reply_to);
    broker.subscribe("svc.echo", move |delivery| {
        let reply_to = delivery.reply_to.clone().expect("request carries a reply subject");
        *observed.lock() = Some(reply_to.clone());
        let value = delivery.payload.as_json().cloned().unwrap();
        service.publish(&reply_to, json!({ "echo": value }))
    });

    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);
    let inbox = broker
        .request("svc.echo", json!("ping"), move |delivery| {
            assert!(delivery.reply_to.is_none());
            sink.lock().push(delivery.payload.as_json().cloned().unwrap());
            Ok(())
        })
        .unwrap();

    assert!(inbox.starts_with("_INBOX."));
    assert_eq!(*seen_reply_to.lock(), Some(inbox));
    assert_eq!(*replies.lock(), vec![json!({ "echo": "ping" })]);
}

#[test]
fn test_request_inbox_subscription_is_one_shot() {
    let broker = Arc::new(MockBroker::default());

    let responder = Arc::clone(&broker);
    broker.subscribe("svc.time", move |delivery| {
        responder.publish(delivery.reply_to.as_deref().unwrap(), "noon")
    });

    let (replies, on_reply) = counter();
    let inbox = broker.request("svc.time", "now?", on_reply).unwrap();

    // Only the service subscription remains once the reply lands.
    assert_eq!(replies.load(Ordering::SeqCst), 1);
    assert_eq!(broker.subscription_count(), 1);

    // Late publishes to the inbox go nowhere.
    broker.publish(&inbox, "midnight").unwrap();
    assert_eq!(replies.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unanswered_request_leaves_inbox_pending() {
    let broker = MockBroker::default();

    let (replies, on_reply) = counter();
    broker.request("svc.silent", "anyone?", on_reply).unwrap();

    // No responder: the inbox subscription stays armed.
    assert_eq!(replies.load(Ordering::SeqCst), 0);
    assert_eq!(broker.subscription_count(), 1);
}
