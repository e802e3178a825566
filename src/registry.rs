//! Subscription registry and delivery routing.

use crate::subject;
use crate::types::{Handler, SubscribeOptions, SubscriptionId};
use crossbeam_channel::{after, bounded, select, Sender};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Cancellation guard for an armed delivery timeout.
///
/// Cancelling is idempotent and also happens on drop, so removing a
/// subscription record (unsubscribe, max reached, registry clear) is enough
/// to disarm its timer.
struct TimeoutGuard {
    cancelled: Arc<AtomicBool>,
    cancel_tx: Sender<()>,
}

impl TimeoutGuard {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.cancel_tx.try_send(());
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Internal subscription state.
struct Subscription {
    id: SubscriptionId,
    pattern: String,
    queue_group: Option<String>,
    handler: Handler,
    /// Deliveries routed to this subscription so far.
    received_count: u64,
    /// Delivery count that satisfies the armed timeout, if any.
    expected_count: Option<u64>,
    /// Auto-remove after this many deliveries.
    max_deliveries: Option<u64>,
    pending_timeout: Option<TimeoutGuard>,
}

/// Registry of live subscriptions.
///
/// Records keep subscription order and delivery iterates in that order. The
/// lock is never held while user code (handlers, timeout callbacks) runs, so
/// handlers may publish, subscribe, and unsubscribe reentrantly.
pub struct SubscriptionRegistry {
    subscriptions: Mutex<Vec<Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for a subject pattern.
    ///
    /// Never fails: a malformed pattern is accepted (it simply never
    /// matches) and logged. An empty queue group name counts as no group.
    pub fn subscribe(
        &self,
        pattern: impl Into<String>,
        options: SubscribeOptions,
        handler: Handler,
    ) -> SubscriptionId {
        let pattern = pattern.into();
        if !subject::is_valid_pattern(&pattern) {
            warn!(pattern = %pattern, "subscribing with malformed pattern, it will never match");
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let queue_group = options.queue.filter(|group| !group.is_empty());
        debug!(id = %id, pattern = %pattern, queue = ?queue_group, "subscribe");

        self.subscriptions.lock().push(Subscription {
            id,
            pattern,
            queue_group,
            handler,
            received_count: 0,
            expected_count: None,
            max_deliveries: options.max,
            pending_timeout: None,
        });

        id
    }

    /// Remove a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.lock();
        let before = subs.len();
        subs.retain(|sub| sub.id != id);
        if subs.len() != before {
            debug!(id = %id, "unsubscribe");
        }
    }

    /// Drop every subscription, cancelling any pending timeouts.
    pub fn clear(&self) {
        let mut subs = self.subscriptions.lock();
        if !subs.is_empty() {
            debug!(count = subs.len(), "clearing subscription registry");
        }
        subs.clear();
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Deliveries received so far by a subscription, if it is still live.
    pub fn received_count(&self, id: SubscriptionId) -> Option<u64> {
        self.subscriptions
            .lock()
            .iter()
            .find(|sub| sub.id == id)
            .map(|sub| sub.received_count)
    }

    // --- Routing ---

    /// Select the subscriptions a publish on `subject` delivers to, in
    /// subscription order: every matching ungrouped record, plus the first
    /// matching member of each queue group.
    ///
    /// Returns a snapshot of (id, handler) pairs so handlers run without the
    /// registry lock.
    pub fn route(&self, subject: &str) -> Vec<(SubscriptionId, Handler)> {
        let subs = self.subscriptions.lock();
        let mut seen_groups: HashSet<&str> = HashSet::new();
        let mut selected = Vec::new();

        for sub in subs.iter() {
            if !subject::matches(&sub.pattern, subject) {
                continue;
            }
            if let Some(group) = sub.queue_group.as_deref() {
                if !seen_groups.insert(group) {
                    continue;
                }
            }
            selected.push((sub.id, Arc::clone(&sub.handler)));
        }

        selected
    }

    /// Per-delivery bookkeeping, run before each handler invocation: bump the
    /// received counter, disarm a satisfied timeout, and enforce the delivery
    /// cap. A record removed since routing is skipped (the routed handler
    /// still runs on the snapshot).
    pub fn record_delivery(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.lock();
        if let Some(pos) = subs.iter().position(|sub| sub.id == id) {
            let sub = &mut subs[pos];
            sub.received_count += 1;

            if let Some(expected) = sub.expected_count {
                if sub.received_count >= expected && sub.pending_timeout.is_some() {
                    debug!(id = %id, expected, "expected deliveries reached, cancelling timeout");
                    sub.pending_timeout = None;
                }
            }

            if let Some(max) = sub.max_deliveries {
                if sub.received_count >= max {
                    debug!(id = %id, max, "delivery cap reached, removing subscription");
                    subs.remove(pos);
                }
            }
        }
    }

    // --- Timeouts ---

    /// Arm a delivery timeout: unless `expected` deliveries arrive within
    /// `duration`, `on_timeout` fires once on a timer thread. Arming again
    /// replaces (and cancels) the previous timer. Unknown ids are ignored.
    pub fn arm_timeout<F>(&self, id: SubscriptionId, duration: Duration, expected: u64, on_timeout: F)
    where
        F: FnOnce(SubscriptionId) + Send + 'static,
    {
        let mut subs = self.subscriptions.lock();
        if let Some(sub) = subs.iter_mut().find(|sub| sub.id == id) {
            sub.expected_count = Some(expected);

            let cancelled = Arc::new(AtomicBool::new(false));
            let (cancel_tx, cancel_rx) = bounded::<()>(1);
            // Replacing the option drops (and thereby cancels) any old guard.
            sub.pending_timeout = Some(TimeoutGuard {
                cancelled: Arc::clone(&cancelled),
                cancel_tx,
            });
            debug!(id = %id, ?duration, expected, "arming delivery timeout");

            thread::spawn(move || {
                select! {
                    recv(cancel_rx) -> _ => {}
                    recv(after(duration)) -> _ => {
                        // The expectation may have been met between the
                        // deadline and this thread waking up.
                        if !cancelled.load(Ordering::SeqCst) {
                            on_timeout(id);
                        }
                    }
                }
            });
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
