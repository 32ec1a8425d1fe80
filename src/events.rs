//! In-process event bus.
//!
//! Channel-based fan-out: each subscriber owns the receiving half of an
//! unbounded mpsc channel. Delivery is synchronous with respect to the
//! emitter; a subscriber that went away is pruned on the next emit and never
//! breaks the emitting path. Emitters call `emit` only after the matching
//! store write has committed.

use std::sync::{Arc, Mutex};
use std::sync::mpsc::{Receiver, Sender, channel};

use tracing::debug;

use crate::domain::Event;

/// Opaque handle returned by `subscribe`, used to detach.
pub type SubscriptionId = u64;

struct Subscriber {
    id: SubscriptionId,
    tx: Sender<Event>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

#[derive(Default)]
struct BusInner {
    next_id: SubscriptionId,
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. The receiver sees every event emitted after
    /// this call, in emit order.
    pub fn subscribe(&self) -> (SubscriptionId, Receiver<Event>) {
        let (tx, rx) = channel();
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.push(Subscriber { id, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.subscribers.retain(|s| s.id != id);
    }

    /// Fan an event out to all live subscribers. Dead receivers are dropped
    /// here rather than surfaced to the emitter.
    pub fn emit(&self, event: Event) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.subscribers.retain(|s| match s.tx.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                debug!("dropping event subscriber {} (receiver gone)", s.id);
                false
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("event bus lock poisoned")
            .subscribers
            .len()
    }
}
