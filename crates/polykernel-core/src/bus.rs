//! Multi-subscriber event bus with synchronous fan-out.
//!
//! Delivery is synchronous and in subscription order: `publish` returns only
//! after every subscriber callback has run. This matters for routing-slip
//! stamping, where a kernel's own stamp must land on an event before the
//! parent composite forwards it further up the tree.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use polykernel_protocols::envelope::KernelEventEnvelope;

type Callback = Arc<dyn Fn(KernelEventEnvelope) + Send + Sync>;

/// A cloneable handle to one event stream.
#[derive(Clone)]
pub struct KernelEventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl KernelEventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner::default()),
        }
    }

    /// Registers a callback; it stays registered until the returned guard is
    /// dropped, unsubscribed, or detached.
    pub fn subscribe(
        &self,
        callback: impl Fn(KernelEventEnvelope) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
            detached: false,
        }
    }

    /// Delivers the event to every current subscriber, in subscription order.
    ///
    /// Callbacks run outside the subscriber lock, so a callback may publish
    /// or subscribe re-entrantly; a subscriber added during delivery sees
    /// only later events.
    pub fn publish(&self, event: &KernelEventEnvelope) {
        let snapshot: Vec<Callback> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in snapshot {
            callback(event.clone());
        }
    }
}

impl Default for KernelEventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard for one subscription; dropping it unsubscribes.
pub struct Subscription {
    bus: Weak<BusInner>,
    id: u64,
    detached: bool,
}

impl Subscription {
    /// Removes the subscription now.
    pub fn unsubscribe(mut self) {
        self.remove();
        self.detached = true;
    }

    /// Keeps the subscription registered for the bus's lifetime.
    pub fn detach(mut self) {
        self.detached = true;
    }

    fn remove(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers
                .lock()
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.detached {
            self.remove();
        }
    }
}
