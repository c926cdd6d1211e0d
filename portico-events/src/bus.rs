use crate::event::BroadcastEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Default per-subscriber queue depth.
pub const DEFAULT_CAPACITY: usize = 64;

/// Process-local fan-out bus for registry/health events.
///
/// Publishing never blocks: each subscriber owns a bounded queue, and a
/// subscriber that falls behind loses the oldest events. Dropped events are
/// tallied in the `slow_subscriber_dropped` counter. Within one subscriber,
/// events always arrive in publish order. There is no replay — the SSE
/// endpoint compensates by sending a fresh snapshot at attach time.
pub struct EventBus {
    tx: broadcast::Sender<BroadcastEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to all current subscribers. Returns the number of
    /// subscribers that will observe it.
    pub fn publish(&self, event: BroadcastEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            // No subscribers; events are not durable.
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            dropped: Arc::clone(&self.dropped),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total events lost to slow subscribers since startup.
    pub fn slow_subscriber_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A single subscriber's view of the bus. Dropping the stream unsubscribes.
pub struct EventStream {
    rx: broadcast::Receiver<BroadcastEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventStream {
    /// Receive the next event. Skips over gaps created by queue overflow,
    /// counting the lost events. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BroadcastEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.dropped.fetch_add(missed, Ordering::Relaxed);
                    debug!(missed, "slow_subscriber_dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
