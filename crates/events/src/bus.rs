//! Run event bus on top of a tokio broadcast channel

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::{EventEnvelope, RunEvent};

const DEFAULT_CAPACITY: usize = 256;

/// Broadcasts the events of a single run to any number of observers.
///
/// Publishing never blocks and never fails: with no subscribers the event
/// is dropped, and slow subscribers lag rather than stall the run.
#[derive(Clone)]
pub struct EventBus {
    run_id: Uuid,
    sender: broadcast::Sender<EventEnvelope>,
    event_count: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            run_id: Uuid::new_v4(),
            sender,
            event_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Wrap `event` for this run and publish it.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn emit(&self, event: RunEvent) -> usize {
        self.publish(EventEnvelope::new(self.run_id, event))
    }

    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.event_count.fetch_add(1, Ordering::Relaxed);
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Events published before subscribing are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn event_count(&self) -> usize {
        self.event_count.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("run_id", &self.run_id)
            .field("subscriber_count", &self.subscriber_count())
            .field("event_count", &self.event_count())
            .finish()
    }
}
