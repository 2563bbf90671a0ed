//! Process-wide event bus.
//!
//! §5 calls for "many-producer/many-consumer, non-blocking publish,
//! at-most-once delivery; no backpressure" — exactly the contract
//! `tokio::sync::broadcast` provides, so this wraps it rather than
//! hand-rolling a pub/sub primitive. Grounded in §9's guidance to model
//! process-wide state as "explicitly-constructed objects passed into
//! components at wiring time" rather than a global singleton.

use tokio::sync::broadcast;

/// Which list a [`Event::BlockingCacheGroupChanged`] reload applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListType {
    Block,
    Allow,
}

/// All signals the pipeline fires. Subscribers should not assume delivery
/// order across variants, and a dropped event (lagging receiver) must not
/// affect resolver behavior — only observability.
#[derive(Debug, Clone)]
pub enum Event {
    CacheHit { fingerprint: String },
    CacheMiss { fingerprint: String },
    DomainPrefetched { fingerprint: String },
    PrefetchCacheHit { fingerprint: String },
    ResultCacheChanged { total_count: usize },
    DomainsToPrefetchCountChanged { total_count: usize },
    BlockingEnabledEvent { enabled: bool },
    BlockingCacheGroupChanged {
        list_type: ListType,
        group: String,
        entry_count: usize,
    },
}

/// Thin wrapper around a `broadcast` channel. Cloning an `EventBus` shares
/// the same underlying channel (cheap, `Arc`-backed internally by tokio).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        // Capacity bounds how far a slow subscriber may lag before it starts
        // missing events; that's the "no backpressure" contract in §5 — the
        // publisher never blocks or waits on a subscriber.
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    /// Fire-and-forget publish. A publish with zero subscribers, or one
    /// that a lagging subscriber misses, is not an error.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
