//! Fan-out of encoded server messages to every live session.
//!
//! One tokio broadcast channel per server. Each session subscribes when it
//! is admitted and gets an independent receiver buffering up to `capacity`
//! lines. A message is encoded once into an `Arc<str>` and shared by all
//! receivers, so every observer sees the same complete frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::protocol::ServerMessage;

/// Snapshot of fan-out health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    /// Lines skipped by receivers that fell more than `capacity` behind.
    pub messages_dropped: u64,
    pub receivers: usize,
}

/// Lock-free counters; the send path never takes a lock.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<str>>,
    capacity: usize,
    atomic_stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    /// `capacity` is how many lines a slow receiver may lag before it
    /// starts losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            atomic_stats: AtomicBroadcastStats::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.sender.subscribe()
    }

    /// Encode once and send to every subscriber. Returns how many
    /// receivers were live at send time.
    pub fn broadcast(&self, msg: &ServerMessage) -> usize {
        self.broadcast_raw(Arc::from(msg.encode()))
    }

    pub fn broadcast_raw(&self, encoded: Arc<str>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Record lines a receiver reported as skipped.
    pub fn record_lag(&self, skipped: u64) {
        self.atomic_stats.messages_dropped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            receivers: self.sender.receiver_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
