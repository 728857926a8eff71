// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::Event;

/// Bounded per-subscriber channel depth.  A subscriber that falls further
/// behind than this loses its oldest events (counted on its own receiver);
/// the publisher is never throttled.
pub const CHANNEL_CAPACITY: usize = 256;

/// Topic-keyed publish/subscribe fabric.
///
/// Delivery is fire-and-forget: publishing never blocks, never fails
/// observably, and a publish into a topic with zero subscribers is a no-op.
/// Within one topic, deliveries from a single publisher preserve publish
/// order; no ordering is defined across topics.
pub struct EventBus {
    topics: RwLock<HashMap<String, broadcast::Sender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a topic.  The topic is created on first subscription.
    pub fn subscribe(&self, topic: &str) -> EventReceiver {
        let mut topics = self.topics.write().unwrap();
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        EventReceiver {
            receiver: sender.subscribe(),
            lagged: 0,
        }
    }

    /// Publish an event to a topic.  Returns the number of live subscribers
    /// the event was delivered to (0 when the topic has none).
    pub fn publish(&self, topic: &str, event: Event) -> usize {
        let delivered = {
            let topics = self.topics.read().unwrap();
            match topics.get(topic) {
                Some(sender) => sender.send(event).unwrap_or(0),
                None => 0,
            }
        };
        trace!(topic, delivered, "published event");
        if delivered == 0 {
            // Last subscriber may have gone away; drop the dead topic entry
            // so the map does not grow without bound across sessions.
            self.prune(topic);
        }
        delivered
    }

    /// Remove a topic entry once it has no live receivers.
    fn prune(&self, topic: &str) {
        let mut topics = self.topics.write().unwrap();
        if let Some(sender) = topics.get(topic) {
            if sender.receiver_count() == 0 {
                topics.remove(topic);
            }
        }
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap()
            .get(topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of a topic subscription.
///
/// Dropping the receiver unsubscribes; [`unsubscribe`](Self::unsubscribe) is
/// the explicit form.  Overrun events are skipped and counted rather than
/// surfaced as errors, so `recv` only ever ends on topic closure.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Event>,
    lagged: u64,
}

impl EventReceiver {
    /// Receive the next event, or `None` when the topic is closed.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    self.lagged += count;
                    warn!(skipped = count, "event receiver lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when no event is ready or the topic is
    /// closed.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    self.lagged += count;
                    warn!(skipped = count, "event receiver lagged, events dropped");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }

    /// Events this receiver has missed due to falling behind.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    /// Explicitly end the subscription.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
