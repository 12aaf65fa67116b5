//! In-memory broker using DashMap.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use crate::core::error::Result;

use super::{Message, PubSub, PublishOptions};

const SUBSCRIBER_CAPACITY: usize = 64;
const OBSERVER_CAPACITY: usize = 1024;

/// In-process broker.
///
/// Topics match exactly (no wildcards). Retained messages are replayed to new
/// subscribers, and every publish is broadcast to observers.
///
/// # Example
///
/// ```rust
/// use dobiss_gateway::bus::MemoryBus;
///
/// let bus = MemoryBus::new();
/// let _messages = bus.observe();
/// ```
pub struct MemoryBus {
    /// topic -> last retained payload
    retained: DashMap<String, String>,

    /// topic -> live subscribers
    subscribers: DashMap<String, Vec<mpsc::Sender<String>>>,

    /// Every published message
    observers: broadcast::Sender<Message>,
}

impl MemoryBus {
    /// Create an empty broker.
    pub fn new() -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            retained: DashMap::new(),
            subscribers: DashMap::new(),
            observers,
        }
    }

    /// Watch every message published from now on.
    pub fn observe(&self) -> broadcast::Receiver<Message> {
        self.observers.subscribe()
    }

    /// Last retained payload on a topic.
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.retained.get(topic).map(|r| r.value().clone())
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for MemoryBus {
    async fn publish(&self, topic: &str, payload: String, options: PublishOptions) -> Result<()> {
        if options.retain {
            self.retained.insert(topic.to_string(), payload.clone());
        }

        if let Some(mut subs) = self.subscribers.get_mut(topic) {
            subs.retain(|sender| !sender.is_closed());
            for sender in subs.iter() {
                // Best-effort delivery, a full subscriber misses the message
                let _ = sender.try_send(payload.clone());
            }
        }

        let _ = self.observers.send(Message {
            topic: topic.to_string(),
            payload,
            options,
        });

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);

        if let Some(payload) = self.retained(topic) {
            let _ = tx.try_send(payload);
        }

        self.subscribers.entry(topic.to_string()).or_default().push(tx);
        Ok(rx)
    }
}
