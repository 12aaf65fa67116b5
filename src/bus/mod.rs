//! Publish/subscribe capability.
//!
//! The gateway only needs two operations from its message broker: publish a
//! payload on a topic, and stream the payloads arriving on a topic. Anything
//! implementing [`PubSub`] (an MQTT client adapter, the in-memory
//! [`MemoryBus`]) can carry the bridge.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::error::Result;

pub use memory::MemoryBus;

/// Delivery options for a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Quality of service level (0, 1 or 2).
    pub qos: u8,

    /// Whether the broker keeps the message for late subscribers.
    pub retain: bool,
}

impl PublishOptions {
    /// At-least-once, retained. Used for state and discovery messages.
    pub const fn retained() -> Self {
        Self { qos: 1, retain: true }
    }

    /// At-least-once, not retained.
    pub const fn at_least_once() -> Self {
        Self {
            qos: 1,
            retain: false,
        }
    }
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self::at_least_once()
    }
}

/// A published message, as seen by bus observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Topic.
    pub topic: String,

    /// Payload (JSON for everything the gateway publishes).
    pub payload: String,

    /// Delivery options.
    pub options: PublishOptions,
}

/// Message broker capability.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish `payload` on `topic`. Resolves once the broker accepted it.
    async fn publish(&self, topic: &str, payload: String, options: PublishOptions) -> Result<()>;

    /// Stream every payload published on `topic` from now on.
    ///
    /// The stream ends when the broker goes away.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>>;
}
