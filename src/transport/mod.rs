//! Controller link.

pub mod queue;

pub use queue::{TransportConfig, TransportQueue, UnsolicitedEvent, DEFAULT_PORT, DEFAULT_TIMEOUT};
