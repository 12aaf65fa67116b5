//! # Dobiss Gateway
//!
//! Bridges a Dobiss CAN programmer (AmbiancePRO / Evolution PRO or SX
//! Ambiance / SX Evolution) to a publish/subscribe message bus, exposing
//! every output as a Home Assistant MQTT light.
//!
//! ## Layers
//!
//! ```text
//! bus (PubSub) <-> gateway::engine <-> protocols (dialect) <-> transport (TCP queue) <-> controller
//!                       ^                    |
//!                  gateway::bridge        codec (frames)
//! ```
//!
//! - [`codec`]: pure frame builders and reply decoders, one module per dialect.
//! - [`transport`]: a single-flight TCP request queue; the wire has no
//!   correlation id, so the next inbound frame is the reply.
//! - [`protocols`]: dialect clients implementing [`DobissProtocol`], plus an
//!   in-memory simulator.
//! - [`gateway`]: configuration, protocol selection, the poll/diff/publish
//!   engine and the restarting runtime.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dobiss_gateway::prelude::*;
//!
//! # async fn demo() -> dobiss_gateway::Result<()> {
//! let config = GatewayConfig::load("dobiss.toml")?;
//! let bus = Arc::new(MemoryBus::new());
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! GatewayRuntime::new(config, bus).run(shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod codec;
pub mod core;
pub mod gateway;
pub mod protocols;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bus::{MemoryBus, PubSub, PublishOptions};
    pub use crate::core::{
        error::{GatewayError, Result},
        state::*,
        topology::*,
        traits::*,
    };
    pub use crate::gateway::{GatewayConfig, GatewayRuntime, ProtocolKind, SyncEngine};
    pub use crate::transport::{TransportConfig, TransportQueue};
}

// Re-export core types at crate root for convenience
pub use crate::core::error::{GatewayError, Result};
pub use crate::core::state::{ModuleView, OutputState};
pub use crate::core::topology::{Module, ModuleConfig, ModuleType, Output};
pub use crate::core::traits::{
    ConnectionState, DobissProtocol, FrameTransport, ProtocolCapabilities,
};

pub use crate::bus::{MemoryBus, PubSub};
pub use crate::gateway::{GatewayConfig, GatewayRuntime};
pub use crate::transport::TransportQueue;
