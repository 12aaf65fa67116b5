//! Gateway assembly: configuration, protocol selection, the Home Assistant
//! bridge, the sync engine and the restarting runtime.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod factory;
pub mod runtime;

pub use config::{DobissConfig, GatewayConfig, MqttConfig};
pub use engine::{EngineConfig, StateTracker, SyncEngine};
pub use factory::{create_protocol, select_protocol, ProtocolKind};
pub use runtime::{GatewayRuntime, RESTART_COOLDOWN};
