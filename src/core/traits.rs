//! Core traits for the Dobiss gateway.
//!
//! # Trait Hierarchy
//!
//! ```text
//! Layer 1: Capabilities (stateless queries)
//! └── ProtocolCapabilities  // dialect name, brightness scale
//!
//! Layer 2: Operations
//! ├── FrameTransport        // request(frame) -> reply frame
//! └── DobissProtocol        // on, off, toggle, poll_module, modules
//! ```
//!
//! Dialects depend on `FrameTransport`, never on a socket, so they can be
//! driven by a scripted transport in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::{GatewayError, Result};
use crate::core::state::{ModuleView, OutputState};
use crate::core::topology::ModuleType;

/// Connection state of the controller link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket open.
    #[default]
    Disconnected,

    /// Connect in progress.
    Connecting,

    /// Socket open and usable.
    Connected,

    /// Last socket operation failed.
    Error,
}

impl ConnectionState {
    /// Check if currently connected.
    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the next request will (re)connect.
    #[inline]
    pub const fn needs_connect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Error => 3,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Error,
            _ => Self::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Error => "Error",
        };
        write!(f, "{}", s)
    }
}

/// Transport diagnostics snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Controller endpoint.
    pub endpoint: String,

    /// Connection state.
    pub connection_state: ConnectionState,

    /// Frames written.
    pub request_count: u64,

    /// Replies received.
    pub reply_count: u64,

    /// Requests that hit the deadline.
    pub timeout_count: u64,

    /// Socket errors.
    pub error_count: u64,

    /// Inbound frames nobody asked for.
    pub unsolicited_count: u64,

    /// Last error message.
    pub last_error: Option<String>,
}

/// Byte-level request/response exchange with the controller.
///
/// The link carries no correlation id: the reply to a request is simply the
/// next inbound frame after it was written.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Send `frame` and wait for exactly one reply frame.
    async fn request(&self, frame: Vec<u8>) -> Result<Vec<u8>>;
}

/// Dialect description.
pub trait ProtocolCapabilities {
    /// Dialect name.
    fn name(&self) -> &'static str;

    /// Raw-to-display brightness divisor for a module type.
    fn brightness_scale(&self, module_type: ModuleType) -> u8;

    /// Whether the dialect has a native toggle action.
    fn supports_toggle(&self) -> bool {
        false
    }
}

/// Capability every dialect (and the simulator) implements.
///
/// Addresses are bus addresses: 1-based for modules, 0-based for outputs.
/// `level` passed to [`on`](Self::on) is a percentage (0..=100).
#[async_trait]
pub trait DobissProtocol: ProtocolCapabilities + Send + Sync {
    /// All modules, decorated for this dialect.
    fn modules(&self) -> &[ModuleView];

    /// Find a module by address.
    fn module(&self, address: u8) -> Option<&ModuleView> {
        self.modules().iter().find(|m| m.address() == address)
    }

    /// Turn an output on, optionally at a brightness percentage.
    async fn on(&self, module: u8, output: u8, level: Option<u8>) -> Result<()>;

    /// Turn an output off.
    async fn off(&self, module: u8, output: u8) -> Result<()>;

    /// Flip an output.
    async fn toggle(&self, module: u8, output: u8) -> Result<()> {
        let _ = (module, output);
        Err(GatewayError::Unsupported(format!(
            "{} has no toggle action",
            self.name()
        )))
    }

    /// Ask the controller for the state of every output on a module.
    async fn poll_module(&self, module: u8) -> Result<Vec<OutputState>>;
}

/// Decorate modules with a dialect's brightness scale.
pub fn module_views<P: ProtocolCapabilities + ?Sized>(
    protocol: &P,
    modules: Vec<crate::core::topology::Module>,
) -> Vec<ModuleView> {
    modules
        .into_iter()
        .map(|module| {
            let scale = protocol.brightness_scale(module.module_type);
            ModuleView::new(module, scale)
        })
        .collect()
}

/// Resolve a module and output, or report which one is missing.
pub(crate) fn resolve<'a>(
    modules: &'a [ModuleView],
    module: u8,
    output: u8,
) -> Result<(&'a ModuleView, &'a crate::core::topology::Output)> {
    let view = modules
        .iter()
        .find(|m| m.address() == module)
        .ok_or_else(|| GatewayError::not_found(format!("module {}", module)))?;
    let out = view
        .output(output)
        .ok_or_else(|| GatewayError::not_found(format!("output {} on module {}", output, module)))?;
    Ok((view, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::topology::Module;

    struct Scaled;

    impl ProtocolCapabilities for Scaled {
        fn name(&self) -> &'static str {
            "scaled"
        }

        fn brightness_scale(&self, module_type: ModuleType) -> u8 {
            if module_type == ModuleType::Dimmer {
                10
            } else {
                1
            }
        }
    }

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Disconnected.needs_connect());
        assert!(ConnectionState::Error.needs_connect());
        assert!(!ConnectionState::Connecting.needs_connect());
    }

    #[test]
    fn test_connection_state_u8_roundtrip() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Error,
        ] {
            assert_eq!(ConnectionState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_module_views_and_resolve() {
        let views = module_views(
            &Scaled,
            vec![
                Module::new(1, ModuleType::Relay, ["a"]),
                Module::new(2, ModuleType::Dimmer, ["b", "c"]),
            ],
        );
        assert_eq!(views[0].brightness_scale, 1);
        assert_eq!(views[1].brightness_scale, 10);

        let (view, output) = resolve(&views, 2, 1).unwrap();
        assert_eq!(view.address(), 2);
        assert_eq!(output.name, "c");

        assert!(matches!(resolve(&views, 3, 0), Err(GatewayError::NotFound(_))));
        assert!(matches!(resolve(&views, 1, 5), Err(GatewayError::NotFound(_))));
    }
}
