//! Protocol factory.
//!
//! Selects a dialect from the configured interface identifier and binds it to
//! a transport.

use std::sync::Arc;

use crate::core::error::{GatewayError, Result};
use crate::core::topology::Module;
use crate::core::traits::{DobissProtocol, FrameTransport};
use crate::protocols::{AmbianceProClient, FakeProtocol, SxClient};

/// Closed set of supported dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    /// AmbiancePRO and Evolution PRO.
    AmbiancePro,
    /// SX Ambiance and SX Evolution.
    Sx,
    /// In-memory simulator.
    Fake,
}

impl ProtocolKind {
    /// Resolve an interface identifier (case-insensitive).
    pub fn from_interface(interface: &str) -> Result<Self> {
        let interface = interface.trim();

        if interface.eq_ignore_ascii_case("AMBIANCEPRO") || interface.eq_ignore_ascii_case("EVOLUTIONPRO") {
            return Ok(Self::AmbiancePro);
        }

        if interface.eq_ignore_ascii_case("SXAMBIANCE") || interface.eq_ignore_ascii_case("SXEVOLUTION") {
            return Ok(Self::Sx);
        }

        if interface.eq_ignore_ascii_case("FAKE") {
            return Ok(Self::Fake);
        }

        if interface.eq_ignore_ascii_case("NXT") {
            return Err(GatewayError::Config(
                "Interface NXT is not supported yet".to_string(),
            ));
        }

        Err(GatewayError::Config(format!(
            "Unsupported interface: {}. Use AMBIANCEPRO, EVOLUTIONPRO, SXAMBIANCE, SXEVOLUTION or FAKE.",
            interface
        )))
    }

    /// Whether this dialect talks to a real controller.
    pub const fn needs_controller(&self) -> bool {
        !matches!(self, Self::Fake)
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AmbiancePro => "AmbiancePRO",
            Self::Sx => "SX",
            Self::Fake => "Fake",
        };
        write!(f, "{}", s)
    }
}

/// Create a protocol of the given kind.
///
/// `transport` is required for every kind except [`ProtocolKind::Fake`].
pub fn create_protocol(
    kind: ProtocolKind,
    modules: Vec<Module>,
    transport: Option<Arc<dyn FrameTransport>>,
) -> Result<Arc<dyn DobissProtocol>> {
    match (kind, transport) {
        (ProtocolKind::Fake, _) => Ok(Arc::new(FakeProtocol::new(modules))),
        (ProtocolKind::AmbiancePro, Some(transport)) => {
            Ok(Arc::new(AmbianceProClient::new(transport, modules)))
        }
        (ProtocolKind::Sx, Some(transport)) => Ok(Arc::new(SxClient::new(transport, modules))),
        (kind, None) => Err(GatewayError::Config(format!(
            "{} needs a controller transport",
            kind
        ))),
    }
}

/// Resolve an interface identifier and create the matching protocol.
pub fn select_protocol(
    interface: &str,
    modules: Vec<Module>,
    transport: Option<Arc<dyn FrameTransport>>,
) -> Result<Arc<dyn DobissProtocol>> {
    create_protocol(ProtocolKind::from_interface(interface)?, modules, transport)
}
