//! Dialect metadata.
//!
//! Self-describing metadata for every supported controller dialect, used by
//! `list-protocols` and to resolve configured interface identifiers.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameter type for configuration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Integer,
}

/// Metadata for a single configuration parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterMetadata {
    /// Internal parameter name (used in config).
    pub name: &'static str,
    /// Human-readable display name.
    pub display_name: &'static str,
    /// Description of the parameter.
    pub description: &'static str,
    /// Whether this parameter is required.
    pub required: bool,
    /// Default value if not specified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Type of the parameter.
    pub param_type: ParameterType,
}

impl ParameterMetadata {
    /// Create a new required parameter.
    pub const fn required(
        name: &'static str,
        display_name: &'static str,
        description: &'static str,
        param_type: ParameterType,
    ) -> Self {
        Self {
            name,
            display_name,
            description,
            required: true,
            default_value: None,
            param_type,
        }
    }

    /// Create a new optional parameter with a default value.
    pub fn optional(
        name: &'static str,
        display_name: &'static str,
        description: &'static str,
        param_type: ParameterType,
        default_value: Value,
    ) -> Self {
        Self {
            name,
            display_name,
            description,
            required: false,
            default_value: Some(default_value),
            param_type,
        }
    }
}

/// Metadata for a driver implementation.
#[derive(Debug, Clone, Serialize)]
pub struct DriverMetadata {
    /// Internal driver name (used in config).
    pub name: &'static str,
    /// Human-readable display name.
    pub display_name: &'static str,
    /// Description of the driver.
    pub description: &'static str,
    /// Available configuration parameters.
    pub parameters: Vec<ParameterMetadata>,
}

/// Metadata for a controller dialect.
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolMetadata {
    /// Internal protocol name.
    pub name: &'static str,
    /// Human-readable display name.
    pub display_name: &'static str,
    /// Description of the protocol.
    pub description: &'static str,
    /// Configured `interface` values selecting this dialect.
    pub interfaces: Vec<&'static str>,
    /// Available drivers for this protocol.
    pub drivers: Vec<DriverMetadata>,
    /// Whether a controller connection is needed.
    pub needs_controller: bool,
}

/// Registry of all available dialects.
pub struct ProtocolRegistry {
    protocols: Vec<ProtocolMetadata>,
}

impl ProtocolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            protocols: Vec::new(),
        }
    }

    /// Register a protocol.
    pub fn register(&mut self, protocol: ProtocolMetadata) {
        self.protocols.push(protocol);
    }

    /// Get all registered protocols.
    pub fn protocols(&self) -> &[ProtocolMetadata] {
        &self.protocols
    }

    /// Find the protocol selected by an interface identifier (case-insensitive).
    pub fn find_by_interface(&self, interface: &str) -> Option<&ProtocolMetadata> {
        let interface = interface.trim();
        self.protocols
            .iter()
            .find(|p| p.interfaces.iter().any(|i| i.eq_ignore_ascii_case(interface)))
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for types that can provide their own metadata.
pub trait HasMetadata {
    /// Get the metadata for this type.
    fn metadata() -> DriverMetadata;
}

/// Parameters shared by every dialect that talks to a real controller.
pub fn controller_parameters() -> Vec<ParameterMetadata> {
    vec![
        ParameterMetadata::required(
            "host",
            "Host",
            "Controller IP address or hostname",
            ParameterType::String,
        ),
        ParameterMetadata::optional(
            "port",
            "Port",
            "Controller TCP port",
            ParameterType::Integer,
            serde_json::json!(10001),
        ),
        ParameterMetadata::optional(
            "interface",
            "Interface",
            "Controller dialect identifier",
            ParameterType::String,
            serde_json::json!("AMBIANCEPRO"),
        ),
        ParameterMetadata::optional(
            "connect_timeout_ms",
            "Connect Timeout",
            "TCP connect timeout in milliseconds",
            ParameterType::Integer,
            serde_json::json!(5000),
        ),
        ParameterMetadata::optional(
            "request_timeout_ms",
            "Request Timeout",
            "Reply timeout per request in milliseconds",
            ParameterType::Integer,
            serde_json::json!(5000),
        ),
    ]
}

/// Build the global protocol registry.
fn build_registry() -> ProtocolRegistry {
    use crate::protocols::{AmbianceProClient, FakeProtocol, SxClient};

    let mut registry = ProtocolRegistry::new();

    registry.register(ProtocolMetadata {
        name: "ambiance_pro",
        display_name: "AmbiancePRO",
        description: "Header-framed dialect of AmbiancePRO and Evolution PRO controllers",
        interfaces: vec!["AMBIANCEPRO", "EVOLUTIONPRO"],
        drivers: vec![AmbianceProClient::metadata()],
        needs_controller: true,
    });

    registry.register(ProtocolMetadata {
        name: "sx",
        display_name: "SX",
        description: "Prefix-framed dialect of SX Ambiance and SX Evolution controllers",
        interfaces: vec!["SXAMBIANCE", "SXEVOLUTION"],
        drivers: vec![SxClient::metadata()],
        needs_controller: true,
    });

    registry.register(ProtocolMetadata {
        name: "fake",
        display_name: "Fake",
        description: "In-memory simulator for testing and simulation",
        interfaces: vec!["FAKE"],
        drivers: vec![FakeProtocol::metadata()],
        needs_controller: false,
    });

    registry
}

/// Global protocol registry instance.
static PROTOCOL_REGISTRY: Lazy<ProtocolRegistry> = Lazy::new(build_registry);

/// Get the global protocol registry.
pub fn get_protocol_registry() -> &'static ProtocolRegistry {
    &PROTOCOL_REGISTRY
}
