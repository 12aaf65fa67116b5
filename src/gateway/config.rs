//! Gateway configuration.
//!
//! Loaded from a TOML file, then overridden by environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `DOBISS_HOST` | `dobiss.host` |
//! | `DOBISS_PORT` | `dobiss.port` |
//! | `DOBISS_INTERFACE` | `dobiss.interface` |
//! | `MQTT_URL` | `mqtt.url` |
//! | `POLL_INTERVAL_IN_MS` | `poll_interval_ms` |
//!
//! # Example
//!
//! ```toml
//! poll_interval_ms = 1000
//!
//! [dobiss]
//! host = "192.168.1.50"
//! interface = "AMBIANCEPRO"
//!
//! [mqtt]
//! url = "mqtt://192.168.1.2"
//!
//! [[modules]]
//! type = "relay"
//! outputs = ["berging", "koele_berging"]
//!
//! [[modules]]
//! address = 2
//! type = "dimmer"
//! outputs = ["nachthal"]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::ambiance_pro;
use crate::core::error::{GatewayError, Result};
use crate::core::topology::{build_modules, Module, ModuleConfig};
use crate::transport::{TransportConfig, DEFAULT_PORT};

use super::factory::ProtocolKind;

/// Required prefix of the broker URL.
pub const MQTT_SCHEME: &str = "mqtt://";

// ============================================================================
// Sections
// ============================================================================

/// `[dobiss]` section: the controller link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DobissConfig {
    /// Controller IP address or hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Controller TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Dialect identifier (AMBIANCEPRO, EVOLUTIONPRO, SXAMBIANCE, SXEVOLUTION, FAKE).
    #[serde(default = "default_interface")]
    pub interface: String,

    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Reply timeout per request in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for DobissConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            interface: default_interface(),
            connect_timeout_ms: default_timeout_ms(),
            request_timeout_ms: default_timeout_ms(),
        }
    }
}

/// `[mqtt]` section: the message broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker URL, must start with `mqtt://`.
    #[serde(default = "default_mqtt_url")]
    pub url: String,

    /// Topic prefix for light topics.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Home Assistant discovery prefix.
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// Discovery republish period in milliseconds (0 = only at start).
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: default_mqtt_url(),
            prefix: default_prefix(),
            discovery_prefix: default_discovery_prefix(),
            discovery_interval_ms: default_discovery_interval_ms(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_interface() -> String {
    "AMBIANCEPRO".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_mqtt_url() -> String {
    "mqtt://192.168.0.2".to_string()
}

fn default_prefix() -> String {
    "dobiss".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_discovery_interval_ms() -> u64 {
    5 * 60 * 1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

// ============================================================================
// Gateway Configuration
// ============================================================================

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Period between polls of every module in milliseconds (0 = only after actions).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Controller link.
    #[serde(default)]
    pub dobiss: DobissConfig,

    /// Message broker.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Modules on the bus.
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            dobiss: DobissConfig::default(),
            mqtt: MqttConfig::default(),
            modules: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| GatewayError::Config(format!("Invalid TOML: {}", e)))
    }

    /// Load a TOML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GatewayError::Internal(format!("TOML encode: {}", e)))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DOBISS_HOST") {
            self.dobiss.host = Some(host);
        }

        if let Some(port) = lookup("DOBISS_PORT") {
            self.dobiss.port = port
                .trim()
                .parse()
                .map_err(|_| GatewayError::Config(format!("DOBISS_PORT is not a port: {}", port)))?;
        }

        if let Some(interface) = lookup("DOBISS_INTERFACE") {
            self.dobiss.interface = interface;
        }

        if let Some(url) = lookup("MQTT_URL") {
            self.mqtt.url = url;
        }

        if let Some(interval) = lookup("POLL_INTERVAL_IN_MS") {
            self.poll_interval_ms = interval.trim().parse().map_err(|_| {
                GatewayError::Config(format!("POLL_INTERVAL_IN_MS is not a number: {}", interval))
            })?;
        }

        Ok(())
    }

    /// Selected dialect.
    pub fn protocol_kind(&self) -> Result<ProtocolKind> {
        ProtocolKind::from_interface(&self.dobiss.interface)
    }

    /// Validate everything and build the topology.
    ///
    /// All failures are configuration errors.
    pub fn validate(&self) -> Result<Vec<Module>> {
        let kind = self.protocol_kind()?;

        if kind.needs_controller() {
            match self.dobiss.host.as_deref().map(str::trim) {
                Some(host) if !host.is_empty() => {}
                _ => {
                    return Err(GatewayError::config(format!(
                        "dobiss.host is required for interface {}",
                        self.dobiss.interface
                    )))
                }
            }
        }

        if !self.mqtt.url.starts_with(MQTT_SCHEME) {
            return Err(GatewayError::config(format!(
                "mqtt.url must start with {} (got '{}')",
                MQTT_SCHEME, self.mqtt.url
            )));
        }

        if self.mqtt.prefix.trim().is_empty() {
            return Err(GatewayError::config("mqtt.prefix must not be empty"));
        }

        let modules = build_modules(&self.modules)?;

        // An AmbiancePRO poll reply carries one state byte per output, 12 in all.
        if kind == ProtocolKind::AmbiancePro {
            if let Some(module) = modules.iter().find(|m| m.outputs.len() > ambiance_pro::STATE_COUNT) {
                return Err(GatewayError::config(format!(
                    "Module {} has {} outputs, {} supports at most {}",
                    module.address,
                    module.outputs.len(),
                    self.dobiss.interface,
                    ambiance_pro::STATE_COUNT
                )));
            }
        }

        Ok(modules)
    }

    /// Transport settings for the controller link.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig::new(self.dobiss.host.clone().unwrap_or_default(), self.dobiss.port)
            .with_connect_timeout(Duration::from_millis(self.dobiss.connect_timeout_ms))
            .with_request_timeout(Duration::from_millis(self.dobiss.request_timeout_ms))
    }

    /// Poll period, `None` when periodic polling is disabled.
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }

    /// Discovery republish period, `None` when only published at start.
    pub fn discovery_interval(&self) -> Option<Duration> {
        (self.mqtt.discovery_interval_ms > 0)
            .then(|| Duration::from_millis(self.mqtt.discovery_interval_ms))
    }

    /// A complete sample configuration.
    pub fn example() -> Self {
        use crate::core::topology::ModuleType;

        Self {
            dobiss: DobissConfig {
                host: Some("192.168.1.50".to_string()),
                ..DobissConfig::default()
            },
            mqtt: MqttConfig {
                url: "mqtt://192.168.1.2".to_string(),
                ..MqttConfig::default()
            },
            poll_interval_ms: default_poll_interval_ms(),
            modules: vec![
                ModuleConfig::new(ModuleType::Relay, ["berging", "koele_berging", "wc", "inkomhal"]),
                ModuleConfig::new(ModuleType::Dimmer, ["nachthal", "fitness", "office"]).with_address(2),
            ],
        }
    }
}
