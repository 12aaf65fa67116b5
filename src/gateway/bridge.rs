//! Home Assistant MQTT light bridge.
//!
//! Topic layout for an output named `salon` with the default prefixes:
//!
//! ```text
//! dobiss/light/salon/set                       <- commands   {"state":"ON","brightness":5}
//! dobiss/light/salon/state                     -> state      {"state":"ON","brightness":5}
//! homeassistant/light/dobiss_1_5/config        -> discovery  (retained)
//! ```
//!
//! Brightness on the bus is in the dialect's display units; discovery tells
//! Home Assistant the matching `brightness_scale`.

use serde::{Deserialize, Serialize};

use crate::core::error::{GatewayError, Result};
use crate::core::state::{ModuleView, OutputState};
use crate::core::topology::Output;

/// Manufacturer reported in discovery payloads.
pub const MANUFACTURER: &str = "Dobiss";

// ============================================================================
// Topics
// ============================================================================

/// All topics belonging to one output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTopics {
    /// `<prefix>_<module>_<output>`
    pub unique_id: String,

    /// `<prefix>/light/<name>`
    pub base: String,

    /// `<base>/set`
    pub command: String,

    /// `<base>/state`
    pub state: String,

    /// `<discovery_prefix>/light/<unique_id>/config`
    pub discovery: String,
}

impl OutputTopics {
    /// Derive the topics of an output.
    pub fn new(prefix: &str, discovery_prefix: &str, module: u8, output: &Output) -> Self {
        let unique_id = format!("{}_{}_{}", prefix, module, output.address);
        let base = format!("{}/light/{}", prefix, output.name);

        Self {
            command: format!("{}/set", base),
            state: format!("{}/state", base),
            discovery: format!("{}/light/{}/config", discovery_prefix, unique_id),
            unique_id,
            base,
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Requested power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandState {
    /// Switch on.
    On,
    /// Switch off.
    Off,
    /// Flip.
    Toggle,
}

/// Payload received on a command topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Requested power state.
    pub state: CommandState,

    /// Brightness in display units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u32>,
}

impl Command {
    /// Parse a command payload. State names are case-insensitive.
    pub fn parse(payload: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Raw {
            state: String,
            #[serde(default)]
            brightness: Option<u32>,
        }

        let raw: Raw = serde_json::from_str(payload)?;
        let state = match raw.state.trim() {
            s if s.eq_ignore_ascii_case("ON") => CommandState::On,
            s if s.eq_ignore_ascii_case("OFF") => CommandState::Off,
            s if s.eq_ignore_ascii_case("TOGGLE") => CommandState::Toggle,
            other => {
                return Err(GatewayError::decode(format!(
                    "Unknown command state '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            state,
            brightness: raw.brightness,
        })
    }
}

// ============================================================================
// State
// ============================================================================

/// Payload published on a state topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    /// `ON` or `OFF`.
    pub state: String,

    /// Brightness in display units (dimmable outputs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
}

impl From<&OutputState> for StatePayload {
    fn from(state: &OutputState) -> Self {
        Self {
            state: if state.powered { "ON" } else { "OFF" }.to_string(),
            brightness: if state.output.dimmable { state.level } else { None },
        }
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// Device block of a discovery payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device identifiers.
    pub identifiers: Vec<String>,
    /// Manufacturer.
    pub manufacturer: String,
    /// Dialect name.
    pub model: String,
    /// Display name.
    pub name: String,
}

/// Home Assistant MQTT light discovery payload (JSON schema).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryPayload {
    pub name: String,
    pub unique_id: String,
    pub schema: String,
    pub command_topic: String,
    pub state_topic: String,
    pub brightness: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness_scale: Option<u8>,
    pub device: DeviceInfo,
}

impl DiscoveryPayload {
    /// Build the discovery payload for an output.
    pub fn new(topics: &OutputTopics, view: &ModuleView, output: &Output, model: &str, prefix: &str) -> Self {
        Self {
            name: output.name.clone(),
            unique_id: topics.unique_id.clone(),
            schema: "json".to_string(),
            command_topic: topics.command.clone(),
            state_topic: topics.state.clone(),
            brightness: output.dimmable,
            brightness_scale: output.dimmable.then(|| view.display_max()),
            device: DeviceInfo {
                identifiers: vec![format!("{}_{}", prefix, view.address())],
                manufacturer: MANUFACTURER.to_string(),
                model: model.to_string(),
                name: format!("{} module {}", MANUFACTURER, view.address()),
            },
        }
    }
}
