//! Device topology: modules and their outputs.
//!
//! The topology is built once from configuration and never changes while the
//! pipeline runs. A configuration change means rebuilding the whole pipeline.
//!
//! # Addressing
//!
//! - Module addresses are 1-based bus addresses in `1..=82`. A module without
//!   an explicit address takes its 1-based position in the configured list.
//! - Output addresses are always the 0-based position in the module's output
//!   list and can't be configured.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::{GatewayError, Result};

/// Lowest valid module address on the bus.
pub const MIN_MODULE_ADDRESS: u8 = 1;

/// Highest valid module address on the bus.
pub const MAX_MODULE_ADDRESS: u8 = 82;

/// Kind of hardware module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModuleType {
    /// On/off relay module.
    #[default]
    #[serde(rename = "relay")]
    Relay,

    /// Dimmer module.
    #[serde(rename = "dimmer")]
    Dimmer,

    /// 0-10 V analog control module.
    #[serde(rename = "0-10v")]
    ZeroToTenVolt,
}

impl ModuleType {
    /// Whether outputs on this module accept a brightness level.
    #[inline]
    pub const fn is_dimmable(&self) -> bool {
        matches!(self, Self::Dimmer | Self::ZeroToTenVolt)
    }

    /// Settle time before the poll that follows an action.
    pub const fn default_poll_delay(&self) -> Duration {
        match self {
            Self::Relay => Duration::ZERO,
            Self::Dimmer | Self::ZeroToTenVolt => Duration::from_millis(2000),
        }
    }
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Relay => "relay",
            Self::Dimmer => "dimmer",
            Self::ZeroToTenVolt => "0-10v",
        };
        write!(f, "{}", s)
    }
}

/// One controllable channel on a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Output {
    /// 0-based index within the owning module.
    pub address: u8,

    /// Unique human label, also used to derive bus topics.
    pub name: String,

    /// Derived from the owning module's type.
    pub dimmable: bool,
}

/// One physical controller unit on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Bus address (1..=82).
    pub address: u8,

    /// Hardware kind.
    pub module_type: ModuleType,

    /// Outputs, ordered by address.
    pub outputs: Vec<Output>,

    /// Explicit post-action settle delay.
    pub poll_delay_ms: Option<u64>,
}

impl Module {
    /// Build a module with outputs addressed by position.
    pub fn new<S: Into<String>>(
        address: u8,
        module_type: ModuleType,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        let dimmable = module_type.is_dimmable();
        let outputs = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| Output {
                address: index as u8,
                name: name.into(),
                dimmable,
            })
            .collect();

        Self {
            address,
            module_type,
            outputs,
            poll_delay_ms: None,
        }
    }

    /// Override the post-action settle delay.
    pub fn with_poll_delay_ms(mut self, delay_ms: u64) -> Self {
        self.poll_delay_ms = Some(delay_ms);
        self
    }

    /// Settle delay before the poll that follows an action.
    pub fn poll_delay(&self) -> Duration {
        self.poll_delay_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.module_type.default_poll_delay())
    }

    /// Find an output by its address.
    pub fn output(&self, address: u8) -> Option<&Output> {
        self.outputs.iter().find(|o| o.address == address)
    }
}

/// Module descriptor as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Explicit bus address. Defaults to the 1-based list position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u8>,

    /// Module kind.
    #[serde(rename = "type", default)]
    pub module_type: ModuleType,

    /// Output names, addressed by position.
    pub outputs: Vec<String>,

    /// Post-action settle delay override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_delay_ms: Option<u64>,
}

impl ModuleConfig {
    /// Create a descriptor without an explicit address.
    pub fn new<S: Into<String>>(module_type: ModuleType, outputs: impl IntoIterator<Item = S>) -> Self {
        Self {
            address: None,
            module_type,
            outputs: outputs.into_iter().map(Into::into).collect(),
            poll_delay_ms: None,
        }
    }

    /// Set an explicit bus address.
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = Some(address);
        self
    }
}

/// Turn configured module descriptors into the canonical topology.
///
/// Every failure is a [`GatewayError::Config`].
pub fn build_modules(configs: &[ModuleConfig]) -> Result<Vec<Module>> {
    if configs.is_empty() {
        return Err(GatewayError::config("At least one module must be configured"));
    }

    let mut modules = Vec::with_capacity(configs.len());
    let mut seen_addresses = HashSet::with_capacity(configs.len());
    let mut seen_names = HashSet::new();

    for (index, config) in configs.iter().enumerate() {
        let address = match config.address {
            Some(address) => address,
            None => u8::try_from(index + 1).map_err(|_| {
                GatewayError::config(format!("Module #{} has no representable address", index + 1))
            })?,
        };

        if !(MIN_MODULE_ADDRESS..=MAX_MODULE_ADDRESS).contains(&address) {
            return Err(GatewayError::config(format!(
                "Module address {} out of range ({}..={})",
                address, MIN_MODULE_ADDRESS, MAX_MODULE_ADDRESS
            )));
        }

        if !seen_addresses.insert(address) {
            return Err(GatewayError::config(format!(
                "Duplicate module address {}",
                address
            )));
        }

        if config.outputs.is_empty() {
            return Err(GatewayError::config(format!(
                "Module {} needs at least one output",
                address
            )));
        }

        if config.outputs.len() > usize::from(u8::MAX) {
            return Err(GatewayError::config(format!(
                "Module {} has too many outputs ({})",
                address,
                config.outputs.len()
            )));
        }

        for name in &config.outputs {
            if name.trim().is_empty() {
                return Err(GatewayError::config(format!(
                    "Module {} has an output with an empty name",
                    address
                )));
            }
            if !seen_names.insert(name.as_str()) {
                return Err(GatewayError::config(format!(
                    "Duplicate output name '{}'",
                    name
                )));
            }
        }

        let mut module = Module::new(address, config.module_type, config.outputs.iter().cloned());
        module.poll_delay_ms = config.poll_delay_ms;
        modules.push(module);
    }

    Ok(modules)
}

/// Find a module by bus address.
pub fn find_module(modules: &[Module], address: u8) -> Option<&Module> {
    modules.iter().find(|m| m.address == address)
}

/// Find the module and output carrying `name`.
pub fn find_output_by_name<'a>(modules: &'a [Module], name: &str) -> Option<(&'a Module, &'a Output)> {
    modules.iter().find_map(|module| {
        module
            .outputs
            .iter()
            .find(|o| o.name == name)
            .map(|output| (module, output))
    })
}
