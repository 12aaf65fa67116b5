//! In-memory controller simulator.
//!
//! `FakeProtocol` does not connect to any hardware. Actions are stored in a
//! map keyed by `(module, output)` and polls return whatever was stored last.
//! Useful for developing automations without a controller on the bench.
//!
//! # Example
//!
//! ```rust,ignore
//! use dobiss_gateway::protocols::fake::FakeProtocol;
//!
//! let fake = FakeProtocol::new(modules);
//! fake.on(1, 0, None).await?;
//! let states = fake.poll_module(1).await?; // output 0 powered, level 100
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::core::error::{GatewayError, Result};
use crate::core::metadata::{DriverMetadata, HasMetadata, ParameterMetadata, ParameterType};
use crate::core::state::{ModuleView, OutputState};
use crate::core::topology::{Module, ModuleType};
use crate::core::traits::{module_views, resolve, DobissProtocol, ProtocolCapabilities};

/// Dialect name reported by the simulator.
pub const PROTOCOL_NAME: &str = "Fake";

/// Level stored by `on` without an explicit level.
const FULL_LEVEL: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StoredState {
    powered: bool,
    level: u8,
}

/// Simulated controller.
pub struct FakeProtocol {
    modules: Vec<ModuleView>,
    /// (module, output) -> last requested state
    states: DashMap<(u8, u8), StoredState>,
}

impl FakeProtocol {
    /// Create a simulator for the given modules.
    pub fn new(modules: Vec<Module>) -> Self {
        let mut fake = Self {
            modules: Vec::new(),
            states: DashMap::new(),
        };
        fake.modules = module_views(&fake, modules);
        fake
    }

    fn store(&self, module: u8, output: u8, state: StoredState) -> Result<()> {
        let (_, out) = resolve(&self.modules, module, output)?;
        debug!(module, output = %out.name, powered = state.powered, level = state.level, "Fake action");
        self.states.insert((module, output), state);
        Ok(())
    }
}

impl ProtocolCapabilities for FakeProtocol {
    fn name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    fn brightness_scale(&self, _module_type: ModuleType) -> u8 {
        1
    }

    fn supports_toggle(&self) -> bool {
        true
    }
}

#[async_trait]
impl DobissProtocol for FakeProtocol {
    fn modules(&self) -> &[ModuleView] {
        &self.modules
    }

    async fn on(&self, module: u8, output: u8, level: Option<u8>) -> Result<()> {
        let level = level.map(|l| l.min(100)).unwrap_or(FULL_LEVEL);
        self.store(module, output, StoredState { powered: true, level })
    }

    async fn off(&self, module: u8, output: u8) -> Result<()> {
        self.store(module, output, StoredState { powered: false, level: 0 })
    }

    async fn toggle(&self, module: u8, output: u8) -> Result<()> {
        let current = self.states.get(&(module, output)).map(|s| *s);
        match current {
            Some(state) if state.powered => self.off(module, output).await,
            _ => self.on(module, output, None).await,
        }
    }

    async fn poll_module(&self, module: u8) -> Result<Vec<OutputState>> {
        let view = self
            .module(module)
            .ok_or_else(|| GatewayError::not_found(format!("module {}", module)))?;

        let states = view
            .module
            .outputs
            .iter()
            .map(|output| {
                let stored = self.states.get(&(module, output.address)).map(|s| *s);
                let powered = stored.map(|s| s.powered).unwrap_or(false);
                match stored {
                    Some(s) if output.dimmable => OutputState::dimmed(output.clone(), powered, s.level),
                    _ => OutputState::switched(output.clone(), powered),
                }
            })
            .collect();

        Ok(states)
    }
}

impl HasMetadata for FakeProtocol {
    fn metadata() -> DriverMetadata {
        DriverMetadata {
            name: "fake",
            display_name: "Fake Controller",
            description: "In-memory simulator for testing without hardware. Polls return the last requested state.",
            parameters: vec![ParameterMetadata::required(
                "interface",
                "Interface",
                "Must be FAKE",
                ParameterType::String,
            )],
        }
    }
}
