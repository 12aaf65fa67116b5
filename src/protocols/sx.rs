//! SX dialect client (SX Ambiance and SX Evolution controllers).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::codec::format_frame;
use crate::codec::sx::{self, BRIGHTNESS_SCALE, PROTOCOL_NAME};
use crate::core::error::{GatewayError, Result};
use crate::core::metadata::{controller_parameters, DriverMetadata, HasMetadata};
use crate::core::state::{ModuleView, OutputState};
use crate::core::topology::{Module, ModuleType};
use crate::core::traits::{module_views, resolve, DobissProtocol, FrameTransport, ProtocolCapabilities};

/// SX client bound to one transport.
pub struct SxClient {
    transport: Arc<dyn FrameTransport>,
    modules: Vec<ModuleView>,
}

impl SxClient {
    /// Create a client for the given modules.
    pub fn new(transport: Arc<dyn FrameTransport>, modules: Vec<Module>) -> Self {
        let mut client = Self {
            transport,
            modules: Vec::new(),
        };
        client.modules = module_views(&client, modules);
        client
    }

    async fn send_action(&self, module: u8, output: u8, on: bool, level: Option<u8>) -> Result<()> {
        let (_, out) = resolve(&self.modules, module, output)?;
        let frame = sx::encode_action(module, out, on, level);

        debug!(module, output = %out.name, on, frame = %format_frame(&frame), "SX action");

        self.transport.request(frame).await?;
        Ok(())
    }
}

impl ProtocolCapabilities for SxClient {
    fn name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    fn brightness_scale(&self, module_type: ModuleType) -> u8 {
        if module_type.is_dimmable() {
            BRIGHTNESS_SCALE
        } else {
            1
        }
    }
}

#[async_trait]
impl DobissProtocol for SxClient {
    fn modules(&self) -> &[ModuleView] {
        &self.modules
    }

    async fn on(&self, module: u8, output: u8, level: Option<u8>) -> Result<()> {
        self.send_action(module, output, true, level).await
    }

    async fn off(&self, module: u8, output: u8) -> Result<()> {
        self.send_action(module, output, false, None).await
    }

    async fn poll_module(&self, module: u8) -> Result<Vec<OutputState>> {
        let view = self
            .module(module)
            .ok_or_else(|| GatewayError::not_found(format!("module {}", module)))?;

        let mut states = Vec::with_capacity(view.module.outputs.len());
        for batch in sx::poll_batches(view) {
            let frame = sx::encode_poll_batch(module, batch);
            let reply = self.transport.request(frame).await?;
            debug!(module, reply = %format_frame(&reply), "SX poll reply");
            states.extend(sx::decode_poll_batch(view, batch, &reply)?);
        }

        Ok(states)
    }
}

impl HasMetadata for SxClient {
    fn metadata() -> DriverMetadata {
        DriverMetadata {
            name: "sx",
            display_name: "SX",
            description: "SX Ambiance and SX Evolution controllers over TCP. Batched polls, dimmer levels in 10% steps.",
            parameters: controller_parameters(),
        }
    }
}
