//! AmbiancePRO dialect client.
//!
//! Also drives Evolution PRO controllers, which speak the same frames.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::codec::ambiance_pro::{self, Action, PROTOCOL_NAME};
use crate::codec::format_frame;
use crate::core::error::{GatewayError, Result};
use crate::core::metadata::{controller_parameters, DriverMetadata, HasMetadata};
use crate::core::state::{ModuleView, OutputState};
use crate::core::topology::{Module, ModuleType};
use crate::core::traits::{module_views, resolve, DobissProtocol, FrameTransport, ProtocolCapabilities};

/// AmbiancePRO client bound to one transport.
pub struct AmbianceProClient {
    transport: Arc<dyn FrameTransport>,
    modules: Vec<ModuleView>,
}

impl AmbianceProClient {
    /// Create a client for the given modules.
    pub fn new(transport: Arc<dyn FrameTransport>, modules: Vec<Module>) -> Self {
        let mut client = Self {
            transport,
            modules: Vec::new(),
        };
        client.modules = module_views(&client, modules);
        client
    }

    async fn send_action(&self, module: u8, output: u8, action: Action, level: Option<u8>) -> Result<()> {
        let (view, out) = resolve(&self.modules, module, output)?;
        let frame = ambiance_pro::encode_action(view.module.module_type, module, out.address, action, level);

        debug!(
            module,
            output = %out.name,
            ?action,
            frame = %format_frame(&frame),
            "AmbiancePRO action"
        );

        // The reply only acknowledges the action; state comes from the next poll.
        self.transport.request(frame).await?;
        Ok(())
    }
}

impl ProtocolCapabilities for AmbianceProClient {
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
impl DobissProtocol for AmbianceProClient {
    fn modules(&self) -> &[ModuleView] {
        &self.modules
    }

    async fn on(&self, module: u8, output: u8, level: Option<u8>) -> Result<()> {
        self.send_action(module, output, Action::On, level).await
    }

    async fn off(&self, module: u8, output: u8) -> Result<()> {
        self.send_action(module, output, Action::Off, None).await
    }

    async fn toggle(&self, module: u8, output: u8) -> Result<()> {
        self.send_action(module, output, Action::Toggle, None).await
    }

    async fn poll_module(&self, module: u8) -> Result<Vec<OutputState>> {
        let view = self
            .module(module)
            .ok_or_else(|| GatewayError::not_found(format!("module {}", module)))?;

        let frame = ambiance_pro::encode_poll(view.module.module_type, module);
        let reply = self.transport.request(frame).await?;
        debug!(module, reply = %format_frame(&reply), "AmbiancePRO poll reply");

        ambiance_pro::decode_poll(view, &reply)
    }
}

impl HasMetadata for AmbianceProClient {
    fn metadata() -> DriverMetadata {
        DriverMetadata {
            name: "ambiance_pro",
            display_name: "AmbiancePRO",
            description: "AmbiancePRO and Evolution PRO controllers over TCP. Native toggle, raw 0-100 dimmer levels.",
            parameters: controller_parameters(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::testing::ScriptedTransport;

    fn client(transport: Arc<ScriptedTransport>) -> AmbianceProClient {
        AmbianceProClient::new(
            transport,
            vec![
                Module::new(1, ModuleType::Relay, ["berging", "koele_berging"]),
                Module::new(2, ModuleType::Dimmer, ["nachthal"]),
            ],
        )
    }

    fn poll_reply(states: &[u8]) -> Vec<u8> {
        let mut reply = vec![0u8; 48];
        reply[ambiance_pro::STATE_OFFSET..ambiance_pro::STATE_OFFSET + states.len()]
            .copy_from_slice(states);
        reply
    }

    #[tokio::test]
    async fn test_poll_relay_module() {
        let transport = Arc::new(ScriptedTransport::new(vec![poll_reply(&[0x00, 0x01])]));
        let client = client(transport.clone());

        let states = client.poll_module(1).await.unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].output.name, "berging");
        assert!(!states[0].powered);
        assert_eq!(states[1].output.name, "koele_berging");
        assert!(states[1].powered);

        let sent = transport.sent();
        assert_eq!(sent, vec![ambiance_pro::encode_poll(ModuleType::Relay, 1)]);
    }

    #[tokio::test]
    async fn test_turn_on_writes_action_frame() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![0xAF]]));
        let client = client(transport.clone());

        client.on(2, 0, Some(40)).await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][2], 0x10);
        assert_eq!(&sent[0][16..], &[0x02, 0x00, 0x01, 0xFF, 0xFF, 40, 0xFF, 0xFF]);
    }

    #[tokio::test]
    async fn test_toggle_is_native() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![0xAF]]));
        let client = client(transport.clone());

        assert!(client.supports_toggle());
        client.toggle(1, 1).await.unwrap();
        assert_eq!(transport.sent()[0][18], 0x02);
    }

    #[tokio::test]
    async fn test_unknown_addresses() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let client = client(transport.clone());

        assert!(matches!(client.poll_module(9).await, Err(GatewayError::NotFound(_))));
        assert!(matches!(client.off(1, 7).await, Err(GatewayError::NotFound(_))));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let client = client(transport);

        let err = client.poll_module(1).await.unwrap_err();
        assert!(err.is_transport());
    }
}
