//! Gateway runtime: builds the pipeline and rebuilds it after failures.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bus::PubSub;
use crate::core::error::Result;
use crate::core::topology::Module;
use crate::core::traits::FrameTransport;
use crate::gateway::config::GatewayConfig;
use crate::gateway::engine::{EngineConfig, SyncEngine};
use crate::gateway::factory::{create_protocol, ProtocolKind};
use crate::transport::TransportQueue;

/// Wait between a pipeline failure and the rebuild.
pub const RESTART_COOLDOWN: Duration = Duration::from_secs(5);

/// Owns the configuration and the bus; runs transport, protocol and engine.
pub struct GatewayRuntime {
    config: GatewayConfig,
    bus: Arc<dyn PubSub>,
    cooldown: Duration,
}

impl GatewayRuntime {
    pub fn new(config: GatewayConfig, bus: Arc<dyn PubSub>) -> Self {
        Self {
            config,
            bus,
            cooldown: RESTART_COOLDOWN,
        }
    }

    /// Override the restart cooldown.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run until `shutdown` flips to `true`.
    ///
    /// Configuration errors are returned immediately. Any other pipeline
    /// error is logged and the pipeline is rebuilt after the cooldown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let modules = self.config.validate()?;
        let kind = self.config.protocol_kind()?;
        let mut attempt: u64 = 0;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            attempt += 1;

            match self.run_pipeline(kind, modules.clone(), shutdown.clone()).await {
                Ok(()) if *shutdown.borrow() => return Ok(()),
                Ok(()) => warn!(attempt, "Pipeline ended without shutdown"),
                Err(e) if e.is_config() => return Err(e),
                Err(e) => error!(attempt, error = %e, "Pipeline failed"),
            }

            info!(cooldown_ms = self.cooldown.as_millis() as u64, "Restarting pipeline");
            tokio::select! {
                _ = tokio::time::sleep(self.cooldown) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn run_pipeline(
        &self,
        kind: ProtocolKind,
        modules: Vec<Module>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let transport: Option<Arc<dyn FrameTransport>> = if kind.needs_controller() {
            Some(Arc::new(TransportQueue::new(self.config.transport_config())))
        } else {
            None
        };

        let protocol = create_protocol(kind, modules, transport)?;
        info!(
            protocol = %kind,
            interface = %self.config.dobiss.interface,
            "Pipeline built"
        );

        let engine = Arc::new(SyncEngine::new(
            protocol,
            Arc::clone(&self.bus),
            EngineConfig::from(&self.config),
        ));
        engine.run(shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, PublishOptions};
    use crate::core::error::GatewayError;
    use crate::core::topology::{ModuleConfig, ModuleType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn fake_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.dobiss.interface = "FAKE".to_string();
        config.poll_interval_ms = 0;
        config.mqtt.discovery_interval_ms = 0;
        config.modules = vec![ModuleConfig::new(ModuleType::Relay, ["hal"])];
        config
    }

    /// Bus that refuses the first `failures` subscriptions.
    struct FlakyBus {
        inner: MemoryBus,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl PubSub for FlakyBus {
        async fn publish(&self, topic: &str, payload: String, options: PublishOptions) -> Result<()> {
            self.inner.publish(topic, payload, options).await
        }

        async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(GatewayError::Bus("broker unavailable".into()));
            }
            self.inner.subscribe(topic).await
        }
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let mut config = fake_config();
        config.dobiss.interface = "AMBIANCEPRO".to_string();

        let runtime = GatewayRuntime::new(config, Arc::new(MemoryBus::new()));
        let (_tx, rx) = watch::channel(false);

        let err = runtime.run(rx).await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_fake_pipeline_publishes_and_stops() {
        let bus = Arc::new(MemoryBus::new());
        let runtime = GatewayRuntime::new(fake_config(), bus.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { runtime.run(rx).await });

        while bus.retained("dobiss/light/hal/state").is_none()
            || bus.retained("homeassistant/light/dobiss_1_0/config").is_none()
        {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            bus.retained("dobiss/light/hal/state").as_deref(),
            Some(r#"{"state":"OFF"}"#)
        );

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_restarts_after_cooldown() {
        let bus = Arc::new(FlakyBus {
            inner: MemoryBus::new(),
            failures: AtomicUsize::new(1),
        });
        let runtime = GatewayRuntime::new(fake_config(), bus.clone());
        let (tx, rx) = watch::channel(false);
        let started = Instant::now();

        let handle = tokio::spawn(async move { runtime.run(rx).await });

        while bus.inner.retained("dobiss/light/hal/state").is_none() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(started.elapsed() >= RESTART_COOLDOWN);

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_cooldown() {
        let bus = Arc::new(FlakyBus {
            inner: MemoryBus::new(),
            failures: AtomicUsize::new(usize::MAX),
        });
        let runtime = GatewayRuntime::new(fake_config(), bus).with_cooldown(Duration::from_secs(60));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { runtime.run(rx).await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
