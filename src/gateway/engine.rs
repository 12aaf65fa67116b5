//! State synchronization engine.
//!
//! Every module gets its own poll loop: an optional periodic tick plus a
//! trigger channel fired after each successful action. A trigger arms a
//! catch-up poll that runs once the module's settle delay has passed. Poll results are diffed against the last state
//! published for each output; only changes reach the bus.
//!
//! Inbound commands arrive on one subscription per output and are routed to
//! the active dialect with brightness converted from display units to a
//! percentage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bus::{PubSub, PublishOptions};
use crate::core::error::{GatewayError, Result};
use crate::core::state::OutputState;
use crate::core::traits::{DobissProtocol, ProtocolCapabilities};
use crate::gateway::bridge::{Command, CommandState, DiscoveryPayload, OutputTopics, StatePayload};
use crate::gateway::config::GatewayConfig;

/// Pending action triggers per module. A full channel already has one queued.
const TRIGGER_CAPACITY: usize = 4;

// ============================================================================
// Engine configuration
// ============================================================================

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Topic prefix.
    pub prefix: String,

    /// Home Assistant discovery prefix.
    pub discovery_prefix: String,

    /// Poll period, `None` disables periodic polling.
    pub poll_interval: Option<Duration>,

    /// Discovery republish period, `None` publishes at start only.
    pub discovery_interval: Option<Duration>,
}

impl EngineConfig {
    /// Settings with default prefixes and a 1 s poll period.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            discovery_prefix: "homeassistant".to_string(),
            poll_interval: Some(Duration::from_millis(1000)),
            discovery_interval: None,
        }
    }

    /// Set the discovery prefix.
    pub fn with_discovery_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.discovery_prefix = prefix.into();
        self
    }

    /// Set the poll period.
    pub fn with_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the discovery republish period.
    pub fn with_discovery_interval(mut self, interval: Option<Duration>) -> Self {
        self.discovery_interval = interval;
        self
    }
}

impl From<&GatewayConfig> for EngineConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self::new(config.mqtt.prefix.clone())
            .with_discovery_prefix(config.mqtt.discovery_prefix.clone())
            .with_poll_interval(config.poll_interval())
            .with_discovery_interval(config.discovery_interval())
    }
}

// ============================================================================
// Change detection
// ============================================================================

/// Last published `(powered, level)` per `(module, output)`.
#[derive(Debug, Default)]
pub struct StateTracker {
    last: HashMap<(u8, u8), (bool, Option<u8>)>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `state` differs from what was last recorded.
    pub fn is_changed(&self, module: u8, state: &OutputState) -> bool {
        self.last.get(&(module, state.output.address)) != Some(&state.fingerprint())
    }

    /// Remember `state` as published.
    pub fn record(&mut self, module: u8, state: &OutputState) {
        self.last.insert((module, state.output.address), state.fingerprint());
    }

    /// Forget everything, so the next poll republishes every output.
    pub fn clear(&mut self) {
        self.last.clear();
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Bridges one protocol instance to the message bus.
pub struct SyncEngine {
    protocol: Arc<dyn DobissProtocol>,
    bus: Arc<dyn PubSub>,
    config: EngineConfig,
    topics: HashMap<(u8, u8), OutputTopics>,
}

impl SyncEngine {
    /// Create an engine for every output of `protocol`.
    pub fn new(protocol: Arc<dyn DobissProtocol>, bus: Arc<dyn PubSub>, config: EngineConfig) -> Self {
        let topics = protocol
            .modules()
            .iter()
            .flat_map(|view| {
                view.module.outputs.iter().map(|output| {
                    (
                        (view.address(), output.address),
                        OutputTopics::new(&config.prefix, &config.discovery_prefix, view.address(), output),
                    )
                })
            })
            .collect();

        Self {
            protocol,
            bus,
            config,
            topics,
        }
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Topics of an output.
    pub fn topics(&self, module: u8, output: u8) -> Option<&OutputTopics> {
        self.topics.get(&(module, output))
    }

    /// Publish a discovery descriptor for every output. Returns how many were sent.
    pub async fn publish_discovery(&self) -> Result<usize> {
        let mut count = 0;
        for view in self.protocol.modules() {
            for output in &view.module.outputs {
                let Some(topics) = self.topics(view.address(), output.address) else {
                    continue;
                };
                let payload = DiscoveryPayload::new(topics, view, output, self.protocol.name(), &self.config.prefix);
                self.bus
                    .publish(&topics.discovery, serde_json::to_string(&payload)?, PublishOptions::retained())
                    .await?;
                count += 1;
            }
        }

        debug!(count, "Published discovery");
        Ok(count)
    }

    /// Poll one module and publish every output whose state changed.
    ///
    /// Returns the number of states published.
    pub async fn sync_module(&self, module: u8, tracker: &mut StateTracker) -> Result<usize> {
        let states = self.protocol.poll_module(module).await?;

        let mut published = 0;
        for state in &states {
            if !tracker.is_changed(module, state) {
                continue;
            }
            let Some(topics) = self.topics(module, state.output.address) else {
                continue;
            };
            let payload = serde_json::to_string(&StatePayload::from(state))?;
            debug!(topic = %topics.state, %payload, "State changed");
            self.bus.publish(&topics.state, payload, PublishOptions::retained()).await?;
            tracker.record(module, state);
            published += 1;
        }

        Ok(published)
    }

    /// Execute a command payload against an output.
    pub async fn handle_command(&self, module: u8, output: u8, payload: &str) -> Result<()> {
        let command = Command::parse(payload)?;
        let view = self
            .protocol
            .module(module)
            .ok_or_else(|| GatewayError::not_found(format!("module {}", module)))?;

        match command.state {
            CommandState::On => {
                let level = command.brightness.map(|b| view.display_to_percent(b));
                self.protocol.on(module, output, level).await
            }
            CommandState::Off => self.protocol.off(module, output).await,
            CommandState::Toggle => self.protocol.toggle(module, output).await,
        }
    }

    /// Run until `shutdown` flips to `true` or a bus subscription ends.
    ///
    /// Poll failures are logged and retried on the next tick; only losing
    /// the bus ends the engine with an error.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut tasks = JoinSet::new();

        for view in self.protocol.modules() {
            let address = view.address();
            let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_CAPACITY);

            for output in &view.module.outputs {
                let Some(topics) = self.topics(address, output.address) else {
                    continue;
                };
                let commands = self.bus.subscribe(&topics.command).await?;
                tasks.spawn(self.clone().command_loop(address, output.address, commands, trigger_tx.clone()));
            }

            tasks.spawn(self.clone().poll_loop(address, view.module.poll_delay(), trigger_rx));
        }

        tasks.spawn(self.clone().discovery_loop());

        info!(
            protocol = self.protocol.name(),
            modules = self.protocol.modules().len(),
            outputs = self.topics.len(),
            "Sync engine started"
        );

        let result = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => break Err(e),
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => break Err(GatewayError::Internal(format!("Engine task failed: {}", e))),
                    None => break Ok(()),
                },
            }
        };

        tasks.shutdown().await;
        info!("Sync engine stopped");
        result
    }

    async fn poll_loop(self: Arc<Self>, module: u8, settle: Duration, mut triggers: mpsc::Receiver<()>) -> Result<()> {
        let mut tracker = StateTracker::new();
        let mut catch_up: Option<Instant> = None;
        let mut ticker = self.config.poll_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            if let Err(e) = self.sync_module(module, &mut tracker).await {
                if matches!(e, GatewayError::Bus(_)) {
                    return Err(e);
                }
                warn!(module, error = %e, "Poll failed");
            }

            loop {
                tokio::select! {
                    _ = next_tick(&mut ticker) => break,
                    _ = deadline(catch_up) => {
                        catch_up = None;
                        break;
                    }
                    trigger = triggers.recv() => match trigger {
                        // The latest action decides when the module has settled.
                        Some(()) => catch_up = Some(Instant::now() + settle),
                        None => return Ok(()),
                    },
                }
            }
        }
    }

    async fn command_loop(
        self: Arc<Self>,
        module: u8,
        output: u8,
        mut commands: mpsc::Receiver<String>,
        trigger: mpsc::Sender<()>,
    ) -> Result<()> {
        while let Some(payload) = commands.recv().await {
            match self.handle_command(module, output, &payload).await {
                Ok(()) => {
                    debug!(module, output, %payload, "Command executed");
                    let _ = trigger.try_send(());
                }
                Err(e) => warn!(module, output, %payload, error = %e, "Command failed"),
            }
        }

        Err(GatewayError::Bus(format!(
            "Command stream for module {} output {} closed",
            module, output
        )))
    }

    async fn discovery_loop(self: Arc<Self>) -> Result<()> {
        self.publish_discovery().await?;

        let Some(period) = self.config.discovery_interval else {
            return Ok(());
        };

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.publish_discovery().await {
                warn!(error = %e, "Discovery publish failed");
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::core::topology::{Module, ModuleType};
    use crate::protocols::testing::ScriptedTransport;
    use crate::protocols::{FakeProtocol, SxClient};
    use pretty_assertions::assert_eq;

    fn fake_engine(bus: Arc<MemoryBus>) -> SyncEngine {
        let protocol = Arc::new(FakeProtocol::new(vec![
            Module::new(1, ModuleType::Relay, ["berging", "wc"]),
            Module::new(2, ModuleType::Dimmer, ["salon"]),
        ]));
        SyncEngine::new(protocol, bus, EngineConfig::new("dobiss").with_poll_interval(None))
    }

    async fn wait_for_subscription(bus: &MemoryBus, topic: &str) {
        while bus.subscriber_count(topic) == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_tracker_only_reports_changes() {
        let module = Module::new(2, ModuleType::Dimmer, ["salon"]);
        let mut tracker = StateTracker::new();

        let on = OutputState::dimmed(module.outputs[0].clone(), true, 40);
        assert!(tracker.is_changed(2, &on));
        tracker.record(2, &on);
        assert!(!tracker.is_changed(2, &on));

        let brighter = OutputState::dimmed(module.outputs[0].clone(), true, 60);
        assert!(tracker.is_changed(2, &brighter));
        assert!(tracker.is_changed(3, &on));

        tracker.clear();
        assert!(tracker.is_changed(2, &on));
    }

    #[test]
    fn test_engine_config_from_gateway_config() {
        let mut config = GatewayConfig::example();
        config.poll_interval_ms = 0;
        config.mqtt.prefix = "house".into();

        let engine = EngineConfig::from(&config);
        assert_eq!(engine.prefix, "house");
        assert_eq!(engine.discovery_prefix, "homeassistant");
        assert_eq!(engine.poll_interval, None);
        assert_eq!(engine.discovery_interval, Some(Duration::from_millis(300_000)));
    }

    #[tokio::test]
    async fn test_sync_publishes_only_changes() {
        let bus = Arc::new(MemoryBus::new());
        let engine = fake_engine(bus.clone());
        let mut tracker = StateTracker::new();

        assert_eq!(engine.sync_module(1, &mut tracker).await.unwrap(), 2);
        assert_eq!(engine.sync_module(1, &mut tracker).await.unwrap(), 0);
        assert_eq!(
            bus.retained("dobiss/light/berging/state").as_deref(),
            Some(r#"{"state":"OFF"}"#)
        );

        engine.handle_command(1, 1, r#"{"state":"ON"}"#).await.unwrap();
        assert_eq!(engine.sync_module(1, &mut tracker).await.unwrap(), 1);
        assert_eq!(
            bus.retained("dobiss/light/wc/state").as_deref(),
            Some(r#"{"state":"ON"}"#)
        );
    }

    #[tokio::test]
    async fn test_commands_route_to_protocol() {
        let bus = Arc::new(MemoryBus::new());
        let engine = fake_engine(bus.clone());
        let mut tracker = StateTracker::new();

        engine
            .handle_command(2, 0, r#"{"state":"ON","brightness":35}"#)
            .await
            .unwrap();
        engine.sync_module(2, &mut tracker).await.unwrap();
        assert_eq!(
            bus.retained("dobiss/light/salon/state").as_deref(),
            Some(r#"{"state":"ON","brightness":35}"#)
        );

        engine.handle_command(2, 0, r#"{"state":"TOGGLE"}"#).await.unwrap();
        engine.sync_module(2, &mut tracker).await.unwrap();
        assert_eq!(
            bus.retained("dobiss/light/salon/state").as_deref(),
            Some(r#"{"state":"OFF","brightness":0}"#)
        );

        assert!(engine.handle_command(9, 0, r#"{"state":"ON"}"#).await.is_err());
        assert!(engine.handle_command(2, 0, "garbage").await.is_err());
        assert!(matches!(
            engine.handle_command(2, 0, r#"{"state":"DIM"}"#).await,
            Err(GatewayError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_brightness_is_scaled_for_sx() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![0x00]]));
        let protocol = Arc::new(SxClient::new(
            transport.clone(),
            vec![Module::new(2, ModuleType::Dimmer, ["nachthal"])],
        ));
        let engine = SyncEngine::new(protocol, Arc::new(MemoryBus::new()), EngineConfig::new("dobiss"));

        engine
            .handle_command(2, 0, r#"{"state":"ON","brightness":2}"#)
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(*sent[0].last().unwrap(), 20);
    }

    #[tokio::test]
    async fn test_discovery_covers_every_output() {
        let bus = Arc::new(MemoryBus::new());
        let engine = fake_engine(bus.clone());

        assert_eq!(engine.publish_discovery().await.unwrap(), 3);
        let payload = bus.retained("homeassistant/light/dobiss_2_0/config").unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["command_topic"], "dobiss/light/salon/set");
        assert_eq!(json["brightness_scale"], 100);
        assert_eq!(json["device"]["model"], "Fake");
    }

    #[tokio::test]
    async fn test_run_reacts_to_commands_and_stops() {
        let bus = Arc::new(MemoryBus::new());
        let engine = Arc::new(fake_engine(bus.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut observer = bus.observe();

        let handle = tokio::spawn(engine.clone().run(shutdown_rx));

        wait_for_subscription(&bus, "dobiss/light/wc/set").await;

        bus.publish("dobiss/light/wc/set", r#"{"state":"ON"}"#.into(), PublishOptions::default())
            .await
            .unwrap();

        loop {
            let message = observer.recv().await.unwrap();
            if message.topic == "dobiss/light/wc/state" && message.payload == r#"{"state":"ON"}"# {
                assert!(message.options.retain);
                break;
            }
        }

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_poll_waits_for_settle_delay() {
        let bus = Arc::new(MemoryBus::new());
        let engine = Arc::new(fake_engine(bus.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.clone().run(shutdown_rx));

        wait_for_subscription(&bus, "dobiss/light/salon/set").await;
        while bus.retained("dobiss/light/salon/state").is_none() {
            tokio::task::yield_now().await;
        }

        bus.publish(
            "dobiss/light/salon/set",
            r#"{"state":"ON","brightness":40}"#.into(),
            PublishOptions::default(),
        )
        .await
        .unwrap();

        // Dimmers settle for 2 s before the follow-up poll.
        assert_eq!(engine.protocol.module(2).unwrap().module.poll_delay(), Duration::from_millis(2000));
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(
            bus.retained("dobiss/light/salon/state").as_deref(),
            Some(r#"{"state":"OFF"}"#)
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            bus.retained("dobiss/light/salon/state").as_deref(),
            Some(r#"{"state":"ON","brightness":40}"#)
        );

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_catch_up_is_dropped_on_shutdown() {
        let bus = Arc::new(MemoryBus::new());
        let engine = Arc::new(fake_engine(bus.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.clone().run(shutdown_rx));

        wait_for_subscription(&bus, "dobiss/light/salon/set").await;
        while bus.retained("dobiss/light/salon/state").is_none() {
            tokio::task::yield_now().await;
        }

        bus.publish("dobiss/light/salon/set", r#"{"state":"ON"}"#.into(), PublishOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(engine.protocol.poll_module(2).await.unwrap()[0].powered);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // The catch-up poll was due at 2 s; nothing may publish after shutdown.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            bus.retained("dobiss/light/salon/state").as_deref(),
            Some(r#"{"state":"OFF"}"#)
        );
    }
}
