//! ==============================================================================
//! sampling.rs - the sampling loop
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     polls every channel's input once per tick; a qualifying edge runs that
//!     channel's cycle to completion before the next input is looked at:
//!
//!         Idle -> Acquiring -> TimeSyncing -> Transmitting -> Idle
//!
//!     a sensor failure or a delivery failure drops straight back to Idle.
//!     time sync blocks (unbounded policy) until the time service answers.
//!
//! state:
//!     the only thing carried between ticks is owned by each channel:
//!     its edge detector and its sensor reader (dht last-success time).
//!
//! relationships:
//!     - uses: edge.rs, sensor.rs, timesync.rs, transmit.rs, status.rs
//!     - used by: main.rs
//! ```
//!
//! ==============================================================================

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{AgentConfig, ChannelConfig, Trigger};
use crate::domain::{SensorKind, TelemetryRecord};
use crate::edge::{Edge, EdgeDetector};
use crate::hal::HardwareProvider;
use crate::network::NetworkLink;
use crate::retry::RetryPolicy;
use crate::sensor::{DhtReader, DhtTiming, LightReader, SensorError, SensorSource};
use crate::status::{CommandButtons, StatusClient};
use crate::timesync::TimeClient;
use crate::transmit::{DeliveryError, DeliveryResult, Transmitter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Acquiring,
    TimeSyncing,
    Transmitting,
}

#[derive(Debug)]
pub enum CycleOutcome {
    NoEvent,
    Delivered(DeliveryResult),
    SensorInvalid(SensorError),
    /// only reachable with a bounded time-retry policy
    TimeUnavailable,
    NetworkUnavailable,
    DeliveryFailed(DeliveryError),
}

impl Trigger {
    pub fn accepts(self, edge: Edge) -> bool {
        match (self, edge) {
            (_, Edge::None) => false,
            (Trigger::Any, _) => true,
            (Trigger::Falling, Edge::FallingQualified) => true,
            (Trigger::Rising, Edge::RisingQualified) => true,
            _ => false,
        }
    }
}

pub struct Channel {
    name: String,
    node_name: String,
    input_pin: u8,
    trigger: Trigger,
    detector: EdgeDetector,
    sensor: SensorSource,
    state: ChannelState,
}

impl Channel {
    pub fn new(
        name: impl Into<String>,
        node_name: impl Into<String>,
        input_pin: u8,
        trigger: Trigger,
        detector: EdgeDetector,
        sensor: SensorSource,
    ) -> Self {
        Self {
            name: name.into(),
            node_name: node_name.into(),
            input_pin,
            trigger,
            detector,
            sensor,
            state: ChannelState::Idle,
        }
    }

    pub fn from_config(
        config: &ChannelConfig,
        hal: &Arc<dyn HardwareProvider>,
        debounce: Duration,
        dht: DhtTiming,
    ) -> Self {
        let sensor = match config.sensor {
            SensorKind::Climate => SensorSource::Climate(DhtReader::new(Arc::clone(hal), config.sensor_pin, dht)),
            SensorKind::Light => SensorSource::Light(LightReader::new(Arc::clone(hal), config.sensor_pin)),
        };
        Self::new(
            config.name.clone(),
            config.node_name.clone(),
            config.input_pin,
            config.trigger,
            EdgeDetector::new(debounce, config.idle_level()),
            sensor,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    fn enter(&mut self, state: ChannelState) {
        tracing::trace!(channel = %self.name, from = ?self.state, to = ?state, "channel state");
        self.state = state;
    }
}

/// the network half of a cycle, shared by all channels
#[derive(Clone)]
pub struct Pipeline {
    pub time: TimeClient,
    pub time_policy: RetryPolicy,
    pub transmitter: Transmitter,
    pub delivery_policy: RetryPolicy,
}

impl Pipeline {
    async fn run(&self, channel: &mut Channel) -> CycleOutcome {
        channel.enter(ChannelState::Acquiring);
        let reading = match channel.sensor.read().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(channel = %channel.name, "{:?} read failed: {}", channel.sensor.kind(), e);
                channel.enter(ChannelState::Idle);
                return CycleOutcome::SensorInvalid(e);
            }
        };
        tracing::debug!(channel = %channel.name, ?reading, "reading acquired");

        channel.enter(ChannelState::TimeSyncing);
        let timestamp = match self.time.sync(&self.time_policy).await {
            Some(t) => t,
            None => {
                tracing::warn!(channel = %channel.name, "time service unavailable, reading dropped");
                channel.enter(ChannelState::Idle);
                return CycleOutcome::TimeUnavailable;
            }
        };

        channel.enter(ChannelState::Transmitting);
        let record = TelemetryRecord::new(channel.node_name.as_str(), &reading, timestamp);
        let outcome = match self.transmitter.deliver(&record, &self.delivery_policy).await {
            Ok(result) => {
                tracing::info!(
                    channel = %channel.name,
                    node = record.node_name(),
                    "Server response ({}): {}",
                    result.http_status,
                    result.body.trim()
                );
                CycleOutcome::Delivered(result)
            }
            Err(DeliveryError::NetworkUnavailable) => {
                tracing::warn!(channel = %channel.name, "network not connected, reading dropped");
                CycleOutcome::NetworkUnavailable
            }
            Err(e) => {
                tracing::warn!(channel = %channel.name, "delivery failed, reading dropped: {}", e);
                CycleOutcome::DeliveryFailed(e)
            }
        };
        channel.enter(ChannelState::Idle);
        outcome
    }
}

pub struct SamplingLoop {
    hal: Arc<dyn HardwareProvider>,
    channels: Vec<Channel>,
    pipeline: Pipeline,
    commands: Option<CommandButtons>,
    interval: Duration,
}

impl SamplingLoop {
    pub fn new(hal: Arc<dyn HardwareProvider>, channels: Vec<Channel>, pipeline: Pipeline, interval: Duration) -> Self {
        Self {
            hal,
            channels,
            pipeline,
            commands: None,
            interval,
        }
    }

    pub fn with_commands(mut self, commands: CommandButtons) -> Self {
        self.commands = Some(commands);
        self
    }

    /// wire everything from the config file
    pub fn from_config(
        config: &AgentConfig,
        hal: Arc<dyn HardwareProvider>,
        link: Arc<dyn NetworkLink>,
        http: reqwest::Client,
    ) -> Self {
        let debounce = config.timing.debounce();
        let channels = config
            .channels
            .iter()
            .map(|c| Channel::from_config(c, &hal, debounce, config.timing.dht()))
            .collect();

        let pipeline = Pipeline {
            time: TimeClient::new(http.clone(), config.network.time_api_url.clone(), Arc::clone(&link)),
            time_policy: config.timing.time_retry.clone(),
            transmitter: Transmitter::new(http.clone(), config.network.sink_url.clone(), Arc::clone(&link)),
            delivery_policy: config.delivery.clone(),
        };

        let mut sampling = Self::new(Arc::clone(&hal), channels, pipeline, config.timing.loop_interval());
        if let Some(status) = &config.status {
            let client = StatusClient::new(
                http,
                config.network.status_url.clone(),
                config.network.report_url.clone(),
                link,
            );
            sampling = sampling.with_commands(CommandButtons::new(hal, client, status));
        }
        sampling
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn commands(&self) -> Option<&CommandButtons> {
        self.commands.as_ref()
    }

    /// one pass over every input; returns the cycles that actually ran
    pub async fn tick(&mut self) -> Vec<(String, CycleOutcome)> {
        let mut ran = Vec::new();

        for channel in self.channels.iter_mut() {
            let level = match self.hal.digital_read(channel.input_pin) {
                Ok(level) => level,
                Err(e) => {
                    tracing::warn!(channel = %channel.name, "input read failed: {:#}", e);
                    continue;
                }
            };

            let edge = channel.detector.poll(level, Instant::now());
            if !channel.trigger.accepts(edge) {
                continue;
            }

            tracing::info!(channel = %channel.name, ?edge, "qualifying edge");
            let outcome = self.pipeline.run(channel).await;
            ran.push((channel.name.clone(), outcome));
        }

        if let Some(commands) = self.commands.as_mut() {
            commands.poll().await;
        }

        ran
    }

    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(
            channels = self.channels.len(),
            interval_ms = self.interval.as_millis() as u64,
            "sampling loop started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHal;
    use crate::network::ManualLink;

    fn offline_pipeline() -> Pipeline {
        let link: Arc<dyn NetworkLink> = Arc::new(ManualLink::new(false));
        let http = reqwest::Client::new();
        Pipeline {
            time: TimeClient::new(http.clone(), "http://127.0.0.1:9/time", Arc::clone(&link)),
            time_policy: RetryPolicy::attempts(2, Duration::from_millis(1)),
            transmitter: Transmitter::new(http, "http://127.0.0.1:9/insert", link),
            delivery_policy: RetryPolicy::once(),
        }
    }

    fn button_channel(hal: &Arc<MockHal>) -> Channel {
        let hal: Arc<dyn HardwareProvider> = hal.clone();
        Channel::new(
            "button",
            "node_2",
            5,
            Trigger::Falling,
            EdgeDetector::new(Duration::from_millis(50), true),
            SensorSource::Climate(DhtReader::new(
                hal,
                6,
                DhtTiming {
                    min_interval: Duration::ZERO,
                    retry_grace: Duration::from_millis(1),
                    read_timeout: Duration::from_secs(1),
                },
            )),
        )
    }

    #[test]
    fn test_trigger_accepts() {
        assert!(Trigger::Falling.accepts(Edge::FallingQualified));
        assert!(!Trigger::Falling.accepts(Edge::RisingQualified));
        assert!(Trigger::Rising.accepts(Edge::RisingQualified));
        assert!(Trigger::Any.accepts(Edge::FallingQualified));
        assert!(!Trigger::Any.accepts(Edge::None));
    }

    #[tokio::test]
    async fn test_no_edge_no_cycle() {
        let hal = Arc::new(MockHal::new());
        let mut sampling = SamplingLoop::new(hal.clone(), vec![button_channel(&hal)], offline_pipeline(), Duration::from_millis(1));
        assert!(sampling.tick().await.is_empty());
        assert_eq!(hal.dht_reads(), 0);
    }

    #[tokio::test]
    async fn test_invalid_sensor_returns_to_idle() {
        let hal = Arc::new(MockHal::new());
        hal.push_dht(f32::NAN, 1.0);
        hal.push_dht(f32::NAN, 1.0);
        let mut sampling = SamplingLoop::new(hal.clone(), vec![button_channel(&hal)], offline_pipeline(), Duration::from_millis(1));

        hal.set_level(5, false);
        let ran = sampling.tick().await;
        assert_eq!(ran.len(), 1);
        assert!(matches!(ran[0].1, CycleOutcome::SensorInvalid(SensorError::InvalidValue)));
        assert_eq!(sampling.channels()[0].state(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn test_bounded_time_policy_gives_up_offline() {
        let hal = Arc::new(MockHal::new());
        let mut sampling = SamplingLoop::new(hal.clone(), vec![button_channel(&hal)], offline_pipeline(), Duration::from_millis(1));

        hal.set_level(5, false);
        let ran = sampling.tick().await;
        assert!(matches!(ran[0].1, CycleOutcome::TimeUnavailable));
        assert_eq!(sampling.channels()[0].state(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn test_release_does_not_trigger_press_channel() {
        let hal = Arc::new(MockHal::new());
        let mut sampling = SamplingLoop::new(hal.clone(), vec![button_channel(&hal)], offline_pipeline(), Duration::from_millis(1));
        hal.set_level(5, false);
        sampling.tick().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        hal.set_level(5, true);
        assert!(sampling.tick().await.is_empty());
    }
}
