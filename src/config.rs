//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `agent.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - NetworkConfig: service urls, link interface, http timeout, tls mode.
//!     - TimingConfig: debounce, dht pacing, time-sync retry, loop period.
//!     - ChannelConfig: one entry per sampling input (trigger + sensor).
//!     - delivery: RetryPolicy for the telemetry sink (one attempt by default).
//!     - StatusConfig: remote led/rgb command buttons and outputs.
//!     - MqttConfig: optional pub/sub bridge.
//!     - LoggingConfig: default log filter.
//!
//! ==============================================================================

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::SensorKind;
use crate::query::QueryBuilder;
use crate::retry::RetryPolicy;
use crate::sensor::DhtTiming;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub network: NetworkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub delivery: RetryPolicy,
    #[serde(default)]
    pub status: Option<StatusConfig>,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    pub time_api_url: String,
    pub sink_url: String,
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default)]
    pub report_url: Option<String>,
    /// interface whose operstate gates network use; unset = always up
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub insecure_tls: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimingConfig {
    pub debounce_ms: u64,
    pub dht_min_interval_ms: u64,
    pub dht_retry_grace_ms: u64,
    pub dht_read_timeout_ms: u64,
    pub loop_interval_ms: u64,
    pub time_retry: RetryPolicy,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            dht_min_interval_ms: 2000,
            dht_retry_grace_ms: 150,
            dht_read_timeout_ms: 5000,
            loop_interval_ms: 50,
            time_retry: RetryPolicy::unbounded(Duration::from_millis(100)),
        }
    }
}

impl TimingConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }

    pub fn dht(&self) -> DhtTiming {
        DhtTiming {
            min_interval: Duration::from_millis(self.dht_min_interval_ms),
            retry_grace: Duration::from_millis(self.dht_retry_grace_ms),
            read_timeout: Duration::from_millis(self.dht_read_timeout_ms),
        }
    }
}

/// which qualifying edge starts a sampling cycle
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// high -> low (active-low press)
    Falling,
    /// low -> high
    Rising,
    Any,
}

impl Trigger {
    /// level the input rests at before the first event
    pub fn idle_level(self) -> bool {
        !matches!(self, Trigger::Rising)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    pub name: String,
    pub node_name: String,
    pub input_pin: u8,
    pub trigger: Trigger,
    #[serde(default)]
    pub idle_level: Option<bool>,
    pub sensor: SensorKind,
    /// gpio pin for climate, adc channel for light
    pub sensor_pin: u8,
}

impl ChannelConfig {
    pub fn idle_level(&self) -> bool {
        self.idle_level.unwrap_or_else(|| self.trigger.idle_level())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StatusConfig {
    pub status_button_pin: u8,
    pub rgb_button_pin: u8,
    pub led_pin: u8,
    pub red_pin: u8,
    pub led_active_high: bool,
    pub common_anode: bool,
    pub debounce_ms: u64,
    /// press must still read low after this long to count
    pub confirm_ms: u64,
    pub sync_on_start: bool,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            status_button_pin: 13,
            rgb_button_pin: 1,
            led_pin: 14,
            red_pin: 12,
            led_active_high: true,
            common_anode: false,
            debounce_ms: 150,
            confirm_ms: 30,
            sync_on_start: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub command_topic: String,
    pub publish_topic: String,
    pub led_pin: u8,
    pub analog_channel: u8,
    pub analog_interval_ms: u64,
    pub switch_pin: u8,
    pub switch_hold_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            client_id: "telemetry-agent".to_string(),
            keep_alive_secs: 15,
            command_topic: "telemetry/agent/in".to_string(),
            publish_topic: "telemetry/agent/out".to_string(),
            led_pin: 14,
            analog_channel: 1,
            analog_interval_ms: 15_000,
            switch_pin: 12,
            switch_hold_ms: 5000,
            reconnect_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig {
            name: "button".to_string(),
            node_name: "node_2".to_string(),
            input_pin: 5,
            trigger: Trigger::Falling,
            idle_level: None,
            sensor: SensorKind::Climate,
            sensor_pin: 6,
        },
        ChannelConfig {
            name: "tilt".to_string(),
            node_name: "node_1".to_string(),
            input_pin: 7,
            trigger: Trigger::Rising,
            idle_level: None,
            sensor: SensorKind::Light,
            sensor_pin: 0,
        },
    ]
}

impl AgentConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: AgentConfig =
            toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// `AGENT_CONFIG` wins over the usual locations.
    pub fn load_or_default() -> Self {
        let mut paths = Vec::new();
        if let Ok(p) = std::env::var("AGENT_CONFIG") {
            paths.push(PathBuf::from(p));
        }
        paths.push(PathBuf::from("config").join("agent.toml"));
        paths.push(PathBuf::from("..").join("config").join("agent.toml"));

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        tracing::info!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("[CONFIG] Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        tracing::warn!("[CONFIG] No config file found - using defaults");
        Self::default()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.channels.is_empty() {
            anyhow::bail!("at least one [[channels]] entry is required");
        }
        let mut names = HashSet::new();
        for ch in &self.channels {
            if ch.name.is_empty() || ch.node_name.is_empty() {
                anyhow::bail!("channel names and node names must not be empty");
            }
            if !names.insert(ch.name.as_str()) {
                anyhow::bail!("duplicate channel name '{}'", ch.name);
            }
        }
        let request_targets = [
            ("network.sink_url", Some(&self.network.sink_url)),
            ("network.status_url", self.network.status_url.as_ref()),
            ("network.report_url", self.network.report_url.as_ref()),
        ];
        for (key, url) in request_targets {
            if let Some(url) = url {
                QueryBuilder::new(url.as_str())
                    .build()
                    .map_err(|e| anyhow::anyhow!("{}: {}", key, e))?;
            }
        }
        if self.timing.time_retry.interval_ms == 0 && self.timing.time_retry.is_unbounded() {
            anyhow::bail!("timing.time_retry.interval_ms must be > 0 when retrying forever");
        }
        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        tracing::info!("┌─────────────────────────────────────────┐");
        tracing::info!("│          AGENT CONFIGURATION            │");
        tracing::info!("├─────────────────────────────────────────┤");
        tracing::info!("│ Time API: {}", self.network.time_api_url);
        tracing::info!("│ Sink: {}", self.network.sink_url);
        tracing::info!("│ Debounce: {}ms", self.timing.debounce_ms);
        for ch in &self.channels {
            tracing::info!(
                "│ Channel {}: pin {} ({:?}) -> {:?} as {}",
                ch.name, ch.input_pin, ch.trigger, ch.sensor, ch.node_name
            );
        }
        tracing::info!("│ Delivery attempts: {}", self.delivery.max_attempts);
        tracing::info!("│ Status commands: {}", if self.status.is_some() { "on" } else { "off" });
        tracing::info!("│ MQTT: {}", self.mqtt.as_ref().map(|m| m.host.as_str()).unwrap_or("off"));
        tracing::info!("│ Log Level: {}", self.logging.level);
        tracing::info!("└─────────────────────────────────────────┘");
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                time_api_url: "https://timeapi.io/api/Time/current/zone?timeZone=UTC".to_string(),
                sink_url: "http://localhost:8080/insert".to_string(),
                status_url: None,
                report_url: None,
                interface: None,
                request_timeout_ms: default_request_timeout_ms(),
                insecure_tls: false,
            },
            timing: TimingConfig::default(),
            channels: default_channels(),
            delivery: RetryPolicy::once(),
            status: None,
            mqtt: None,
            logging: LoggingConfig::default(),
        }
    }
}
