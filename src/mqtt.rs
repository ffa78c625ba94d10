//! ==============================================================================
//! mqtt.rs - publish/subscribe bridge
//! ==============================================================================
//!
//! purpose:
//!     - command topic: "1" drives the led high, "0" drives it low.
//!     - publish topic: the analog sample every `analog_interval_ms`, and a
//!       "1" when the switch is released followed by a single "0" once
//!       `switch_hold_ms` has passed.
//!
//! structure:
//!     the rumqttc event loop runs in its own task (it must be polled for the
//!     client to make progress) and re-subscribes on every ConnAck. the
//!     publisher side is a plain ticker. session problems are logged and
//!     retried after `reconnect_delay_ms`; nothing here affects the
//!     telemetry pipeline.
//!
//! ==============================================================================

use anyhow::Result;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::MqttConfig;
use crate::edge::{Edge, EdgeDetector};
use crate::hal::HardwareProvider;

const SWITCH_DEBOUNCE: Duration = Duration::from_millis(50);
const SWITCH_POLL: Duration = Duration::from_millis(50);

/// "1" -> Some(true), "0" -> Some(false), anything else -> None
pub fn parse_command(payload: &[u8]) -> Option<bool> {
    match std::str::from_utf8(payload).map(str::trim) {
        Ok("1") => Some(true),
        Ok("0") => Some(false),
        _ => None,
    }
}

/// release-then-reset marker for the publish topic
pub struct ReleaseMarker {
    detector: EdgeDetector,
    hold: Duration,
    reset_at: Option<Instant>,
}

impl ReleaseMarker {
    pub fn new(hold: Duration) -> Self {
        Self {
            detector: EdgeDetector::new(SWITCH_DEBOUNCE, true),
            hold,
            reset_at: None,
        }
    }

    /// payloads to publish for this poll, in order
    pub fn poll(&mut self, level: bool, now: Instant) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.detector.poll(level, now) == Edge::RisingQualified {
            out.push("1");
            self.reset_at = Some(now + self.hold);
        }
        if let Some(at) = self.reset_at {
            if now >= at {
                out.push("0");
                self.reset_at = None;
            }
        }
        out
    }
}

pub struct MqttBridge {
    config: MqttConfig,
    hal: Arc<dyn HardwareProvider>,
}

impl MqttBridge {
    pub fn new(config: MqttConfig, hal: Arc<dyn HardwareProvider>) -> Self {
        Self { config, hal }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            format!("{}-{:04x}", self.config.client_id, std::process::id() & 0xffff),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs.max(5)));
        options
    }

    /// runs until the task is dropped
    pub async fn run(self) -> Result<()> {
        let (client, eventloop) = AsyncClient::new(self.options(), 10);
        tracing::info!(host = %self.config.host, port = self.config.port, "mqtt bridge starting");

        let events = tokio::spawn(drive_events(
            eventloop,
            client.clone(),
            self.config.clone(),
            Arc::clone(&self.hal),
        ));

        let result = self.publish_loop(&client).await;
        events.abort();
        result
    }

    async fn publish_loop(&self, client: &AsyncClient) -> Result<()> {
        let topic = self.config.publish_topic.clone();
        let mut marker = ReleaseMarker::new(Duration::from_millis(self.config.switch_hold_ms));
        let mut analog = tokio::time::interval(Duration::from_millis(self.config.analog_interval_ms.max(1)));
        let mut switch = tokio::time::interval(SWITCH_POLL);

        loop {
            tokio::select! {
                _ = analog.tick() => {
                    match self.hal.analog_read(self.config.analog_channel) {
                        Ok(raw) => {
                            tracing::info!("Publishing analog value: {}", raw);
                            if let Err(e) = client.publish(&topic, QoS::AtMostOnce, false, raw.to_string()).await {
                                tracing::warn!("mqtt publish failed: {}", e);
                            }
                        }
                        Err(e) => tracing::warn!("analog read failed: {:#}", e),
                    }
                }
                _ = switch.tick() => {
                    let level = match self.hal.digital_read(self.config.switch_pin) {
                        Ok(level) => level,
                        Err(e) => {
                            tracing::warn!("switch read failed: {:#}", e);
                            continue;
                        }
                    };
                    for payload in marker.poll(level, Instant::now()) {
                        tracing::info!("switch marker -> {}", payload);
                        if let Err(e) = client.publish(&topic, QoS::AtMostOnce, false, payload).await {
                            tracing::warn!("mqtt publish failed: {}", e);
                        }
                    }
                }
            }
        }
    }
}

async fn drive_events(mut eventloop: EventLoop, client: AsyncClient, config: MqttConfig, hal: Arc<dyn HardwareProvider>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("mqtt connected, subscribing to {}", config.command_topic);
                if let Err(e) = client.subscribe(&config.command_topic, QoS::AtMostOnce).await {
                    tracing::warn!("mqtt subscribe failed: {}", e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(msg))) => {
                if msg.topic != config.command_topic {
                    continue;
                }
                match parse_command(&msg.payload) {
                    Some(level) => {
                        tracing::info!("LED {} (via MQTT)", if level { "ON" } else { "OFF" });
                        if let Err(e) = hal.digital_write(config.led_pin, level) {
                            tracing::warn!("led write failed: {:#}", e);
                        }
                    }
                    None => tracing::debug!("ignoring command payload {:?}", msg.payload),
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("mqtt connection error: {}; retrying in {}ms", e, config.reconnect_delay_ms);
                tokio::time::sleep(Duration::from_millis(config.reconnect_delay_ms)).await;
            }
        }
    }
}
