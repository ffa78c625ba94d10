//! ==============================================================================
//! status.rs - remote led / rgb commands over http polling
//! ==============================================================================
//!
//! purpose:
//!     a status service publishes `{"status":"ON","rgb":123}` (or `"led"`
//!     instead of `"status"`). two active-low buttons pull it on demand:
//!     - status button -> apply the led state
//!     - rgb button    -> apply the red channel duty
//!     after applying, the new value is optionally reported to a logging
//!     endpoint (`status=ON` / `rgb=123`). report failures are only logged.
//!
//! relationships:
//!     - used by: sampling.rs (polled once per loop tick), main.rs (startup sync)
//!     - uses: hal.rs (outputs), edge.rs (button debounce), query.rs (urls)
//!
//! ==============================================================================

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::StatusConfig;
use crate::edge::{Edge, EdgeDetector};
use crate::hal::HardwareProvider;
use crate::network::{nonce, NetworkLink};
use crate::query::{QueryBuilder, QueryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedState {
    On,
    Off,
}

impl LedState {
    pub fn as_str(self) -> &'static str {
        match self {
            LedState::On => "ON",
            LedState::Off => "OFF",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStatus {
    pub led: LedState,
    pub rgb: u8,
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("network not connected")]
    NetworkUnavailable,
    #[error("no status url configured")]
    NotConfigured,
    #[error("could not build request: {0}")]
    RequestBuildFailed(#[from] QueryError),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("status service returned HTTP {0}")]
    Http(u16),
    #[error("malformed status payload: {0}")]
    Malformed(String),
}

/// `status` wins over `led`; anything but ON/OFF (any case) is OFF;
/// `rgb` is clamped to 0..=255 and defaults to 0
pub fn parse_status(body: &str) -> Result<RemoteStatus, StatusError> {
    let doc: Value = serde_json::from_str(body).map_err(|e| StatusError::Malformed(e.to_string()))?;
    let obj = doc
        .as_object()
        .ok_or_else(|| StatusError::Malformed("expected a json object".to_string()))?;

    let raw = match obj.get("status") {
        Some(v) => v,
        None => obj.get("led").unwrap_or(&Value::Null),
    };
    let led = match raw.as_str().map(|s| s.trim().to_ascii_uppercase()) {
        Some(s) if s == "ON" => LedState::On,
        _ => LedState::Off,
    };

    let rgb = obj
        .get("rgb")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
        .clamp(0, 255) as u8;

    Ok(RemoteStatus { led, rgb })
}

#[derive(Clone)]
pub struct StatusClient {
    http: reqwest::Client,
    status_url: Option<String>,
    report_url: Option<String>,
    link: Arc<dyn NetworkLink>,
}

impl StatusClient {
    pub fn new(
        http: reqwest::Client,
        status_url: Option<String>,
        report_url: Option<String>,
        link: Arc<dyn NetworkLink>,
    ) -> Self {
        Self {
            http,
            status_url,
            report_url,
            link,
        }
    }

    pub async fn fetch(&self) -> Result<RemoteStatus, StatusError> {
        let base = self.status_url.as_deref().ok_or(StatusError::NotConfigured)?;
        if !self.link.connected() {
            return Err(StatusError::NetworkUnavailable);
        }

        let url = QueryBuilder::new(base).param("_", nonce()).build()?;
        let response = self.http.get(url).send().await?;
        let code = response.status().as_u16();
        if code != 200 {
            return Err(StatusError::Http(code));
        }
        let body = response.text().await?;
        tracing::debug!("Server JSON: {}", body.trim());
        parse_status(&body)
    }

    /// GET `<report_url>?<key>=<value>&_=<nonce>`; returns the http status
    pub async fn report(&self, key: &str, value: &str) -> Result<u16, StatusError> {
        let base = self.report_url.as_deref().ok_or(StatusError::NotConfigured)?;
        if !self.link.connected() {
            return Err(StatusError::NetworkUnavailable);
        }

        let url = QueryBuilder::new(base).param(key, value).param("_", nonce()).build()?;
        let response = self.http.get(url).send().await?;
        Ok(response.status().as_u16())
    }

    pub fn has_report_url(&self) -> bool {
        self.report_url.is_some()
    }
}

/// led + red channel outputs with their wiring polarity
pub struct StatusOutputs {
    hal: Arc<dyn HardwareProvider>,
    led_pin: u8,
    red_pin: u8,
    led_active_high: bool,
    common_anode: bool,
}

impl StatusOutputs {
    pub fn new(hal: Arc<dyn HardwareProvider>, config: &StatusConfig) -> Self {
        Self {
            hal,
            led_pin: config.led_pin,
            red_pin: config.red_pin,
            led_active_high: config.led_active_high,
            common_anode: config.common_anode,
        }
    }

    pub fn apply_led(&self, state: LedState) -> anyhow::Result<()> {
        let on = state == LedState::On;
        self.hal.digital_write(self.led_pin, on == self.led_active_high)
    }

    pub fn apply_red(&self, value: u8) -> anyhow::Result<()> {
        let duty = if self.common_anode { 255 - value } else { value };
        self.hal.analog_write(self.red_pin, duty)
    }

    pub fn apply(&self, status: RemoteStatus) -> anyhow::Result<()> {
        self.apply_led(status.led)?;
        self.apply_red(status.rgb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Status,
    Rgb,
}

#[derive(Debug)]
pub enum CommandOutcome {
    Applied { kind: CommandKind, status: RemoteStatus },
    FetchFailed { kind: CommandKind, error: StatusError },
    /// press did not survive the confirm delay
    Bounced { kind: CommandKind },
}

struct CommandButton {
    kind: CommandKind,
    pin: u8,
    detector: EdgeDetector,
}

/// the two command buttons plus everything needed to act on them
pub struct CommandButtons {
    hal: Arc<dyn HardwareProvider>,
    client: StatusClient,
    outputs: StatusOutputs,
    buttons: [CommandButton; 2],
    confirm: Duration,
}

impl CommandButtons {
    pub fn new(hal: Arc<dyn HardwareProvider>, client: StatusClient, config: &StatusConfig) -> Self {
        let window = Duration::from_millis(config.debounce_ms);
        Self {
            outputs: StatusOutputs::new(Arc::clone(&hal), config),
            hal,
            client,
            buttons: [
                CommandButton {
                    kind: CommandKind::Status,
                    pin: config.status_button_pin,
                    detector: EdgeDetector::new(window, true),
                },
                CommandButton {
                    kind: CommandKind::Rgb,
                    pin: config.rgb_button_pin,
                    detector: EdgeDetector::new(window, true),
                },
            ],
            confirm: Duration::from_millis(config.confirm_ms),
        }
    }

    /// fetch once and apply both outputs (boot-time sync)
    pub async fn sync(&self) -> Result<RemoteStatus, StatusError> {
        let status = self.client.fetch().await?;
        if let Err(e) = self.outputs.apply(status) {
            tracing::warn!("could not apply status outputs: {:#}", e);
        }
        tracing::info!(led = status.led.as_str(), rgb = status.rgb, "status synced");
        Ok(status)
    }

    /// poll the buttons in order and handle the first press
    ///
    /// buttons after a captured press are not polled this call, so their
    /// edge is still pending on the next one.
    pub async fn poll(&mut self) -> Option<CommandOutcome> {
        let mut pressed = None;
        for button in self.buttons.iter_mut() {
            let level = match self.hal.digital_read(button.pin) {
                Ok(level) => level,
                Err(e) => {
                    tracing::warn!(pin = button.pin, "command button read failed: {:#}", e);
                    continue;
                }
            };
            if button.detector.poll(level, Instant::now()) == Edge::FallingQualified {
                pressed = Some((button.kind, button.pin));
                break;
            }
        }

        let (kind, pin) = pressed?;
        Some(self.handle_press(kind, pin).await)
    }

    async fn handle_press(&self, kind: CommandKind, pin: u8) -> CommandOutcome {
        if !self.confirm.is_zero() {
            tokio::time::sleep(self.confirm).await;
            if self.hal.digital_read(pin).unwrap_or(true) {
                return CommandOutcome::Bounced { kind };
            }
        }

        let status = match self.client.fetch().await {
            Ok(s) => s,
            Err(error) => {
                tracing::warn!(?kind, "STATUS fetch failed: {}", error);
                return CommandOutcome::FetchFailed { kind, error };
            }
        };

        let (applied, key, value) = match kind {
            CommandKind::Status => (self.outputs.apply_led(status.led), "status", status.led.as_str().to_string()),
            CommandKind::Rgb => (self.outputs.apply_red(status.rgb), "rgb", status.rgb.to_string()),
        };
        if let Err(e) = applied {
            tracing::warn!(?kind, "could not drive output: {:#}", e);
        }
        tracing::info!(?kind, "Applied {}={}", key, value);

        if self.client.has_report_url() {
            match self.client.report(key, &value).await {
                Ok(code) => tracing::info!("report ({}={}) -> {}", key, value, code),
                Err(e) => tracing::warn!("report ({}={}) failed: {}", key, value, e),
            }
        }

        CommandOutcome::Applied { kind, status }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHal;

    #[test]
    fn test_parse_status_key() {
        let s = parse_status(r#"{"status":"on","rgb":123}"#).unwrap();
        assert_eq!(s, RemoteStatus { led: LedState::On, rgb: 123 });
    }

    #[test]
    fn test_parse_led_key_fallback() {
        let s = parse_status(r#"{"led":"ON"}"#).unwrap();
        assert_eq!(s, RemoteStatus { led: LedState::On, rgb: 0 });
    }

    #[test]
    fn test_status_key_wins_over_led() {
        let s = parse_status(r#"{"status":"OFF","led":"ON"}"#).unwrap();
        assert_eq!(s.led, LedState::Off);
    }

    #[test]
    fn test_unknown_state_defaults_off() {
        assert_eq!(parse_status(r#"{"status":"blink"}"#).unwrap().led, LedState::Off);
        assert_eq!(parse_status(r#"{"status":1}"#).unwrap().led, LedState::Off);
        assert_eq!(parse_status(r#"{}"#).unwrap().led, LedState::Off);
    }

    #[test]
    fn test_rgb_clamped() {
        assert_eq!(parse_status(r#"{"rgb":999}"#).unwrap().rgb, 255);
        assert_eq!(parse_status(r#"{"rgb":-4}"#).unwrap().rgb, 0);
        assert_eq!(parse_status(r#"{"rgb":"12"}"#).unwrap().rgb, 0);
        assert_eq!(parse_status(r#"{"rgb":12.9}"#).unwrap().rgb, 12);
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(parse_status("not json"), Err(StatusError::Malformed(_))));
        assert!(matches!(parse_status("[1,2]"), Err(StatusError::Malformed(_))));
    }

    #[test]
    fn test_outputs_respect_polarity() {
        let hal = Arc::new(MockHal::new());
        let config = StatusConfig {
            led_active_high: false,
            common_anode: true,
            ..StatusConfig::default()
        };
        let outputs = StatusOutputs::new(hal.clone(), &config);
        outputs.apply(RemoteStatus { led: LedState::On, rgb: 200 }).unwrap();
        assert_eq!(hal.digital_writes(), vec![(config.led_pin, false)]);
        assert_eq!(hal.analog_writes(), vec![(config.red_pin, 55)]);
    }

    #[tokio::test]
    async fn test_fetch_without_url_is_not_configured() {
        let client = StatusClient::new(reqwest::Client::new(), None, None, Arc::new(crate::network::AlwaysUp));
        assert!(matches!(client.fetch().await, Err(StatusError::NotConfigured)));
    }
}
