//! ==============================================================================
//! sensor.rs - rate-limited sensor readers
//! ==============================================================================
//!
//! purpose:
//!     wraps physical sensor access behind `read()`:
//!     - `DhtReader`: enforces the dht minimum interval between reads, retries
//!       a nan reading exactly once after a short grace period.
//!     - `LightReader`: one analog sample mapped to lux, no retry.
//!
//! timing:
//!     the minimum interval is measured from the last *successful* read and is
//!     honoured with `sleep_until`, so a press that comes too early is delayed,
//!     never dropped.
//!
//! ==============================================================================

use anyhow::Result as AnyResult;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::domain::{Reading, SensorKind};
use crate::hal::HardwareProvider;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SensorError {
    #[error("sensor did not respond: {0}")]
    Timeout(String),
    #[error("sensor driver failed: {0}")]
    Driver(String),
    #[error("sensor returned an invalid value")]
    InvalidValue,
}

#[derive(Debug, Clone)]
pub struct DhtTiming {
    pub min_interval: Duration,
    pub retry_grace: Duration,
    pub read_timeout: Duration,
}

impl Default for DhtTiming {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(2000),
            retry_grace: Duration::from_millis(150),
            read_timeout: Duration::from_secs(5),
        }
    }
}

pub struct DhtReader {
    hal: Arc<dyn HardwareProvider>,
    pin: u8,
    timing: DhtTiming,
    last_success: Option<Instant>,
    /// a read that outlived `read_timeout` and may still hold the pin
    in_flight: Option<JoinHandle<AnyResult<(f32, f32)>>>,
}

impl DhtReader {
    pub fn new(hal: Arc<dyn HardwareProvider>, pin: u8, timing: DhtTiming) -> Self {
        Self {
            hal,
            pin,
            timing,
            last_success: None,
            in_flight: None,
        }
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    pub async fn read(&mut self) -> Result<Reading, SensorError> {
        if let Some(last) = self.last_success {
            let ready_at = last + self.timing.min_interval;
            if Instant::now() < ready_at {
                tracing::debug!(pin = self.pin, "dht minimum interval not elapsed, waiting");
                tokio::time::sleep_until(ready_at).await;
            }
        }

        let (mut t, mut h) = self.acquire().await?;
        if t.is_nan() || h.is_nan() {
            tracing::debug!(pin = self.pin, "dht returned nan, retrying once");
            tokio::time::sleep(self.timing.retry_grace).await;
            (t, h) = self.acquire().await?;
        }

        if t.is_nan() || h.is_nan() {
            return Err(SensorError::InvalidValue);
        }

        self.last_success = Some(Instant::now());
        Ok(Reading::Climate {
            temperature_c: t,
            humidity: h,
        })
    }

    async fn acquire(&mut self) -> Result<(f32, f32), SensorError> {
        // never start a second read on the pin while an abandoned one runs
        if let Some(mut stale) = self.in_flight.take() {
            if !stale.is_finished() {
                tracing::debug!(pin = self.pin, "previous dht read still running, waiting");
                if tokio::time::timeout(self.timing.read_timeout, &mut stale).await.is_err() {
                    self.in_flight = Some(stale);
                    return Err(SensorError::Timeout("previous read still running".to_string()));
                }
            }
        }

        let hal = Arc::clone(&self.hal);
        let pin = self.pin;
        let mut task = tokio::task::spawn_blocking(move || hal.read_dht(pin));

        match tokio::time::timeout(self.timing.read_timeout, &mut task).await {
            Err(_) => {
                self.in_flight = Some(task);
                Err(SensorError::Timeout(format!("no answer within {:?}", self.timing.read_timeout)))
            }
            Ok(Err(join)) => Err(SensorError::Driver(format!("read task failed: {}", join))),
            Ok(Ok(Err(e))) => Err(SensorError::Driver(format!("{:#}", e))),
            Ok(Ok(Ok(pair))) => Ok(pair),
        }
    }
}

/// `lux = (1023 - raw) * 1000/1023`, floored at zero
///
/// inverse relation: a brighter room pulls the divider low.
pub fn lux_from_raw(raw: u16) -> f32 {
    let lux = (1023.0 - f32::from(raw)) * (1000.0 / 1023.0);
    lux.max(0.0)
}

pub struct LightReader {
    hal: Arc<dyn HardwareProvider>,
    channel: u8,
}

impl LightReader {
    pub fn new(hal: Arc<dyn HardwareProvider>, channel: u8) -> Self {
        Self { hal, channel }
    }

    pub fn read(&self) -> Result<Reading, SensorError> {
        let raw = self
            .hal
            .analog_read(self.channel)
            .map_err(|e| SensorError::Driver(format!("{:#}", e)))?;
        let lux = lux_from_raw(raw);
        tracing::debug!(raw, lux, "light sample");
        Ok(Reading::Light { lux })
    }
}

/// one channel's sensor
pub enum SensorSource {
    Climate(DhtReader),
    Light(LightReader),
}

impl SensorSource {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorSource::Climate(_) => SensorKind::Climate,
            SensorSource::Light(_) => SensorKind::Light,
        }
    }

    pub async fn read(&mut self) -> Result<Reading, SensorError> {
        match self {
            SensorSource::Climate(r) => r.read().await,
            SensorSource::Light(r) => r.read(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHal;

    fn timing(min_interval_ms: u64) -> DhtTiming {
        DhtTiming {
            min_interval: Duration::from_millis(min_interval_ms),
            retry_grace: Duration::from_millis(5),
            read_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_lux_endpoints() {
        assert_eq!(lux_from_raw(0), 1000.0);
        assert_eq!(lux_from_raw(1023), 0.0);
        assert_eq!(lux_from_raw(2000), 0.0);
        assert_eq!(lux_from_raw(200).round(), 804.0);
    }

    #[test]
    fn test_lux_formula_over_range() {
        for raw in 0..=1023u16 {
            let expected = ((1023 - raw) as f32 * 1000.0 / 1023.0).max(0.0);
            assert!((lux_from_raw(raw) - expected).abs() < 1e-3);
        }
        // higher code => less light
        assert!(lux_from_raw(100) > lux_from_raw(900));
    }

    #[tokio::test]
    async fn test_valid_read_first_try() {
        let hal = Arc::new(MockHal::new());
        hal.push_dht(21.7, 45.2);
        let mut reader = DhtReader::new(hal.clone(), 6, timing(0));
        let reading = reader.read().await.unwrap();
        assert_eq!(reading, Reading::Climate { temperature_c: 21.7, humidity: 45.2 });
        assert_eq!(hal.dht_reads(), 1);
        assert!(reader.last_success().is_some());
    }

    #[tokio::test]
    async fn test_nan_retried_once_then_ok() {
        let hal = Arc::new(MockHal::new());
        hal.push_dht(f32::NAN, 45.0);
        hal.push_dht(20.0, 45.0);
        let mut reader = DhtReader::new(hal.clone(), 6, timing(0));
        assert!(reader.read().await.is_ok());
        assert_eq!(hal.dht_reads(), 2);
    }

    #[tokio::test]
    async fn test_nan_twice_is_invalid_and_not_recorded() {
        let hal = Arc::new(MockHal::new());
        hal.push_dht(f32::NAN, 45.0);
        hal.push_dht(20.0, f32::NAN);
        hal.push_dht(20.0, 45.0);
        let mut reader = DhtReader::new(hal.clone(), 6, timing(0));
        assert_eq!(reader.read().await, Err(SensorError::InvalidValue));
        assert_eq!(hal.dht_reads(), 2);
        assert!(reader.last_success().is_none());
    }

    #[tokio::test]
    async fn test_driver_error_is_not_a_timeout() {
        let hal = Arc::new(MockHal::new());
        hal.push_dht_error("python3: command not found");
        let mut reader = DhtReader::new(hal, 6, timing(0));
        match reader.read().await {
            Err(SensorError::Driver(msg)) => assert!(msg.contains("python3")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hung_read_blocks_a_second_read() {
        let hal = Arc::new(MockHal::new());
        hal.set_dht_delay(Duration::from_millis(300));
        let mut reader = DhtReader::new(
            hal.clone(),
            6,
            DhtTiming {
                min_interval: Duration::ZERO,
                retry_grace: Duration::from_millis(5),
                read_timeout: Duration::from_millis(50),
            },
        );

        assert!(matches!(reader.read().await, Err(SensorError::Timeout(_))));
        // the first read is still sleeping in the driver
        match reader.read().await {
            Err(SensorError::Timeout(msg)) => assert!(msg.contains("previous read")),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(hal.dht_reads(), 1);

        hal.set_dht_delay(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(reader.read().await.is_ok());
        assert_eq!(hal.dht_reads(), 2);
    }

    #[tokio::test]
    async fn test_min_interval_enforced_between_successes() {
        let hal = Arc::new(MockHal::new());
        let mut reader = DhtReader::new(hal, 6, timing(150));
        reader.read().await.unwrap();
        let first = reader.last_success().unwrap();
        reader.read().await.unwrap();
        let second = reader.last_success().unwrap();
        assert!(second - first >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_light_reader_uses_channel() {
        let hal = Arc::new(MockHal::new());
        hal.set_analog(0, 200);
        let mut source = SensorSource::Light(LightReader::new(hal, 0));
        assert_eq!(source.kind(), SensorKind::Light);
        match source.read().await.unwrap() {
            Reading::Light { lux } => assert_eq!(lux.round(), 804.0),
            other => panic!("unexpected reading {:?}", other),
        }
    }
}
