//! ==============================================================================
//! domain.rs - readings, timestamps and telemetry records
//! ==============================================================================
//!
//! purpose:
//!     the value types that flow through one sampling cycle:
//!     sensor reading -> normalized time -> telemetry record -> request.
//!
//! invariants:
//!     - a `Reading` only exists for a valid acquisition (nan never escapes
//!       the sensor reader).
//!     - a `NormalizedTime` is never empty.
//!     - a `TelemetryRecord` can only be built from those two, so a record
//!       never carries an invalid value or a missing timestamp.
//!
//! ==============================================================================

use std::fmt;

/// what kind of sensor produced a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// dht-class temperature + humidity
    Climate,
    /// photoresistor on an analog input
    Light,
}

/// a single valid acquisition
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Climate { temperature_c: f32, humidity: f32 },
    Light { lux: f32 },
}

impl Reading {
    pub fn kind(&self) -> SensorKind {
        match self {
            Reading::Climate { .. } => SensorKind::Climate,
            Reading::Light { .. } => SensorKind::Light,
        }
    }

    /// ordered sink fields for this reading
    ///
    /// climate values keep two decimals, lux is rounded to a whole number.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match *self {
            Reading::Climate { temperature_c, humidity } => vec![
                ("temp_c", format!("{:.2}", temperature_c)),
                ("humidity", format!("{:.2}", humidity)),
            ],
            Reading::Light { lux } => vec![("lux_value", format!("{}", lux.round() as i64))],
        }
    }
}

/// canonical `YYYY-MM-DD HH:MM:SS` timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTime(String);

impl NormalizedTime {
    /// wraps an already-normalized string; `None` for the empty sentinel
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// one reading plus timestamp, ready for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    node_name: String,
    timestamp: NormalizedTime,
    fields: Vec<(&'static str, String)>,
}

impl TelemetryRecord {
    pub fn new(node_name: impl Into<String>, reading: &Reading, timestamp: NormalizedTime) -> Self {
        Self {
            node_name: node_name.into(),
            timestamp,
            fields: reading.fields(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn timestamp(&self) -> &NormalizedTime {
        &self.timestamp
    }

    pub fn fields(&self) -> &[(&'static str, String)] {
        &self.fields
    }

    /// full parameter list in sink order:
    /// node_name, sensor fields, time_received
    pub fn params(&self) -> Vec<(&str, &str)> {
        let mut params = Vec::with_capacity(self.fields.len() + 2);
        params.push(("node_name", self.node_name.as_str()));
        params.extend(self.fields.iter().map(|(k, v)| (*k, v.as_str())));
        params.push(("time_received", self.timestamp.as_str()));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_climate_fields_two_decimals() {
        let reading = Reading::Climate { temperature_c: 21.7, humidity: 45.2 };
        assert_eq!(
            reading.fields(),
            vec![("temp_c", "21.70".to_string()), ("humidity", "45.20".to_string())]
        );
    }

    #[test]
    fn test_light_field_rounds() {
        let reading = Reading::Light { lux: 977.5 };
        assert_eq!(reading.fields(), vec![("lux_value", "978".to_string())]);
        assert_eq!(reading.kind(), SensorKind::Light);
    }

    #[test]
    fn test_empty_time_is_not_a_value() {
        assert!(NormalizedTime::new("").is_none());
        assert_eq!(NormalizedTime::new("2025-01-01 12:00:00").unwrap().as_str(), "2025-01-01 12:00:00");
    }

    #[test]
    fn test_record_param_order() {
        let time = NormalizedTime::new("2025-01-01 12:00:00").unwrap();
        let record = TelemetryRecord::new(
            "node_2",
            &Reading::Climate { temperature_c: 21.7, humidity: 45.2 },
            time,
        );
        let keys: Vec<&str> = record.params().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["node_name", "temp_c", "humidity", "time_received"]);
    }
}
