//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for the agent's I/O capability set
//!     (digital read/write, analog read/write, dht read).
//!     abstracts away the difference between running on a real Raspberry Pi
//!     (using `rppal`) and a development machine or test (using `MockHal`).
//!
//! ranges:
//!     - digital: true = high, false = low
//!     - analog in: 0..=1023 (10-bit adc)
//!     - analog out: 0..=255 (8-bit pwm)
//!     - dht: (celsius, relative humidity), nan marks an invalid value
//!
//! relationships:
//!     - used by: sensor.rs (dht / light readers), sampling.rs (input polling),
//!       status.rs and mqtt.rs (led / red channel output)
//!     - uses: rppal (on feature="hardware"), gpio.rs (dht subprocess, mcp3008 framing)
//!
//! ==============================================================================

use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub trait HardwareProvider: Send + Sync {
    fn digital_read(&self, pin: u8) -> Result<bool>;
    fn analog_read(&self, channel: u8) -> Result<u16>;
    fn digital_write(&self, pin: u8, level: bool) -> Result<()>;
    fn analog_write(&self, pin: u8, value: u8) -> Result<()>;
    fn read_dht(&self, pin: u8) -> Result<(f32, f32)>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ==============================================================================================
// MOCK IMPLEMENTATION (development machines and tests)
// ==============================================================================================

#[derive(Default)]
struct MockState {
    levels: HashMap<u8, bool>,
    analog: HashMap<u8, u16>,
    dht_queue: VecDeque<Result<(f32, f32), String>>,
    dht_reads: usize,
    dht_delay: Duration,
    digital_writes: Vec<(u8, bool)>,
    analog_writes: Vec<(u8, u8)>,
}

/// scriptable in-memory hardware
///
/// unset digital pins read high (pull-up idle), unset analog channels read
/// 512, and an empty dht queue yields a fixed plausible reading.
#[derive(Default)]
pub struct MockHal {
    state: Mutex<MockState>,
}

impl MockHal {
    pub fn new() -> Self {
        tracing::info!("Using MOCK HAL (No hardware access)");
        Self::default()
    }

    pub fn set_level(&self, pin: u8, level: bool) {
        lock(&self.state).levels.insert(pin, level);
    }

    pub fn set_analog(&self, channel: u8, raw: u16) {
        lock(&self.state).analog.insert(channel, raw);
    }

    /// queue one dht result; nan values simulate a bad read
    pub fn push_dht(&self, temperature_c: f32, humidity: f32) {
        lock(&self.state).dht_queue.push_back(Ok((temperature_c, humidity)));
    }

    /// queue one dht read that errors out (sensor not responding)
    pub fn push_dht_error(&self, message: &str) {
        lock(&self.state).dht_queue.push_back(Err(message.to_string()));
    }

    /// every dht read blocks this long before answering (a hung driver)
    pub fn set_dht_delay(&self, delay: Duration) {
        lock(&self.state).dht_delay = delay;
    }

    pub fn dht_reads(&self) -> usize {
        lock(&self.state).dht_reads
    }

    pub fn digital_writes(&self) -> Vec<(u8, bool)> {
        lock(&self.state).digital_writes.clone()
    }

    pub fn analog_writes(&self) -> Vec<(u8, u8)> {
        lock(&self.state).analog_writes.clone()
    }
}

impl HardwareProvider for MockHal {
    fn digital_read(&self, pin: u8) -> Result<bool> {
        Ok(lock(&self.state).levels.get(&pin).copied().unwrap_or(true))
    }

    fn analog_read(&self, channel: u8) -> Result<u16> {
        Ok(lock(&self.state).analog.get(&channel).copied().unwrap_or(512))
    }

    fn digital_write(&self, pin: u8, level: bool) -> Result<()> {
        tracing::debug!("[MOCK GPIO] Pin {} write {}", pin, level);
        let mut state = lock(&self.state);
        state.levels.insert(pin, level);
        state.digital_writes.push((pin, level));
        Ok(())
    }

    fn analog_write(&self, pin: u8, value: u8) -> Result<()> {
        tracing::debug!("[MOCK PWM] Pin {} duty {}", pin, value);
        lock(&self.state).analog_writes.push((pin, value));
        Ok(())
    }

    fn read_dht(&self, pin: u8) -> Result<(f32, f32)> {
        tracing::debug!("[MOCK DHT] Reading pin {}", pin);
        let delay = {
            let mut state = lock(&self.state);
            state.dht_reads += 1;
            state.dht_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        match lock(&self.state).dht_queue.pop_front() {
            Some(Ok(pair)) => Ok(pair),
            Some(Err(msg)) => Err(anyhow::anyhow!(msg)),
            None => Ok((25.0, 50.0)),
        }
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================

#[cfg(feature = "hardware")]
pub use rpi::RpiHal;

#[cfg(feature = "hardware")]
mod rpi {
    use super::{lock, HardwareProvider};
    use crate::gpio;
    use anyhow::Result;
    use rppal::gpio::{Gpio, InputPin, Level, OutputPin};
    use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
    use std::collections::HashMap;
    use std::sync::Mutex;

    const PWM_FREQUENCY_HZ: f64 = 1000.0;

    pub struct RpiHal {
        gpio: Gpio,
        spi: Mutex<Spi>,
        inputs: Mutex<HashMap<u8, InputPin>>,
        outputs: Mutex<HashMap<u8, OutputPin>>,
    }

    impl RpiHal {
        pub fn new() -> Result<Self> {
            tracing::info!("Using REAL HARDWARE HAL (rppal)");
            Ok(Self {
                gpio: Gpio::new()?,
                spi: Mutex::new(Spi::new(Bus::Spi0, SlaveSelect::Ss0, 1_000_000, Mode::Mode0)?),
                inputs: Mutex::new(HashMap::new()),
                outputs: Mutex::new(HashMap::new()),
            })
        }

        fn with_output<T>(&self, pin: u8, f: impl FnOnce(&mut OutputPin) -> Result<T>) -> Result<T> {
            let mut outputs = lock(&self.outputs);
            if !outputs.contains_key(&pin) {
                let mut out = self.gpio.get(pin)?.into_output();
                // keep the level after the agent exits
                out.set_reset_on_drop(false);
                outputs.insert(pin, out);
            }
            match outputs.get_mut(&pin) {
                Some(out) => f(out),
                None => anyhow::bail!("output pin {} unavailable", pin),
            }
        }
    }

    impl HardwareProvider for RpiHal {
        fn digital_read(&self, pin: u8) -> Result<bool> {
            let mut inputs = lock(&self.inputs);
            if !inputs.contains_key(&pin) {
                inputs.insert(pin, self.gpio.get(pin)?.into_input_pullup());
            }
            match inputs.get(&pin) {
                Some(input) => Ok(input.read() == Level::High),
                None => anyhow::bail!("input pin {} unavailable", pin),
            }
        }

        fn analog_read(&self, channel: u8) -> Result<u16> {
            let request = gpio::mcp3008_request(channel)?;
            let mut response = [0u8; 3];
            lock(&self.spi).transfer(&mut response, &request)?;
            Ok(gpio::mcp3008_decode(&response))
        }

        fn digital_write(&self, pin: u8, level: bool) -> Result<()> {
            self.with_output(pin, |out| {
                if level {
                    out.set_high();
                } else {
                    out.set_low();
                }
                Ok(())
            })
        }

        fn analog_write(&self, pin: u8, value: u8) -> Result<()> {
            self.with_output(pin, |out| {
                out.set_pwm_frequency(PWM_FREQUENCY_HZ, f64::from(value) / 255.0)?;
                Ok(())
            })
        }

        fn read_dht(&self, pin: u8) -> Result<(f32, f32)> {
            gpio::read_dht(pin)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_defaults() {
        let hal = MockHal::new();
        assert!(hal.digital_read(5).unwrap());
        assert_eq!(hal.analog_read(0).unwrap(), 512);
        assert_eq!(hal.read_dht(6).unwrap(), (25.0, 50.0));
        assert_eq!(hal.dht_reads(), 1);
    }

    #[test]
    fn test_mock_dht_queue_in_order() {
        let hal = MockHal::new();
        hal.push_dht(f32::NAN, 40.0);
        hal.push_dht_error("no response");
        hal.push_dht(20.0, 40.0);
        assert!(hal.read_dht(6).unwrap().0.is_nan());
        assert!(hal.read_dht(6).is_err());
        assert_eq!(hal.read_dht(6).unwrap(), (20.0, 40.0));
    }

    #[test]
    fn test_mock_records_writes() {
        let hal = MockHal::new();
        hal.digital_write(14, true).unwrap();
        hal.analog_write(12, 200).unwrap();
        assert_eq!(hal.digital_writes(), vec![(14, true)]);
        assert_eq!(hal.analog_writes(), vec![(12, 200)]);
        assert!(hal.digital_read(14).unwrap());
    }
}
