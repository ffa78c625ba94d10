//! ==============================================================================
//! gpio.rs - board-level helpers for the real hardware provider
//! ==============================================================================
//!
//! purpose:
//!     the two pieces of the Pi backend that are not plain pin toggling:
//!     - dht reads through the adafruit python driver (subprocess)
//!     - mcp3008 spi framing for the 10-bit analog input
//!
//! why subprocess to python?:
//!     dht sensors require precise bit-banging timing (~microseconds).
//!     pure rust in userspace is unreliable due to lack of real-time guarantees.
//!
//! relationships:
//!     - used by: hal.rs (RpiHal)
//!
//! ==============================================================================

use anyhow::{anyhow, Result};

/// read a dht sensor via the adafruit driver
///
/// a sensor that answers with garbage yields nan values (the reader retries
/// those); a driver that cannot run at all is an error.
pub fn read_dht(pin: u8) -> Result<(f32, f32)> {
    use std::process::Command;

    let script = format!(
        r#"
import sys
try:
    import adafruit_dht
    import board
    import json

    dht = adafruit_dht.DHT11(board.D{})
    try:
        t, h = dht.temperature, dht.humidity
        if t is not None and h is not None:
            print(json.dumps({{"t": t, "h": h}}))
        else:
            print("null")
    except RuntimeError:
        print("null")
    finally:
        dht.exit()
except Exception as e:
    print(str(e), file=sys.stderr)
    sys.exit(1)
"#,
        pin
    );

    let output = Command::new("python3")
        .arg("-c")
        .arg(&script)
        .output()
        .map_err(|e| anyhow!("Failed to run python3: {}", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("Python error: {}", stderr.trim()));
    }

    parse_dht_output(&String::from_utf8_lossy(&output.stdout))
}

/// parse the driver's stdout into (celsius, humidity)
pub fn parse_dht_output(stdout: &str) -> Result<(f32, f32)> {
    let stdout = stdout.trim();
    if stdout == "null" || stdout.is_empty() {
        return Ok((f32::NAN, f32::NAN));
    }

    let parsed: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|e| anyhow!("JSON parse error: {} (got: {})", e, stdout))?;

    let value = |key: &str| parsed[key].as_f64().map(|v| v as f32).unwrap_or(f32::NAN);
    Ok((value("t"), value("h")))
}

// ==============================================================================
// mcp3008 - 8 channel 10-bit adc on spi0
// ==============================================================================
//
// request: start bit, then single-ended flag + 3 channel bits in the high
// nibble of the second byte. the answer's last 10 bits are the sample.

pub fn mcp3008_request(channel: u8) -> Result<[u8; 3]> {
    if channel > 7 {
        return Err(anyhow!("mcp3008 has no channel {}", channel));
    }
    Ok([0x01, (0x08 | channel) << 4, 0x00])
}

pub fn mcp3008_decode(response: &[u8; 3]) -> u16 {
    (u16::from(response[1] & 0x03) << 8) | u16::from(response[2])
}
