//! ==============================================================================
//! telemetry_agent - event-triggered sensor-to-server telemetry
//! ==============================================================================
//!
//! a button press (or tilt) on an edge node takes one sensor reading, stamps
//! it with the time from a remote time service, and sends it to an http sink.
//! remote led/rgb commands arrive over http polling and mqtt.
//!
//! module map (leaf-first):
//!     edge.rs      debounced edge detector
//!     sensor.rs    rate-limited dht reader, analog light reader
//!     timesync.rs  time reference client + normalization
//!     query.rs     percent-encoding request builder
//!     transmit.rs  telemetry transmitter
//!     sampling.rs  the sampling loop
//!     status.rs    http-polled led/rgb commands
//!     mqtt.rs      pub/sub bridge
//!     hal.rs       hardware abstraction (mock / rppal)
//!
//! ==============================================================================

pub mod config;
pub mod domain;
pub mod edge;
pub mod gpio;
pub mod hal;
pub mod mqtt;
pub mod network;
pub mod query;
pub mod retry;
pub mod sampling;
pub mod sensor;
pub mod status;
pub mod timesync;
pub mod transmit;
