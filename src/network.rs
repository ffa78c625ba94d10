//! ==============================================================================
//! network.rs - link state and the shared http client
//! ==============================================================================
//!
//! purpose:
//!     the network association is one global resource. every component that
//!     talks to the outside world asks `NetworkLink::connected()` first and
//!     fails on the spot when the link is down. reconnection is the os's job.
//!
//! relationships:
//!     - used by: timesync.rs, transmit.rs, status.rs
//!     - configured from: config.rs ([network])
//!
//! ==============================================================================

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::NetworkConfig;

pub trait NetworkLink: Send + Sync {
    fn connected(&self) -> bool;
}

/// link state from `/sys/class/net/<iface>/operstate`
pub struct InterfaceLink {
    operstate: PathBuf,
}

impl InterfaceLink {
    pub fn new(interface: &str) -> Self {
        Self {
            operstate: PathBuf::from("/sys/class/net").join(interface).join("operstate"),
        }
    }
}

impl NetworkLink for InterfaceLink {
    fn connected(&self) -> bool {
        std::fs::read_to_string(&self.operstate)
            .map(|s| s.trim() == "up")
            .unwrap_or(false)
    }
}

/// used when no interface is configured
pub struct AlwaysUp;

impl NetworkLink for AlwaysUp {
    fn connected(&self) -> bool {
        true
    }
}

/// link whose state is set by hand (tests, dry runs)
pub struct ManualLink {
    up: AtomicBool,
}

impl ManualLink {
    pub fn new(up: bool) -> Self {
        Self { up: AtomicBool::new(up) }
    }

    pub fn set(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

impl NetworkLink for ManualLink {
    fn connected(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

pub fn link_from_config(config: &NetworkConfig) -> Box<dyn NetworkLink> {
    match config.interface.as_deref() {
        Some(iface) if !iface.is_empty() => Box::new(InterfaceLink::new(iface)),
        _ => Box::new(AlwaysUp),
    }
}

pub fn build_http_client(config: &NetworkConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .redirect(reqwest::redirect::Policy::limited(5));

    if config.insecure_tls {
        tracing::warn!("TLS certificate validation is DISABLED (network.insecure_tls = true)");
        builder = builder.danger_accept_invalid_certs(true);
    }

    Ok(builder.build()?)
}

static NONCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// cache-busting value, unique per process
pub fn nonce() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let seq = NONCE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}{:04}", millis, seq % 10_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_interface_is_down() {
        let link = InterfaceLink::new("definitely-not-a-real-iface0");
        assert!(!link.connected());
    }

    #[test]
    fn test_manual_link_toggles() {
        let link = ManualLink::new(false);
        assert!(!link.connected());
        link.set(true);
        assert!(link.connected());
    }

    #[test]
    fn test_nonces_differ() {
        let a = nonce();
        let b = nonce();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_digit()));
    }
}
