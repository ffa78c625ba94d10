//! ==============================================================================
//! main.rs - telemetry agent entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the agent together and runs it until ctrl-c:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                     telemetry agent                          │
//!     │  ┌───────────────┐   ┌──────────────┐   ┌─────────────────┐  │
//!     │  │ sampling loop │   │ status       │   │ mqtt bridge     │  │
//!     │  │ (50ms tick)   │   │ buttons      │   │ (own task)      │  │
//!     │  └───────┬───────┘   └──────┬───────┘   └────────┬────────┘  │
//!     │          │                  │                    │           │
//!     │          └──────────────────┼────────────────────┘           │
//!     │                             │ HardwareProvider               │
//!     └─────────────────────────────┼────────────────────────────────┘
//!                        ┌──────────┴──────────┐
//!                        ▼                     ▼
//!                 ┌─────────────┐       ┌─────────────┐
//!                 │  MockHal    │       │  RpiHal     │
//!                 │ (dev/test)  │       │ (hardware)  │
//!                 └─────────────┘       └─────────────┘
//!
//! startup:
//!     1. logging (RUST_LOG, else [logging].level once the config is read)
//!     2. configuration (agent.toml or defaults)
//!     3. hardware provider, network link, http client
//!     4. optional status sync, optional mqtt bridge
//!     5. sampling loop
//!
//! ==============================================================================

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter};

use telemetry_agent::config::AgentConfig;
use telemetry_agent::hal::HardwareProvider;
use telemetry_agent::mqtt::MqttBridge;
use telemetry_agent::network::{build_http_client, link_from_config, NetworkLink};
use telemetry_agent::sampling::SamplingLoop;

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: logging
    let env_filter = EnvFilter::try_from_default_env().ok();
    let from_env = env_filter.is_some();
    let (filter, filter_handle) = reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new("info")));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();

    tracing::info!("===========================================================");
    tracing::info!("  Telemetry Agent v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("===========================================================");

    // step 2: configuration
    let config = AgentConfig::load_or_default();
    if !from_env {
        match EnvFilter::try_new(&config.logging.level) {
            Ok(f) => {
                if let Err(e) = filter_handle.reload(f) {
                    tracing::warn!("could not apply log level: {}", e);
                }
            }
            Err(e) => tracing::warn!("invalid logging.level '{}': {}", config.logging.level, e),
        }
    }
    config.print_summary();

    // step 3: hardware + network
    let hal = init_hal()?;
    let link: Arc<dyn NetworkLink> = Arc::from(link_from_config(&config.network));
    if !link.connected() {
        tracing::warn!("network link is down at startup; cycles will be skipped until it comes up");
    }
    let http = build_http_client(&config.network)?;

    let mut sampling = SamplingLoop::from_config(&config, Arc::clone(&hal), Arc::clone(&link), http);

    // step 4: optional collaborators
    if let (Some(status), Some(commands)) = (&config.status, sampling.commands()) {
        if status.sync_on_start {
            if let Err(e) = commands.sync().await {
                tracing::warn!("startup status sync failed: {}", e);
            }
        }
    }

    let mqtt_task = config.mqtt.clone().map(|mqtt| {
        let bridge = MqttBridge::new(mqtt, Arc::clone(&hal));
        tokio::spawn(async move {
            if let Err(e) = bridge.run().await {
                tracing::error!("mqtt bridge stopped: {:#}", e);
            }
        })
    });

    // step 5: run until ctrl-c
    let result = tokio::select! {
        r = sampling.run() => r,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Termination signal received!");
            Ok(())
        }
    };

    if let Some(task) = mqtt_task {
        task.abort();
    }
    tracing::info!("Exiting");
    result
}

#[cfg(not(feature = "hardware"))]
fn init_hal() -> Result<Arc<dyn HardwareProvider>> {
    Ok(Arc::new(telemetry_agent::hal::MockHal::new()))
}

#[cfg(feature = "hardware")]
fn init_hal() -> Result<Arc<dyn HardwareProvider>> {
    Ok(Arc::new(telemetry_agent::hal::RpiHal::new()?))
}
