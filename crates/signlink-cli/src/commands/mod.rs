//! Command implementations for the CLI.

mod list;
mod monitor;
mod scan;
mod send;

pub use list::cmd_commands;
pub use monitor::{MonitorArgs, cmd_monitor};
pub use scan::cmd_scan;
pub use send::{SendArgs, cmd_send};

use std::sync::Arc;

use anyhow::{Context, Result};
use signlink_core::ble::{BleScanBackend, BtleConnector};
use signlink_core::{ConnectionRegistry, DeviceScanner, DiscoveryHub, RegistryConfig, TransportFactory};

use crate::config::Config;

/// Build a registry over the host's Bluetooth stack.
///
/// Classic and dual-mode signs need a build with the `classic` feature.
pub(crate) async fn build_registry(config: &Config) -> Result<ConnectionRegistry> {
    let gatt = BtleConnector::default_adapter()
        .await
        .context("Failed to open the Bluetooth adapter")?;

    #[cfg(all(target_os = "linux", feature = "classic"))]
    let factory = {
        let channel = config
            .rfcomm_channel
            .unwrap_or(signlink_core::rfcomm::DEFAULT_CHANNEL);
        TransportFactory::new(
            Arc::new(gatt),
            Arc::new(signlink_core::rfcomm::RfcommConnector::new(channel)),
        )
    };
    #[cfg(not(all(target_os = "linux", feature = "classic")))]
    let factory = TransportFactory::ble_only(Arc::new(gatt));

    let registry_config = RegistryConfig::default().connection(config.connection_config());
    registry_config
        .validate()
        .context("Invalid connection settings")?;
    Ok(ConnectionRegistry::with_config(
        Arc::new(factory),
        registry_config,
    ))
}

/// Build a discovery hub over every scanner this build supports.
pub(crate) async fn build_hub() -> Result<DiscoveryHub> {
    let ble = BleScanBackend::default_adapter()
        .await
        .context("Failed to open the Bluetooth adapter")?;
    #[allow(unused_mut)]
    let mut scanners = vec![DeviceScanner::new(Arc::new(ble))];

    #[cfg(all(target_os = "linux", feature = "classic"))]
    match signlink_core::rfcomm::ClassicScanBackend::default_adapter().await {
        Ok(classic) => scanners.push(DeviceScanner::new(Arc::new(classic))),
        Err(e) => tracing::warn!("Classic discovery unavailable: {}", e),
    }

    Ok(DiscoveryHub::new(scanners))
}
