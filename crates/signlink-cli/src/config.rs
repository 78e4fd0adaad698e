//! Configuration file management.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use signlink_core::{ConnectionConfig, DeviceDescriptor, TransportKind, normalize_address};

const DEFAULT_SCAN_SECS: u64 = 10;

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log filter used when neither `--verbose`, `--quiet` nor `RUST_LOG` is set
    #[serde(default)]
    pub log_level: Option<String>,

    /// Connection establishment timeout in seconds
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// Command write timeout in seconds
    #[serde(default)]
    pub write_timeout_secs: Option<u64>,

    /// RFCOMM channel for classic signs
    #[serde(default)]
    #[cfg_attr(
        not(all(target_os = "linux", feature = "classic")),
        allow(dead_code)
    )]
    pub rfcomm_channel: Option<u8>,

    /// Default scan duration in seconds
    #[serde(default)]
    pub scan_secs: Option<u64>,

    /// Named signs (alias -> address and transport)
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceAlias>,
}

/// A sign registered under a friendly name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAlias {
    pub address: String,
    #[serde(default)]
    pub transport: Option<TransportKind>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("signlink")
            .join("config.toml")
    }

    /// Load config from file, or return default if not found
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    eprintln!("Warning: Failed to read config: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Connection timeouts, with file overrides applied to the defaults.
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::default();
        if let Some(secs) = self.connect_timeout_secs.filter(|s| *s > 0) {
            config = config.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.write_timeout_secs.filter(|s| *s > 0) {
            config = config.write_timeout(Duration::from_secs(secs));
        }
        config
    }

    pub fn scan_secs(&self) -> u64 {
        self.scan_secs.unwrap_or(DEFAULT_SCAN_SECS)
    }

    /// Alias under which `address` is registered, if any.
    pub fn alias_for(&self, address: &str) -> Option<&str> {
        self.devices
            .iter()
            .find(|(_, entry)| entry.address.eq_ignore_ascii_case(address))
            .map(|(alias, _)| alias.as_str())
    }

    /// Resolve an alias or address into a descriptor.
    ///
    /// An explicit `transport` wins over the alias entry; BLE is the fallback.
    pub fn resolve_device(
        &self,
        device: &str,
        transport: Option<TransportKind>,
    ) -> Result<DeviceDescriptor> {
        let (address, alias_transport, name) = match self.devices.get(device) {
            Some(entry) => (entry.address.as_str(), entry.transport, entry.name.clone()),
            None => (device, None, None),
        };
        let address = normalize_address(address)
            .with_context(|| format!("'{}' is neither a known alias nor an address", device))?;
        let transport = transport.or(alias_transport).unwrap_or(TransportKind::Ble);
        Ok(DeviceDescriptor {
            address,
            name,
            transport,
        })
    }
}
