//! Timeouts and options for connections, scanners and the registry.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default timeout for establishing a link.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for GATT service discovery after the link is up.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single command write.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for connection timeouts.
///
/// Every connection attempt is bounded by `connect_timeout`; an attempt that
/// runs out of time ends in the `Error` state with a "timed out" status.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use signlink_core::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .connect_timeout(Duration::from_secs(20))
///     .write_timeout(Duration::from_secs(5));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Timeout for establishing the link (GATT connect or socket open).
    pub connect_timeout: Duration,
    /// Timeout for GATT service discovery after the link is up.
    pub discovery_timeout: Duration,
    /// Timeout for a single command write.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config for challenging RF environments.
    ///
    /// Uses longer timeouts to accommodate signal interference,
    /// roadside enclosures, or long distances.
    pub fn challenging_environment() -> Self {
        Self {
            connect_timeout: Duration::from_secs(25),
            discovery_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
        }
    }

    /// Create a config for fast, reliable environments.
    pub fn fast() -> Self {
        Self {
            connect_timeout: Duration::from_secs(8),
            discovery_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Validate the configuration.
    ///
    /// Every timeout must be non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "connect_timeout must be > 0".to_string(),
            ));
        }
        if self.discovery_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "discovery_timeout must be > 0".to_string(),
            ));
        }
        if self.write_timeout.is_zero() {
            return Err(Error::InvalidConfig("write_timeout must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Options for a [`DeviceScanner`](crate::scan::DeviceScanner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Clear previously discovered devices every time a scan starts.
    pub clear_on_start: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            clear_on_start: true,
        }
    }
}

impl ScanOptions {
    /// Keep or clear accumulated results on each start.
    #[must_use]
    pub fn clear_on_start(mut self, clear: bool) -> Self {
        self.clear_on_start = clear;
        self
    }
}

/// Configuration for a [`ConnectionRegistry`](crate::registry::ConnectionRegistry).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
    /// Timeouts handed to every connection the registry creates.
    pub connection: ConnectionConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            event_capacity: 100,
            connection: ConnectionConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the connection config.
    #[must_use]
    pub fn connection(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event_capacity must be > 0".to_string(),
            ));
        }
        self.connection.validate()
    }
}
