//! BlueZ implementations of the serial and classic scanning seams.
//!
//! Only available on Linux with the `classic` feature.

use std::str::FromStr;

use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use tracing::{debug, info};

use signlink_types::{DeviceDescriptor, TransportKind};

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::scan::{DeviceStream, ScanBackend};
use crate::serial::{SerialConnector, SerialStream};

/// RFCOMM channel the serial port profile is served on by default.
pub const DEFAULT_CHANNEL: u8 = 1;

fn parse_address(address: &str) -> Result<Address> {
    Address::from_str(address)
        .map_err(|_| Error::invalid_config(format!("not a classic Bluetooth address: {address}")))
}

/// Opens RFCOMM sockets to classic Bluetooth signs.
#[derive(Debug, Clone)]
pub struct RfcommConnector {
    channel: u8,
}

impl Default for RfcommConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL)
    }
}

impl RfcommConnector {
    /// Create a connector for `channel`.
    pub fn new(channel: u8) -> Self {
        Self { channel }
    }

    /// RFCOMM channel used for new sockets.
    pub fn channel(&self) -> u8 {
        self.channel
    }
}

#[async_trait]
impl SerialConnector for RfcommConnector {
    async fn open(&self, device: &DeviceDescriptor) -> Result<SerialStream> {
        let address = parse_address(&device.address)?;
        debug!(address = %address, channel = self.channel, "Opening RFCOMM socket");
        let stream = Stream::connect(SocketAddr::new(address, self.channel))
            .await
            .map_err(|e| socket_unavailable(&device.address, self.channel, &e))?;
        Ok(Box::pin(stream))
    }
}

fn socket_unavailable(address: &str, channel: u8, err: &std::io::Error) -> Error {
    Error::connection_failed(
        Some(address.to_string()),
        ConnectionFailureReason::SocketUnavailable(format!("channel {channel}: {err}")),
    )
}

/// BR/EDR discovery through BlueZ.
///
/// Discovery runs for as long as the stream returned by `start` is alive, so
/// stopping the scanner ends it.
#[derive(Debug, Clone)]
pub struct ClassicScanBackend {
    adapter: Adapter,
}

impl ClassicScanBackend {
    /// Create a backend over `adapter`.
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Create a backend over the default BlueZ adapter.
    pub async fn default_adapter() -> Result<Self> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        Ok(Self::new(adapter))
    }
}

#[async_trait]
impl ScanBackend for ClassicScanBackend {
    fn transport(&self) -> TransportKind {
        TransportKind::Classic
    }

    async fn start(&self) -> Result<DeviceStream> {
        self.adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::BrEdr,
                ..Default::default()
            })
            .await?;
        let events = self.adapter.discover_devices().await?;
        info!(adapter = %self.adapter.name(), "Classic discovery started");

        let adapter = self.adapter.clone();
        let devices = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let AdapterEvent::DeviceAdded(address) = event else {
                    return None;
                };
                let device = adapter.device(address).ok()?;
                let name = device.name().await.ok().flatten();
                Some(DeviceDescriptor {
                    address: address.to_string(),
                    name,
                    transport: TransportKind::Classic,
                })
            }
        });
        Ok(devices.boxed())
    }

    async fn stop(&self) -> Result<()> {
        debug!(adapter = %self.adapter.name(), "Classic discovery stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let address = parse_address("AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(address.to_string(), "AA:BB:CC:DD:EE:FF");
        assert!(matches!(
            parse_address("not-an-address"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_default_channel() {
        assert_eq!(RfcommConnector::default().channel(), DEFAULT_CHANNEL);
        assert_eq!(RfcommConnector::new(3).channel(), 3);
    }

    #[test]
    fn test_open_failure_reports_socket_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Connection refused");
        let err = socket_unavailable("AA:BB:CC:DD:EE:FF", 3, &io);
        assert!(matches!(
            &err,
            Error::ConnectionFailed {
                reason: ConnectionFailureReason::SocketUnavailable(_),
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "Connection failed: socket unavailable: channel 3: Connection refused"
        );
    }
}
