//! btleplug implementations of the GATT and scanning seams.
//!
//! [`BtleConnector`] resolves a [`DeviceDescriptor`] to a btleplug peripheral,
//! scanning briefly if the adapter has not seen it yet. [`BleScanBackend`]
//! turns adapter discovery events into device descriptors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use signlink_types::{DeviceDescriptor, TransportKind, normalize_address};

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::gatt::{GattConnector, GattEvent, GattEventStream, GattPeripheral, GattService};
use crate::scan::{DeviceStream, ScanBackend};
use crate::util::{create_identifier, format_peripheral_id, lock};

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// Identifier of a peripheral as used in [`DeviceDescriptor::address`].
async fn peripheral_identifier(peripheral: &Peripheral) -> Option<(String, Option<String>)> {
    let properties = peripheral.properties().await.ok()??;
    let address = create_identifier(&properties.address.to_string(), &peripheral.id());
    Some((address, properties.local_name))
}

/// Comparison key for MAC addresses and macOS peripheral UUIDs alike.
fn address_key(address: &str) -> String {
    normalize_address(address).unwrap_or_else(|_| address.trim().to_ascii_uppercase())
}

async fn find_peripheral(adapter: &Adapter, address: &str) -> Result<Option<Peripheral>> {
    let wanted = address_key(address);
    for peripheral in adapter.peripherals().await? {
        if let Some((identifier, _)) = peripheral_identifier(&peripheral).await
            && address_key(&identifier) == wanted
        {
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}

/// Opens BLE peripherals through a btleplug adapter.
#[derive(Debug, Clone)]
pub struct BtleConnector {
    adapter: Adapter,
    scan_window: Duration,
}

impl BtleConnector {
    /// Create a connector over `adapter`.
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            scan_window: Duration::from_secs(5),
        }
    }

    /// Create a connector over the first available adapter.
    pub async fn default_adapter() -> Result<Self> {
        Ok(Self::new(get_adapter().await?))
    }

    /// How long to scan for a device the adapter has not seen yet.
    #[must_use]
    pub fn scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }
}

#[async_trait]
impl GattConnector for BtleConnector {
    async fn open(&self, device: &DeviceDescriptor) -> Result<Arc<dyn GattPeripheral>> {
        let peripheral = match find_peripheral(&self.adapter, &device.address).await? {
            Some(peripheral) => peripheral,
            None => {
                debug!(address = %device.address, "Peripheral not cached, scanning");
                self.adapter.start_scan(ScanFilter::default()).await?;
                sleep(self.scan_window).await;
                self.adapter.stop_scan().await?;
                find_peripheral(&self.adapter, &device.address)
                    .await?
                    .ok_or_else(|| Error::device_not_found(device.address.clone()))?
            }
        };
        Ok(Arc::new(BtlePeripheral::new(self.adapter.clone(), peripheral)))
    }
}

/// A btleplug peripheral with a characteristic cache.
pub struct BtlePeripheral {
    adapter: Adapter,
    peripheral: Peripheral,
    characteristics: Mutex<HashMap<Uuid, Characteristic>>,
}

impl std::fmt::Debug for BtlePeripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtlePeripheral")
            .field("id", &format_peripheral_id(&self.peripheral.id()))
            .finish()
    }
}

impl BtlePeripheral {
    fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self {
            adapter,
            peripheral,
            characteristics: Mutex::new(HashMap::new()),
        }
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        let cache = lock(&self.characteristics);
        cache.get(&uuid).cloned().ok_or_else(|| {
            Error::characteristic_not_found(uuid.to_string(), self.peripheral.services().len())
        })
    }
}

#[async_trait]
impl GattPeripheral for BtlePeripheral {
    async fn connect(&self) -> Result<()> {
        if !self.peripheral.is_connected().await? {
            self.peripheral.connect().await?;
        }
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<GattService>> {
        self.peripheral.discover_services().await?;
        let services = self.peripheral.services();

        let mut cache = lock(&self.characteristics);
        cache.clear();
        let resolved = services
            .iter()
            .map(|service| {
                for characteristic in &service.characteristics {
                    cache.insert(characteristic.uuid, characteristic.clone());
                }
                GattService {
                    uuid: service.uuid,
                    characteristics: service.characteristics.iter().map(|c| c.uuid).collect(),
                }
            })
            .collect();
        Ok(resolved)
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral
            .write(&characteristic, value, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn events(&self) -> Result<GattEventStream> {
        let notifications = self
            .peripheral
            .notifications()
            .await?
            .map(|notification| GattEvent::Notification {
                characteristic: notification.uuid,
                value: notification.value,
            });

        let id = self.peripheral.id();
        let disconnects = self.adapter.events().await?.filter_map(move |event| {
            let id = id.clone();
            async move {
                match event {
                    CentralEvent::DeviceDisconnected(gone) if gone == id => {
                        Some(GattEvent::Disconnected)
                    }
                    _ => None,
                }
            }
        });

        Ok(futures::stream::select(notifications, disconnects).boxed())
    }

    async fn disconnect(&self) -> Result<()> {
        lock(&self.characteristics).clear();
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// BLE discovery over a btleplug adapter.
#[derive(Debug, Clone)]
pub struct BleScanBackend {
    adapter: Adapter,
}

impl BleScanBackend {
    /// Create a backend over `adapter`.
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Create a backend over the first available adapter.
    pub async fn default_adapter() -> Result<Self> {
        Ok(Self::new(get_adapter().await?))
    }
}

#[async_trait]
impl ScanBackend for BleScanBackend {
    fn transport(&self) -> TransportKind {
        TransportKind::Ble
    }

    async fn start(&self) -> Result<DeviceStream> {
        let events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        info!("BLE scan started");

        let adapter = self.adapter.clone();
        let devices = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => return None,
                };
                let peripheral = adapter.peripheral(&id).await.ok()?;
                let (address, name) = peripheral_identifier(&peripheral).await?;
                Some(DeviceDescriptor {
                    address,
                    name,
                    transport: TransportKind::Ble,
                })
            }
        });
        Ok(devices.boxed())
    }

    async fn stop(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }
}
