//! Bluetooth connection core for smart traffic signs.
//!
//! This crate discovers traffic signs over Bluetooth Low Energy and classic
//! Bluetooth, keeps one connection per sign and relays text commands and
//! status reports in both directions.
//!
//! # Features
//!
//! - **Discovery**: BLE and classic scanners with a merged, de-duplicated list
//! - **Two transports**: GATT (command/status characteristics) and the serial
//!   port profile (newline-terminated lines over RFCOMM) behind one
//!   [`Connection`] trait
//! - **Observable state**: every connection publishes its state and last
//!   status message through `tokio::sync::watch` channels, and every status
//!   message in order through a broadcast stream
//! - **Multi-sign registry**: concurrent connections keyed by address, with
//!   accident detection and an [`AlertSummary`] for background notifications
//!
//! # Transports
//!
//! | Device transport | Connection | Native stack |
//! |------------------|------------|--------------|
//! | `Ble` | [`GattConnection`] | btleplug |
//! | `Classic` / `Dual` | [`SerialConnection`] | BlueZ RFCOMM (`classic` feature, Linux) |
//!
//! # Platform Differences
//!
//! On macOS, BLE devices are identified by a CoreBluetooth UUID rather than
//! their MAC address. [`DeviceDescriptor::address`] holds whichever
//! identifier the platform uses. Classic Bluetooth is only available on Linux.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use signlink_core::ble::BtleConnector;
//! use signlink_core::{ConnectionRegistry, DeviceDescriptor, TransportFactory, TransportKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = BtleConnector::default_adapter().await?;
//!     let registry = ConnectionRegistry::new(Arc::new(TransportFactory::ble_only(Arc::new(connector))));
//!
//!     let sign = DeviceDescriptor::new("AA:BB:CC:DD:EE:FF", TransportKind::Ble);
//!     let connection = registry.connect(&sign)?;
//!     signlink_core::wait_until_ready(connection.as_ref(), Duration::from_secs(20)).await?;
//!
//!     if registry.send_command(&sign.address, "STOP").await {
//!         println!("{:?}", connection.status_message());
//!     }
//!     registry.close_all();
//!     Ok(())
//! }
//! ```

pub mod alert;
pub mod ble;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod gatt;
pub mod mock;
pub mod observable;
pub mod registry;
#[cfg(all(target_os = "linux", feature = "classic"))]
pub mod rfcomm;
pub mod scan;
pub mod serial;
pub mod traits;
pub mod util;

// Core exports
pub use alert::{AlertSummary, is_accident_message};
pub use commands::{SignCommand, json_command};
pub use config::{ConnectionConfig, RegistryConfig, ScanOptions};
pub use discovery::{DiscoveryHub, merge_devices};
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
pub use events::{ConnectionEvent, EventDispatcher, EventReceiver, EventSender};
pub use gatt::{GattConnection, GattConnector, GattPeripheral};
pub use observable::{Observable, StatusFeed};
pub use registry::{ConnectionFactory, ConnectionRegistry, TransportFactory};
pub use scan::{DeviceScanner, ScanBackend};
pub use serial::{SerialConnection, SerialConnector};
pub use traits::{Connection, wait_for_state, wait_until_ready};
pub use util::{create_identifier, format_peripheral_id};

pub use mock::{MockGattConnector, MockPeripheral, MockScanBackend, MockSerialConnector};

// Re-export from signlink-types
pub use signlink_types::uuids;
pub use signlink_types::{ConnectionState, DeviceDescriptor, TransportKind, normalize_address};

/// Shared handle to a connection of either transport.
pub type SharedConnection = std::sync::Arc<dyn Connection>;
