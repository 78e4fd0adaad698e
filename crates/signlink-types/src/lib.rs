//! Platform-agnostic types for Bluetooth traffic-sign controllers.
//!
//! This crate provides the types shared by the connection core and the
//! command-line front end: device descriptors, transport kinds, connection
//! states and the UUIDs of the sign firmware's GATT profile.
//!
//! # Example
//!
//! ```
//! use signlink_types::{DeviceDescriptor, TransportKind, normalize_address};
//!
//! let address = normalize_address("aa:bb:cc:dd:ee:ff").unwrap();
//! let device = DeviceDescriptor::named(address, "Sign 12", TransportKind::Ble);
//! assert_eq!(device.display_name(), "Sign 12");
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{ConnectionState, DeviceDescriptor, TransportKind, normalize_address};
pub use uuid as uuids;
