//! Bluetooth UUIDs for traffic-sign firmware.
//!
//! The GATT UUIDs match the ones compiled into the sign firmware's BLE
//! manager. The serial port profile UUID is the standard SPP record.

use uuid::{Uuid, uuid};

// --- Traffic sign GATT profile ---

/// Primary service exposed by BLE traffic signs.
pub const SIGN_SERVICE: Uuid = uuid!("8f0e0d0c-0b0a-0908-0706-050403020100");

/// Command characteristic (write).
pub const COMMAND_CHARACTERISTIC: Uuid = uuid!("8f0e0d0c-0b0a-0908-0706-050403020101");

/// Status characteristic (notify).
pub const STATUS_CHARACTERISTIC: Uuid = uuid!("8f0e0d0c-0b0a-0908-0706-050403020102");

// --- Standard Bluetooth UUIDs ---

/// Client Characteristic Configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// Serial Port Profile service class.
pub const SERIAL_PORT_PROFILE: Uuid = uuid!("00001101-0000-1000-8000-00805f9b34fb");
