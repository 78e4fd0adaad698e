//! Core types shared by every signlink crate.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Bluetooth transport a device is reachable over.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new transports
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[non_exhaustive]
pub enum TransportKind {
    /// Bluetooth Low Energy only (GATT).
    Ble,
    /// Classic Bluetooth only (BR/EDR, RFCOMM).
    Classic,
    /// Dual-mode device advertising both.
    Dual,
}

impl TransportKind {
    /// Whether connections to this kind of device go over the serial port profile.
    ///
    /// Dual-mode signs are driven over RFCOMM, the same as classic-only ones.
    ///
    /// ```
    /// use signlink_types::TransportKind;
    ///
    /// assert!(!TransportKind::Ble.uses_serial());
    /// assert!(TransportKind::Classic.uses_serial());
    /// assert!(TransportKind::Dual.uses_serial());
    /// ```
    #[must_use]
    pub fn uses_serial(&self) -> bool {
        matches!(self, TransportKind::Classic | TransportKind::Dual)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Ble => write!(f, "ble"),
            TransportKind::Classic => write!(f, "classic"),
            TransportKind::Dual => write!(f, "dual"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ble" | "le" | "gatt" => Ok(TransportKind::Ble),
            "classic" | "spp" | "rfcomm" | "bredr" => Ok(TransportKind::Classic),
            "dual" => Ok(TransportKind::Dual),
            _ => Err(ParseError::UnknownTransport(s.to_string())),
        }
    }
}

/// Lifecycle state of a device connection.
///
/// The serial transport never reports [`ConnectionState::Disconnecting`]; it
/// has no draining phase and goes straight to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The link is up.
    Connected,
    /// Teardown was requested and is in progress.
    Disconnecting,
    /// The last connection attempt failed.
    Error,
}

impl ConnectionState {
    /// Whether the link is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether an attempt or teardown is still in progress.
    #[must_use]
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Disconnecting
        )
    }

    /// Whether a new `connect` may start from this state.
    #[must_use]
    pub fn can_connect(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnecting => write!(f, "Disconnecting"),
            ConnectionState::Error => write!(f, "Error"),
        }
    }
}

/// A device seen during discovery.
///
/// Descriptors are immutable once observed. Equality and hashing only look at
/// the address, so two descriptors for the same device compare equal even if
/// one of them carries a name and the other does not.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceDescriptor {
    /// Unique key: MAC address on Linux/Windows, platform UUID on macOS.
    pub address: String,
    /// Advertised name, if any.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub name: Option<String>,
    /// Transport the device was discovered on.
    pub transport: TransportKind,
}

impl DeviceDescriptor {
    /// Create a descriptor without a name.
    pub fn new(address: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            address: address.into(),
            name: None,
            transport,
        }
    }

    /// Create a descriptor with an advertised name.
    pub fn named(
        address: impl Into<String>,
        name: impl Into<String>,
        transport: TransportKind,
    ) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
            transport,
        }
    }

    /// Name to show a user: the advertised name, falling back to the address.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.address)
    }
}

impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for DeviceDescriptor {}

impl Hash for DeviceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({}, {})", name, self.address, self.transport),
            None => write!(f, "{} ({})", self.address, self.transport),
        }
    }
}

/// Normalize a device address.
///
/// MAC addresses (with `:` or `-` separators, or none) are returned upper-case
/// with `:` separators. Platform UUID identifiers (CoreBluetooth) are returned
/// lower-case and hyphenated.
///
/// ```
/// use signlink_types::normalize_address;
///
/// assert_eq!(normalize_address("aa-bb-cc-dd-ee-ff").unwrap(), "AA:BB:CC:DD:EE:FF");
/// assert_eq!(normalize_address("AABBCCDDEEFF").unwrap(), "AA:BB:CC:DD:EE:FF");
/// assert!(normalize_address("not-an-address").is_err());
/// ```
pub fn normalize_address(input: &str) -> ParseResult<String> {
    let trimmed = input.trim();

    let hex: String = trimmed
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();
    let separators_ok = trimmed.len() == 12
        || (trimmed.len() == 17 && trimmed.chars().skip(2).step_by(3).all(|c| c == ':' || c == '-'));
    if hex.len() == 12 && separators_ok && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        let upper = hex.to_ascii_uppercase();
        let octets: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
        return Ok(octets.join(":"));
    }

    if let Ok(id) = uuid::Uuid::parse_str(trimmed) {
        return Ok(id.hyphenated().to_string());
    }

    Err(ParseError::InvalidAddress(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_descriptor_equality_uses_address_only() {
        let a = DeviceDescriptor::named("AA:BB:CC:DD:EE:FF", "Sign 1", TransportKind::Ble);
        let b = DeviceDescriptor::new("AA:BB:CC:DD:EE:FF", TransportKind::Classic);
        let c = DeviceDescriptor::new("11:22:33:44:55:66", TransportKind::Ble);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display_name_falls_back_to_address() {
        let named = DeviceDescriptor::named("AA:BB:CC:DD:EE:FF", "STOP sign", TransportKind::Ble);
        let unnamed = DeviceDescriptor::new("AA:BB:CC:DD:EE:FF", TransportKind::Ble);
        let blank = DeviceDescriptor::named("AA:BB:CC:DD:EE:FF", "  ", TransportKind::Ble);

        assert_eq!(named.display_name(), "STOP sign");
        assert_eq!(unnamed.display_name(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(blank.display_name(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_transport_from_str() {
        assert_eq!("BLE".parse::<TransportKind>().unwrap(), TransportKind::Ble);
        assert_eq!("spp".parse::<TransportKind>().unwrap(), TransportKind::Classic);
        assert_eq!(" dual ".parse::<TransportKind>().unwrap(), TransportKind::Dual);

        let err = "zigbee".parse::<TransportKind>().unwrap_err();
        assert_eq!(err, ParseError::UnknownTransport("zigbee".to_string()));
    }

    #[test]
    fn test_transport_display_round_trips() {
        for kind in [TransportKind::Ble, TransportKind::Classic, TransportKind::Dual] {
            assert_eq!(kind.to_string().parse::<TransportKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_connection_state_helpers() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Connecting.is_transitional());
        assert!(ConnectionState::Disconnecting.is_transitional());
        assert!(ConnectionState::Error.can_connect());
        assert!(!ConnectionState::Connecting.can_connect());
        assert_eq!(ConnectionState::Disconnecting.to_string(), "Disconnecting");
    }

    #[test]
    fn test_normalize_mac_addresses() {
        assert_eq!(
            normalize_address("aa:bb:cc:dd:ee:ff").unwrap(),
            "AA:BB:CC:DD:EE:FF"
        );
        assert_eq!(
            normalize_address(" 00-1a-7d-da-71-13 ").unwrap(),
            "00:1A:7D:DA:71:13"
        );
        assert!(normalize_address("AA:BB:CC:DD:EE").is_err());
        assert!(normalize_address("GG:BB:CC:DD:EE:FF").is_err());
        assert!(normalize_address("AABB:CCDDEEFF").is_err());
    }

    #[test]
    fn test_normalize_platform_uuid() {
        assert_eq!(
            normalize_address("6E400001-B5A3-F393-E0A9-E50E24DCCA9E").unwrap(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_descriptor_serialization() {
        let device = DeviceDescriptor::new("AA:BB:CC:DD:EE:FF", TransportKind::Dual);
        let json = serde_json::to_string(&device).unwrap();
        assert_eq!(json, r#"{"address":"AA:BB:CC:DD:EE:FF","transport":"dual"}"#);

        let state = serde_json::to_string(&ConnectionState::Disconnecting).unwrap();
        assert_eq!(state, "\"disconnecting\"");
    }

    mod proptests {
        use crate::types::normalize_address;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn normalized_mac_is_idempotent(bytes in proptest::array::uniform6(any::<u8>())) {
                let raw = bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join("-");
                let once = normalize_address(&raw).unwrap();
                let twice = normalize_address(&once).unwrap();
                prop_assert_eq!(&once, &twice);
                prop_assert_eq!(once.len(), 17);
            }
        }
    }
}
