//! Error types for parsing in signlink-types.

use thiserror::Error;

/// Errors that can occur when parsing identifiers and names.
///
/// This error type is platform-agnostic and does not include
/// Bluetooth stack errors (those belong in signlink-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The value is neither a MAC address nor a platform UUID identifier.
    #[error("Invalid device address: '{0}'")]
    InvalidAddress(String),

    /// Unknown transport name.
    #[error("Unknown transport '{0}' (expected ble, classic or dual)")]
    UnknownTransport(String),
}

/// Result type alias using signlink-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
