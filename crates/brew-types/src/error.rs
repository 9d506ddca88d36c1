//! Error types for data parsing in brew-types.

use thiserror::Error;

/// Errors that can occur when parsing controller data.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in brew-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Payload length does not match the wire format.
    #[error("Invalid payload length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected payload size.
        expected: usize,
        /// Actual payload size received.
        actual: usize,
    },

    /// Peripheral address is neither a MAC address nor a UUID.
    #[error("Invalid peripheral address: '{0}'")]
    InvalidAddress(String),

    /// Value could not be interpreted.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using brew-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
