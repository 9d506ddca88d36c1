//! Error types for brew-core.
//!
//! Errors are split by the phase of the session they belong to:
//!
//! | Type | Raised by | Effect on the session |
//! |------|-----------|-----------------------|
//! | [`ConnectError`] | `start` | None, the session stays `Disconnected` |
//! | [`DiscoveryError`] | service discovery | Aborts to `Disconnected` |
//! | [`ResolutionError`] | role resolution | Aborts to `Disconnected` |
//! | [`OperationError`] | reads, writes, subscriptions | Surfaced per operation |
//! | [`Error`] | async entry points (scan, runtime handle) | Returned to the caller |
//!
//! Connection-level failures reach the event sink wrapped in a single
//! [`ConnectionFailure`]. Per-operation failures are reported individually
//! and never tear down the session.

use std::time::Duration;

use brew_types::CharacteristicRole;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::link::GattStatus;
use crate::session::ConnectionState;

/// Errors that can occur when using brew-core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Peripheral not found during scan or connection.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// A session could not be started.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Service discovery failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Discovered services did not match the controller profile.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// A read, write or subscription was rejected or failed.
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session task has exited and no longer accepts commands.
    #[error("Session closed")]
    SessionClosed,
}

/// Reason why a peripheral was not found.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Peripheral with the specified address not found.
    NotFound { identifier: String },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Errors returned synchronously when starting a session.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ConnectError {
    /// The address is neither a MAC address nor a platform UUID.
    #[error("Invalid peripheral address: '{0}'")]
    InvalidAddress(String),

    /// No usable Bluetooth adapter.
    #[error("Bluetooth adapter unavailable")]
    AdapterUnavailable,

    /// The session is already connecting or connected.
    #[error("Session already active (state: {0})")]
    AlreadyActive(ConnectionState),
}

/// Service discovery failures.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DiscoveryError {
    /// The link reported a failed discovery.
    #[error("Service discovery failed: {0}")]
    Transport(GattStatus),

    /// Discovery did not complete in time.
    #[error("Service discovery timed out after {0:?}")]
    Timeout(Duration),
}

/// Failures mapping discovered services onto characteristic roles.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionError {
    /// The controller service is not exposed by the peripheral.
    #[error("Controller service not found (searched {service_count} services)")]
    ServiceNotFound {
        /// Number of services in the catalog.
        service_count: usize,
    },

    /// The controller service lacks a required characteristic.
    #[error("Characteristic for {role} temperature not found")]
    CharacteristicNotFound {
        /// The role that could not be resolved.
        role: CharacteristicRole,
    },
}

/// Per-operation failures.
///
/// These are returned when a request is rejected at enqueue time and are
/// carried by `SessionEvent::OperationFailed` when a dispatched operation
/// fails.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationError {
    /// The session is not in the `Ready` state.
    #[error("Session not ready (state: {state})")]
    NotReady {
        /// State at the time of the request.
        state: ConnectionState,
    },

    /// Too many requests are waiting for dispatch.
    #[error("Operation queue full ({capacity} pending)")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The role cannot be written.
    #[error("The {role} characteristic is read-only")]
    NotWritable {
        /// Requested role.
        role: CharacteristicRole,
    },

    /// The value cannot be sent to the controller.
    #[error("Invalid value: {value}")]
    InvalidValue {
        /// Rejected value.
        value: f32,
    },

    /// The link completed the operation with a failure status.
    #[error("GATT operation failed: {status}")]
    Transport {
        /// Status reported by the link.
        status: GattStatus,
    },

    /// The payload did not have the expected size.
    #[error("Unexpected payload size: expected {expected} bytes, got {actual}")]
    DecodeMismatch {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// No completion arrived before the deadline.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// Description of the operation.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },
}

impl OperationError {
    /// Create a transport error from a link status.
    pub fn transport(status: GattStatus) -> Self {
        Self::Transport { status }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }
}

/// Why a session attempt ended without reaching (or keeping) `Ready`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionFailure {
    /// The link dropped before the session was established.
    #[error("connection rejected: {status}")]
    Rejected {
        /// Status reported with the disconnect.
        status: GattStatus,
    },

    /// Service discovery failed.
    #[error("{error}")]
    Discovery {
        /// Underlying discovery error.
        error: DiscoveryError,
    },

    /// The catalog did not match the controller profile.
    #[error("{error}")]
    Resolution {
        /// Underlying resolution error.
        error: ResolutionError,
    },

    /// Connecting or discovering took longer than the connect timeout.
    #[error("timed out in state {state} after {duration:?}")]
    Timeout {
        /// State when the deadline expired.
        state: ConnectionState,
        /// The configured connect timeout.
        duration: Duration,
    },
}

impl From<DiscoveryError> for ConnectionFailure {
    fn from(error: DiscoveryError) -> Self {
        Self::Discovery { error }
    }
}

impl From<ResolutionError> for ConnectionFailure {
    fn from(error: ResolutionError) -> Self {
        Self::Resolution { error }
    }
}

/// Result type alias using brew-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
