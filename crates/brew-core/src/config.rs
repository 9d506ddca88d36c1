//! Session configuration.

use std::time::Duration;

use brew_types::DestinationEncoding;

use crate::error::{Error, Result};
use crate::link::WriteType;
use crate::retry::RetryConfig;

/// Default time allowed for connecting and discovering services.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default deadline for a single read, write or subscription.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on requests waiting for dispatch.
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 32;

/// Configuration for a [`SessionController`](crate::SessionController).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use brew_core::{SessionConfig, RetryConfig};
/// use brew_types::DestinationEncoding;
///
/// let config = SessionConfig::default()
///     .operation_timeout(Duration::from_secs(5))
///     .read_retries(2)
///     .destination_encoding(DestinationEncoding::Float)
///     .reconnect(RetryConfig::for_reconnect());
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Deadline for reaching `Ready` after `start`.
    pub connect_timeout: Duration,
    /// Deadline for each dispatched operation.
    pub operation_timeout: Duration,
    /// Times a failed read is re-dispatched before it is surfaced.
    pub read_retries: u32,
    /// Maximum number of requests waiting behind the in-flight operation.
    pub max_queue_depth: usize,
    /// How destination temperatures are written.
    pub destination_encoding: DestinationEncoding,
    /// Write type used for destination writes.
    pub write_type: WriteType,
    /// Also subscribe to destination temperature notifications.
    pub notify_destination: bool,
    /// Read both temperatures once the session is ready.
    pub initial_read: bool,
    /// Reconnect policy used by the session runtime, if any.
    pub reconnect: Option<RetryConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            read_retries: 0,
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            destination_encoding: DestinationEncoding::default(),
            write_type: WriteType::default(),
            notify_destination: false,
            initial_read: true,
            reconnect: None,
        }
    }
}

impl SessionConfig {
    /// Create a new session config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config for challenging RF environments.
    ///
    /// Uses longer timeouts and retries reads once.
    pub fn challenging_environment() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(15),
            read_retries: 1,
            ..Self::default()
        }
    }

    /// Create a config for nearby controllers with a strong signal.
    pub fn fast() -> Self {
        Self {
            connect_timeout: Duration::from_secs(8),
            operation_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-operation timeout.
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the number of read retries.
    #[must_use]
    pub fn read_retries(mut self, retries: u32) -> Self {
        self.read_retries = retries;
        self
    }

    /// Set the queue bound.
    #[must_use]
    pub fn max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set the destination encoding.
    #[must_use]
    pub fn destination_encoding(mut self, encoding: DestinationEncoding) -> Self {
        self.destination_encoding = encoding;
        self
    }

    /// Set the write type for destination writes.
    #[must_use]
    pub fn write_type(mut self, write_type: WriteType) -> Self {
        self.write_type = write_type;
        self
    }

    /// Subscribe to destination notifications as well as realtime ones.
    #[must_use]
    pub fn notify_destination(mut self, enabled: bool) -> Self {
        self.notify_destination = enabled;
        self
    }

    /// Enable or disable the initial reads after discovery.
    #[must_use]
    pub fn initial_read(mut self, enabled: bool) -> Self {
        self.initial_read = enabled;
        self
    }

    /// Enable automatic reconnection with the given policy.
    #[must_use]
    pub fn reconnect(mut self, policy: RetryConfig) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Check that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for zero timeouts, a zero queue depth,
    /// or an invalid reconnect policy.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::invalid_config("connect_timeout must be non-zero"));
        }
        if self.operation_timeout.is_zero() {
            return Err(Error::invalid_config("operation_timeout must be non-zero"));
        }
        if self.max_queue_depth == 0 {
            return Err(Error::invalid_config("max_queue_depth must be non-zero"));
        }
        if let Some(policy) = &self.reconnect {
            policy.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.operation_timeout, Duration::from_secs(10));
        assert_eq!(config.read_retries, 0);
        assert_eq!(config.max_queue_depth, 32);
        assert_eq!(config.destination_encoding, DestinationEncoding::Text);
        assert_eq!(config.write_type, WriteType::WithResponse);
        assert!(!config.notify_destination);
        assert!(config.initial_read);
        assert!(config.reconnect.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(SessionConfig::fast().validate().is_ok());
        assert!(SessionConfig::challenging_environment().validate().is_ok());
        assert!(
            SessionConfig::fast().operation_timeout
                < SessionConfig::challenging_environment().operation_timeout
        );
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::new()
            .connect_timeout(Duration::from_secs(3))
            .max_queue_depth(8)
            .write_type(WriteType::WithoutResponse)
            .notify_destination(true)
            .initial_read(false);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.max_queue_depth, 8);
        assert_eq!(config.write_type, WriteType::WithoutResponse);
        assert!(config.notify_destination);
        assert!(!config.initial_read);
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let err = SessionConfig::default()
            .operation_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("operation_timeout"));

        assert!(
            SessionConfig::default()
                .connect_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_validate_rejects_empty_queue() {
        let err = SessionConfig::default()
            .max_queue_depth(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(SessionConfig::default().max_queue_depth(1).validate().is_ok());
    }

    #[test]
    fn test_validate_checks_reconnect_policy() {
        let config = SessionConfig::default().reconnect(RetryConfig::default().backoff_multiplier(0.0));
        assert!(config.validate().is_err());
    }
}
