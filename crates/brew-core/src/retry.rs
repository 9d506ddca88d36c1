//! Retry and backoff policy.
//!
//! [`RetryConfig`] drives two things: [`with_retry`] for one-shot async
//! calls such as locating and connecting a peripheral, and the session
//! runtime's reconnect schedule via [`RetryConfig::delay_for_attempt`].
//!
//! # Example
//!
//! ```
//! use brew_core::{RetryConfig, with_retry, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! let policy = RetryConfig::for_connect().jitter(false);
//!
//! let value = with_retry(&policy, "connect", || async {
//!     Ok::<_, Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{Error, OperationError, Result};

/// Largest extra fraction added to a delay when jitter is enabled.
const JITTER_FRACTION: f64 = 0.25;

/// Backoff schedule for retried attempts.
///
/// Delay `n` (zero-based) is `initial_delay * backoff_multiplier^n`, capped
/// at `max_delay`, then stretched by up to 25% when `jitter` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts after the first one. Zero disables retrying.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 1.0 keeps the delay constant.
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::preset(3, Duration::from_millis(100), Duration::from_secs(5), 2.0)
    }
}

impl RetryConfig {
    const fn preset(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
            jitter: true,
        }
    }

    /// Default schedule with `max_retries` retries.
    pub fn new(max_retries: u32) -> Self {
        Self::default().max_retries(max_retries)
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Locating a peripheral by scanning.
    ///
    /// Controllers advertise at intervals, so several short attempts beat
    /// one long one.
    pub fn for_scan() -> Self {
        Self::preset(3, Duration::from_millis(200), Duration::from_secs(2), 1.5)
    }

    /// Establishing the BLE connection.
    pub fn for_connect() -> Self {
        Self::preset(2, Duration::from_secs(1), Duration::from_secs(10), 2.0)
    }

    /// Re-establishing a session after the link dropped.
    ///
    /// A controller that just lost its link can take several seconds to
    /// advertise again.
    pub fn for_reconnect() -> Self {
        Self::preset(5, Duration::from_secs(2), Duration::from_secs(30), 2.0)
    }

    /// Short deterministic delays, mostly useful in tests.
    pub fn quick() -> Self {
        Self::preset(2, Duration::from_millis(50), Duration::from_millis(500), 2.0).jitter(false)
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Total number of attempts, the first one included.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Check the settings for values that cannot produce a schedule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a non-finite or sub-1.0
    /// multiplier, or a maximum delay shorter than the initial delay.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::invalid_config(format!(
                "backoff_multiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config(format!(
                "max_delay ({:?}) is shorter than initial_delay ({:?})",
                self.max_delay, self.initial_delay
            )));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let growth = self.backoff_multiplier.powi(exponent);
        let secs = (self.initial_delay.as_secs_f64() * growth).min(self.max_delay.as_secs_f64());

        let stretch = if self.jitter {
            rand::rng().random_range(1.0..=1.0 + JITTER_FRACTION)
        } else {
            1.0
        };
        Duration::from_secs_f64(secs * stretch)
    }
}

/// Run `operation` until it succeeds, fails with an error that will not go
/// away on its own, or uses up the attempts allowed by `policy`.
///
/// The error of the last attempt is returned.
pub async fn with_retry<F, Fut, T>(policy: &RetryConfig, label: &str, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        let error = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    debug!(operation = label, retries, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if retries >= policy.max_retries || !is_transient(&error) {
            return Err(error);
        }

        let delay = policy.delay_for_attempt(retries);
        retries += 1;
        warn!(
            operation = label,
            attempt = retries,
            of = policy.attempts(),
            ?delay,
            "Attempt failed: {}",
            error
        );
        tokio::time::sleep(delay).await;
    }
}

/// Whether repeating the call could plausibly give a different result.
fn is_transient(error: &Error) -> bool {
    match error {
        Error::Timeout { .. } | Error::Bluetooth(_) => true,
        Error::Operation(op) => matches!(
            op,
            OperationError::Transport { .. } | OperationError::Timeout { .. }
        ),
        Error::Discovery(_)
        | Error::Resolution(_)
        | Error::DeviceNotFound(_)
        | Error::Connect(_)
        | Error::InvalidConfig(_)
        | Error::SessionClosed => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeviceNotFoundReason, ResolutionError};
    use crate::link::GattStatus;
    use std::cell::Cell;

    /// Fails with `error` for the first `failures` calls, then returns the call count.
    async fn flaky(calls: &Cell<u32>, failures: u32, error: fn() -> Error) -> Result<u32> {
        let n = calls.get() + 1;
        calls.set(n);
        if n <= failures { Err(error()) } else { Ok(n) }
    }

    fn link_timeout() -> Error {
        Error::timeout("connect", Duration::from_secs(1))
    }

    #[test]
    fn test_presets_are_valid() {
        for policy in [
            RetryConfig::default(),
            RetryConfig::none(),
            RetryConfig::for_scan(),
            RetryConfig::for_connect(),
            RetryConfig::for_reconnect(),
            RetryConfig::quick(),
        ] {
            assert!(policy.validate().is_ok(), "{:?}", policy);
        }
        assert_eq!(RetryConfig::none().attempts(), 1);
        assert_eq!(RetryConfig::new(u32::MAX).attempts(), u32::MAX);
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RetryConfig::new(5)
            .initial_delay(Duration::from_millis(250))
            .max_delay(Duration::from_secs(1))
            .jitter(false);

        let delays: Vec<_> = (0..4).map(|n| policy.delay_for_attempt(n)).collect();
        assert_eq!(
            delays,
            [
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ]
        );
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_only_stretches() {
        let policy = RetryConfig::for_reconnect();
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_millis(2500));
        }
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        assert!(RetryConfig::default().backoff_multiplier(0.5).validate().is_err());
        assert!(
            RetryConfig::default()
                .backoff_multiplier(f64::INFINITY)
                .validate()
                .is_err()
        );
        let inverted = RetryConfig::default()
            .initial_delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(1));
        assert!(matches!(inverted.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&link_timeout()));
        assert!(is_transient(&Error::Operation(OperationError::transport(
            GattStatus::failure()
        ))));
        assert!(!is_transient(&Error::Resolution(
            ResolutionError::ServiceNotFound { service_count: 2 }
        )));
        assert!(!is_transient(&Error::DeviceNotFound(
            DeviceNotFoundReason::NotFound {
                identifier: "C4:4F:33:53:7A:57".to_string()
            }
        )));
        assert!(!is_transient(&Error::SessionClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers() {
        let calls = Cell::new(0);
        let result = with_retry(&RetryConfig::quick(), "connect", || {
            flaky(&calls, 2, link_timeout)
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_returns_last_error() {
        let calls = Cell::new(0);
        let result = with_retry(&RetryConfig::new(2), "connect", || {
            flaky(&calls, u32::MAX, link_timeout)
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_stops_on_permanent_error() {
        let calls = Cell::new(0);
        let result = with_retry(&RetryConfig::new(3), "connect", || {
            flaky(&calls, u32::MAX, || Error::invalid_config("bad"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
