//! Controller discovery and scanning.
//!
//! This module scans for brew controllers over Bluetooth Low Energy and
//! locates a peripheral by address for [`BleLink`](crate::BleLink).

use std::time::Duration;

use brew_types::{PeripheralAddress, uuids};
use btleplug::api::{Central, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::retry::RetryConfig;
use crate::util::{create_identifier, format_peripheral_id, is_unset_address};

/// Information about a discovered peripheral.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredController {
    /// Advertised local name.
    pub name: Option<String>,
    /// The peripheral ID for connecting.
    #[serde(skip)]
    pub id: PeripheralId,
    /// The BLE address as a string (zeros on macOS, use `identifier` instead).
    pub address: String,
    /// Address to pass to `start` (platform UUID on macOS, MAC elsewhere).
    pub identifier: String,
    /// RSSI signal strength.
    pub rssi: Option<i16>,
    /// Whether the peripheral advertises the controller service.
    pub is_controller: bool,
}

/// Options for scanning.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// How long to scan for peripherals.
    pub duration: Duration,
    /// Only return peripherals advertising the controller service.
    pub controllers_only: bool,
    /// Scan attempts made by [`find_peripheral`] before giving up.
    pub attempts: u32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            controllers_only: true,
            attempts: 3,
        }
    }
}

impl ScanOptions {
    /// Create new scan options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan duration.
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set scan duration in seconds.
    #[must_use]
    pub fn duration_secs(mut self, secs: u64) -> Self {
        self.duration = Duration::from_secs(secs);
        self
    }

    /// Set whether to filter for controllers only.
    #[must_use]
    pub fn controllers_only(mut self, filter: bool) -> Self {
        self.controllers_only = filter;
        self
    }

    /// Scan for all BLE peripherals, not just controllers.
    #[must_use]
    pub fn all_devices(self) -> Self {
        self.controllers_only(false)
    }

    /// Set the number of scan attempts when locating a peripheral.
    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// Scan for controllers in range.
///
/// An empty list means nothing was found and is not an error.
///
/// # Errors
///
/// Returns an error if no adapter is available or the scan could not be
/// started or stopped.
pub async fn scan_for_controllers() -> Result<Vec<DiscoveredController>> {
    scan_with_options(ScanOptions::default()).await
}

/// Scan with custom options.
pub async fn scan_with_options(options: ScanOptions) -> Result<Vec<DiscoveredController>> {
    let adapter = get_adapter().await?;
    scan_with_adapter(&adapter, options).await
}

/// Scan, retrying failed scans (and empty ones when `retry_on_empty`)
/// with delays from `policy`.
pub async fn scan_with_retry(
    options: ScanOptions,
    policy: &RetryConfig,
    retry_on_empty: bool,
) -> Result<Vec<DiscoveredController>> {
    let mut attempt = 0;
    loop {
        let outcome = scan_with_options(options.clone()).await;
        let should_retry = match &outcome {
            Ok(found) => found.is_empty() && retry_on_empty,
            Err(e) => !matches!(e, Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter)),
        };
        if !should_retry || attempt >= policy.max_retries {
            return outcome;
        }

        let delay = policy.delay_for_attempt(attempt);
        attempt += 1;
        match &outcome {
            Ok(_) => warn!("No controllers found, retrying ({}/{})...", attempt, policy.max_retries),
            Err(e) => warn!("Scan failed ({}), retrying ({}/{})...", e, attempt, policy.max_retries),
        }
        sleep(delay).await;
    }
}

/// Scan using a specific adapter.
pub async fn scan_with_adapter(
    adapter: &Adapter,
    options: ScanOptions,
) -> Result<Vec<DiscoveredController>> {
    info!("Starting BLE scan for {:?}...", options.duration);

    adapter.start_scan(ScanFilter::default()).await?;
    sleep(options.duration).await;
    adapter.stop_scan().await?;

    let peripherals = adapter.peripherals().await?;
    let mut discovered = Vec::new();

    for peripheral in peripherals {
        match describe_peripheral(&peripheral).await {
            Ok(Some(found)) if found.is_controller || !options.controllers_only => {
                debug!("Found {:?} ({})", found.name, found.identifier);
                discovered.push(found);
            }
            Ok(_) => {}
            Err(e) => debug!("Error processing peripheral: {}", e),
        }
    }

    info!("Scan complete. Found {} peripheral(s)", discovered.len());
    Ok(discovered)
}

async fn describe_peripheral(peripheral: &Peripheral) -> Result<Option<DiscoveredController>> {
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };

    let id = peripheral.id();
    let address = properties.address.to_string();
    let identifier = create_identifier(&address, &id);

    Ok(Some(DiscoveredController {
        name: properties.local_name.clone(),
        is_controller: advertises_controller(&properties),
        id,
        address,
        identifier,
        rssi: properties.rssi,
    }))
}

/// Whether advertised data names the controller service.
fn advertises_controller(properties: &PeripheralProperties) -> bool {
    properties.services.contains(&uuids::CONTROLLER_SERVICE)
        || properties
            .service_data
            .contains_key(&uuids::CONTROLLER_SERVICE)
}

/// Locate the peripheral with `address`.
///
/// Checks peripherals the adapter already knows first, then makes
/// `options.attempts` scans of increasing length. Advertisements are easy
/// to miss, so a single scan is often not enough.
///
/// # Errors
///
/// Returns [`Error::DeviceNotFound`] if no attempt finds the peripheral.
pub async fn find_peripheral(
    adapter: &Adapter,
    address: &PeripheralAddress,
    options: &ScanOptions,
) -> Result<Peripheral> {
    info!(%address, "Looking for peripheral");

    if let Some(peripheral) = find_known_peripheral(adapter, address).await? {
        debug!("Found peripheral in cache (no scan needed)");
        return Ok(peripheral);
    }

    let attempts = options.attempts.max(1);
    let base_duration = (options.duration / 2).max(Duration::from_secs(2));

    for attempt in 1..=attempts {
        let scan_duration = base_duration * attempt;
        info!("Scan attempt {}/{} ({:?})...", attempt, attempts, scan_duration);

        adapter.start_scan(ScanFilter::default()).await?;
        sleep(scan_duration).await;
        adapter.stop_scan().await?;

        if let Some(peripheral) = find_known_peripheral(adapter, address).await? {
            info!("Found peripheral on attempt {}", attempt);
            return Ok(peripheral);
        }
    }

    warn!("Peripheral not found after {} attempts: {}", attempts, address);
    Err(Error::device_not_found(address.as_str()))
}

/// Search the adapter's known peripherals for `address`.
async fn find_known_peripheral(
    adapter: &Adapter,
    address: &PeripheralAddress,
) -> Result<Option<Peripheral>> {
    for peripheral in adapter.peripherals().await? {
        let Ok(Some(props)) = peripheral.properties().await else {
            continue;
        };

        // macOS identifies peripherals by UUID
        let peripheral_id = format_peripheral_id(&peripheral.id());
        if address.matches(&peripheral_id) {
            debug!("Matched by peripheral ID: {}", peripheral_id);
            return Ok(Some(peripheral));
        }

        let reported = props.address.to_string();
        if !is_unset_address(&reported) && address.matches(&reported) {
            debug!("Matched by address: {}", reported);
            return Ok(Some(peripheral));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_options_builder() {
        let options = ScanOptions::new().duration_secs(8).all_devices().attempts(0);
        assert_eq!(options.duration, Duration::from_secs(8));
        assert!(!options.controllers_only);
        assert_eq!(options.attempts, 1);
    }

    #[test]
    fn test_default_scan_options() {
        let options = ScanOptions::default();
        assert!(options.controllers_only);
        assert_eq!(options.attempts, 3);
    }

    #[test]
    fn test_advertises_controller() {
        let mut props = PeripheralProperties::default();
        assert!(!advertises_controller(&props));

        props.services.push(uuids::CONTROLLER_SERVICE);
        assert!(advertises_controller(&props));

        let mut props = PeripheralProperties::default();
        props
            .service_data
            .insert(uuids::CONTROLLER_SERVICE, vec![0x01]);
        assert!(advertises_controller(&props));
    }
}
