//! Helpers for turning btleplug identifiers into strings.

use btleplug::platform::PeripheralId;

/// Address CoreBluetooth reports for every peripheral.
pub const UNSET_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS peripheral IDs are UUIDs; elsewhere they wrap the MAC address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Whether an adapter-reported address carries no information.
pub fn is_unset_address(address: &str) -> bool {
    address.is_empty() || address == UNSET_ADDRESS
}

/// Connection identifier for a peripheral: its MAC address, or the
/// platform ID where the address is hidden.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if is_unset_address(address) {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}
