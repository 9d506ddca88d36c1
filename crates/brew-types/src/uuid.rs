//! Bluetooth UUIDs for the brew controller.
//!
//! The controller exposes a single custom service with two temperature
//! characteristics. Notifications are enabled through the standard
//! client characteristic configuration descriptor.

use uuid::{Uuid, uuid};

// --- Brew controller service ---

/// Brew controller custom service UUID.
pub const CONTROLLER_SERVICE: Uuid = uuid!("dce32293-581b-4ce1-b9b0-29634f77e412");

// --- Brew controller characteristics ---

/// Real-time temperature measurement (read, notify).
pub const REALTIME_TEMPERATURE: Uuid = uuid!("beb5483e-36e1-4688-b7f5-ea07361b26a8");

/// Destination (setpoint) temperature (read, write, notify).
pub const DESTINATION_TEMPERATURE: Uuid = uuid!("3625d6cc-3226-4497-9d42-a6df047f4300");

// --- Standard descriptors ---

/// Client Characteristic Configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// CCCD value that enables notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value that disables notifications and indications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];
