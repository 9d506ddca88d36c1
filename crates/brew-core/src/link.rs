//! The low-level GATT link abstraction.
//!
//! A [`GattLink`] wraps connect, discovery, read, write and notification
//! enablement against one peripheral. Every primitive returns immediately;
//! completions arrive later on the link event channel as [`LinkMessage`]s
//! stamped with the [`Generation`] passed to [`GattLink::connect`].
//!
//! Two implementations ship with the crate: [`BleLink`](crate::BleLink) on
//! top of btleplug and [`MockLink`](crate::MockLink) for tests.

use std::fmt;

use brew_types::PeripheralAddress;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ConnectError;

/// Completion status reported by the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "code", rename_all = "snake_case")]
pub enum GattStatus {
    /// The operation succeeded.
    Success,
    /// The operation failed with a platform status code.
    Failure(u16),
}

impl GattStatus {
    /// Generic GATT failure code used when the platform gives no detail.
    pub const GATT_FAILURE: u16 = 0x0101;

    /// A generic failure.
    #[must_use]
    pub fn failure() -> Self {
        GattStatus::Failure(Self::GATT_FAILURE)
    }

    /// Whether the operation succeeded.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, GattStatus::Success)
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GattStatus::Success => write!(f, "success"),
            GattStatus::Failure(code) => write!(f, "failure (0x{:04X})", code),
        }
    }
}

/// Session generation counter.
///
/// Bumped on every start and every teardown. Link events carrying an older
/// generation are stale and ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Generation(u64);

impl Generation {
    /// Create a generation from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The following generation.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Raw counter value.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}

/// Identifier of a single dispatched operation, echoed back in its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationTicket(u64);

impl OperationTicket {
    /// Create a ticket from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw ticket value.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Opaque reference to a discovered characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicHandle {
    service_uuid: Uuid,
    uuid: Uuid,
}

impl CharacteristicHandle {
    pub fn new(service_uuid: Uuid, uuid: Uuid) -> Self {
        Self { service_uuid, uuid }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid
    }
}

impl fmt::Display for CharacteristicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service_uuid, self.uuid)
    }
}

/// Characteristic capabilities as advertised during discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Properties of a readable characteristic that notifies.
    #[must_use]
    pub fn read_notify() -> Self {
        Self {
            read: true,
            notify: true,
            ..Self::default()
        }
    }

    /// Properties of a readable, writable characteristic that notifies.
    #[must_use]
    pub fn read_write_notify() -> Self {
        Self {
            read: true,
            write: true,
            notify: true,
            ..Self::default()
        }
    }
}

impl From<btleplug::api::CharPropFlags> for CharacteristicProperties {
    fn from(flags: btleplug::api::CharPropFlags) -> Self {
        use btleplug::api::CharPropFlags;

        Self {
            read: flags.contains(CharPropFlags::READ),
            write: flags.contains(CharPropFlags::WRITE),
            write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            notify: flags.contains(CharPropFlags::NOTIFY),
            indicate: flags.contains(CharPropFlags::INDICATE),
        }
    }
}

/// A characteristic found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredCharacteristic {
    pub handle: CharacteristicHandle,
    pub properties: CharacteristicProperties,
    /// UUIDs of the characteristic's descriptors.
    pub descriptors: Vec<Uuid>,
}

/// A service found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

impl DiscoveredService {
    /// Find a characteristic of this service by UUID.
    pub fn characteristic(&self, uuid: Uuid) -> Option<&DiscoveredCharacteristic> {
        self.characteristics.iter().find(|c| c.handle.uuid() == uuid)
    }
}

/// Full service/characteristic catalog returned by discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCatalog {
    pub services: Vec<DiscoveredService>,
}

impl ServiceCatalog {
    pub fn new(services: Vec<DiscoveredService>) -> Self {
        Self { services }
    }

    /// Find a service by UUID.
    pub fn service(&self, uuid: Uuid) -> Option<&DiscoveredService> {
        self.services.iter().find(|s| s.uuid == uuid)
    }

    /// Number of services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Total number of characteristics across all services.
    pub fn characteristic_count(&self) -> usize {
        self.services.iter().map(|s| s.characteristics.len()).sum()
    }
}

/// How a characteristic write is acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteType {
    /// The peripheral acknowledges the write.
    #[default]
    WithResponse,
    /// Fire-and-forget write command.
    WithoutResponse,
}

impl From<WriteType> for btleplug::api::WriteType {
    fn from(write_type: WriteType) -> Self {
        match write_type {
            WriteType::WithResponse => btleplug::api::WriteType::WithResponse,
            WriteType::WithoutResponse => btleplug::api::WriteType::WithoutResponse,
        }
    }
}

/// Asynchronous completions and unsolicited events from the link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The connection was established.
    Connected,
    /// The connection was lost or could not be established.
    Disconnected { status: GattStatus },
    /// Service discovery finished.
    ServicesDiscovered {
        status: GattStatus,
        catalog: ServiceCatalog,
    },
    /// A characteristic read finished.
    CharacteristicRead {
        ticket: OperationTicket,
        handle: CharacteristicHandle,
        value: Vec<u8>,
        status: GattStatus,
    },
    /// A characteristic write finished.
    CharacteristicWritten {
        ticket: OperationTicket,
        handle: CharacteristicHandle,
        status: GattStatus,
    },
    /// A descriptor write (notification enablement) finished.
    DescriptorWritten {
        ticket: OperationTicket,
        handle: CharacteristicHandle,
        descriptor: Uuid,
        status: GattStatus,
    },
    /// The peripheral pushed a new value.
    CharacteristicChanged {
        handle: CharacteristicHandle,
        value: Vec<u8>,
    },
}

impl LinkEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            LinkEvent::Connected => "connected",
            LinkEvent::Disconnected { .. } => "disconnected",
            LinkEvent::ServicesDiscovered { .. } => "services_discovered",
            LinkEvent::CharacteristicRead { .. } => "characteristic_read",
            LinkEvent::CharacteristicWritten { .. } => "characteristic_written",
            LinkEvent::DescriptorWritten { .. } => "descriptor_written",
            LinkEvent::CharacteristicChanged { .. } => "characteristic_changed",
        }
    }
}

/// A link event stamped with the generation it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkMessage {
    pub generation: Generation,
    pub event: LinkEvent,
}

impl LinkMessage {
    pub fn new(generation: Generation, event: LinkEvent) -> Self {
        Self { generation, event }
    }
}

/// Sending half of the link event channel.
pub type LinkEventSender = mpsc::UnboundedSender<LinkMessage>;

/// Receiving half of the link event channel.
pub type LinkEventReceiver = mpsc::UnboundedReceiver<LinkMessage>;

/// Create a link event channel.
pub fn link_channel() -> (LinkEventSender, LinkEventReceiver) {
    mpsc::unbounded_channel()
}

/// Callback-driven GATT primitives against a single peripheral.
///
/// Implementations must never block and must never report a completion
/// synchronously from inside a call; results go to the event channel.
pub trait GattLink: Send {
    /// Begin connecting to `address`.
    ///
    /// All events produced until the next call to `connect` carry
    /// `generation`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::AdapterUnavailable`] when no adapter can be
    /// used. Connection failures after this point arrive as
    /// [`LinkEvent::Disconnected`].
    fn connect(
        &mut self,
        address: &PeripheralAddress,
        generation: Generation,
    ) -> Result<(), ConnectError>;

    /// Tear down any active connection. No-op when disconnected.
    fn disconnect(&mut self);

    /// Discover services; completes with [`LinkEvent::ServicesDiscovered`].
    fn discover_services(&mut self);

    /// Read a characteristic; completes with [`LinkEvent::CharacteristicRead`].
    fn read_characteristic(&mut self, ticket: OperationTicket, handle: &CharacteristicHandle);

    /// Write a characteristic; completes with [`LinkEvent::CharacteristicWritten`].
    fn write_characteristic(
        &mut self,
        ticket: OperationTicket,
        handle: &CharacteristicHandle,
        value: Vec<u8>,
        write_type: WriteType,
    );

    /// Enable notifications by writing the CCCD; completes with
    /// [`LinkEvent::DescriptorWritten`].
    fn enable_notifications(&mut self, ticket: OperationTicket, handle: &CharacteristicHandle);
}

impl<L: GattLink + ?Sized> GattLink for Box<L> {
    fn connect(
        &mut self,
        address: &PeripheralAddress,
        generation: Generation,
    ) -> Result<(), ConnectError> {
        (**self).connect(address, generation)
    }

    fn disconnect(&mut self) {
        (**self).disconnect();
    }

    fn discover_services(&mut self) {
        (**self).discover_services();
    }

    fn read_characteristic(&mut self, ticket: OperationTicket, handle: &CharacteristicHandle) {
        (**self).read_characteristic(ticket, handle);
    }

    fn write_characteristic(
        &mut self,
        ticket: OperationTicket,
        handle: &CharacteristicHandle,
        value: Vec<u8>,
        write_type: WriteType,
    ) {
        (**self).write_characteristic(ticket, handle, value, write_type);
    }

    fn enable_notifications(&mut self, ticket: OperationTicket, handle: &CharacteristicHandle) {
        (**self).enable_notifications(ticket, handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brew_types::{CharacteristicRole, uuids};

    #[test]
    fn test_gatt_status_display() {
        assert_eq!(GattStatus::Success.to_string(), "success");
        assert_eq!(GattStatus::failure().to_string(), "failure (0x0101)");
        assert!(!GattStatus::Failure(133).is_success());
    }

    #[test]
    fn test_generation_ordering() {
        let first = Generation::default();
        let second = first.next();
        assert!(second > first);
        assert_eq!(second.value(), 1);
        assert_eq!(second.to_string(), "gen#1");
    }

    #[test]
    fn test_catalog_lookup() {
        let role = CharacteristicRole::RealtimeTemperature;
        let catalog = ServiceCatalog::new(vec![DiscoveredService {
            uuid: uuids::CONTROLLER_SERVICE,
            characteristics: vec![DiscoveredCharacteristic {
                handle: CharacteristicHandle::new(role.service_uuid(), role.uuid()),
                properties: CharacteristicProperties::read_notify(),
                descriptors: vec![uuids::CLIENT_CHARACTERISTIC_CONFIG],
            }],
        }]);

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.characteristic_count(), 1);
        let service = catalog.service(uuids::CONTROLLER_SERVICE).unwrap();
        assert!(service.characteristic(role.uuid()).is_some());
        assert!(
            service
                .characteristic(uuids::DESTINATION_TEMPERATURE)
                .is_none()
        );
        assert!(catalog.service(uuids::CLIENT_CHARACTERISTIC_CONFIG).is_none());
    }

    #[test]
    fn test_char_prop_flags_conversion() {
        use btleplug::api::CharPropFlags;

        let props: CharacteristicProperties = (CharPropFlags::READ | CharPropFlags::NOTIFY).into();
        assert_eq!(props, CharacteristicProperties::read_notify());
    }

    #[test]
    fn test_write_type_default_is_with_response() {
        assert_eq!(WriteType::default(), WriteType::WithResponse);
        assert_eq!(
            btleplug::api::WriteType::from(WriteType::WithoutResponse),
            btleplug::api::WriteType::WithoutResponse
        );
    }
}
