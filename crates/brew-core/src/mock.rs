//! Mock link implementation for testing.
//!
//! [`MockLink`] implements [`GattLink`] without BLE hardware. It records
//! every primitive it is asked to perform in an [`OpLog`]. Created with
//! [`MockLink::responsive`], it is also backed by a scripted
//! [`MockPeripheral`] that answers on the link event channel the way a
//! controller would.
//!
//! # Features
//!
//! - **Recording**: inspect issued primitives through a shared [`OpLog`]
//! - **Failure injection**: reject connections, fail or swallow reads
//! - **Scripted values**: set temperatures, push notifications, drop the link

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use brew_types::{
    CharacteristicRole, DestinationEncoding, PeripheralAddress, decode_temperature,
    encode_temperature, uuids,
};
use uuid::Uuid;

use crate::error::ConnectError;
use crate::link::{
    CharacteristicHandle, CharacteristicProperties, DiscoveredCharacteristic, DiscoveredService,
    GattLink, GattStatus, Generation, LinkEvent, LinkEventSender, LinkMessage, OperationTicket,
    ServiceCatalog, WriteType,
};

/// Status a real adapter reports when the peripheral goes out of range.
const SUPERVISION_TIMEOUT: GattStatus = GattStatus::Failure(0x08);

/// Catalog of a controller exposing both temperature characteristics.
pub fn controller_catalog() -> ServiceCatalog {
    let characteristic = |role: CharacteristicRole| DiscoveredCharacteristic {
        handle: CharacteristicHandle::new(role.service_uuid(), role.uuid()),
        properties: if role.is_writable() {
            CharacteristicProperties::read_write_notify()
        } else {
            CharacteristicProperties::read_notify()
        },
        descriptors: vec![uuids::CLIENT_CHARACTERISTIC_CONFIG],
    };

    ServiceCatalog::new(vec![DiscoveredService {
        uuid: uuids::CONTROLLER_SERVICE,
        characteristics: CharacteristicRole::ALL.map(characteristic).to_vec(),
    }])
}

/// Controller catalog with one role's characteristic removed.
pub fn catalog_without(role: CharacteristicRole) -> ServiceCatalog {
    let mut catalog = controller_catalog();
    for service in &mut catalog.services {
        service
            .characteristics
            .retain(|c| c.handle.uuid() != role.uuid());
    }
    catalog
}

/// A primitive issued to a [`MockLink`].
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOp {
    Connect {
        address: String,
        generation: Generation,
    },
    Disconnect,
    DiscoverServices,
    Read {
        ticket: OperationTicket,
        handle: CharacteristicHandle,
    },
    Write {
        ticket: OperationTicket,
        handle: CharacteristicHandle,
        value: Vec<u8>,
        write_type: WriteType,
    },
    EnableNotifications {
        ticket: OperationTicket,
        handle: CharacteristicHandle,
    },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Shared record of the primitives issued to a [`MockLink`].
#[derive(Debug, Clone, Default)]
pub struct OpLog(Arc<Mutex<Vec<LinkOp>>>);

impl OpLog {
    fn push(&self, op: LinkOp) {
        lock(&self.0).push(op);
    }

    /// Copy of all recorded primitives.
    pub fn snapshot(&self) -> Vec<LinkOp> {
        lock(&self.0).clone()
    }

    /// The most recent primitive.
    pub fn last(&self) -> Option<LinkOp> {
        lock(&self.0).last().cloned()
    }

    /// Number of recorded primitives matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&LinkOp) -> bool) -> usize {
        lock(&self.0).iter().filter(|op| predicate(op)).count()
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.0).clear();
    }
}

/// A mock GATT link for testing.
///
/// # Example
///
/// ```
/// use brew_core::{GattLink, Generation, MockLink, mock::LinkOp};
/// use brew_types::PeripheralAddress;
///
/// let mut link = MockLink::new();
/// let address = PeripheralAddress::parse("C4:4F:33:53:7A:57").unwrap();
/// link.connect(&address, Generation::new(1)).unwrap();
/// link.discover_services();
///
/// assert_eq!(link.ops().last(), Some(LinkOp::DiscoverServices));
/// ```
#[derive(Debug, Default)]
pub struct MockLink {
    ops: OpLog,
    connect_error: Option<ConnectError>,
    peripheral: Option<MockPeripheral>,
}

impl MockLink {
    /// A link that records primitives and never answers.
    pub fn new() -> Self {
        Self::default()
    }

    /// A link backed by a scripted controller that answers on `events`.
    pub fn responsive(events: LinkEventSender) -> (Self, MockPeripheral) {
        let peripheral = MockPeripheral::new(events);
        let link = Self {
            peripheral: Some(peripheral.clone()),
            ..Self::default()
        };
        (link, peripheral)
    }

    /// Make every `connect` call fail synchronously with `error`.
    #[must_use]
    pub fn fail_connect(mut self, error: ConnectError) -> Self {
        self.connect_error = Some(error);
        self
    }

    /// Shared log of issued primitives.
    pub fn ops(&self) -> OpLog {
        self.ops.clone()
    }
}

impl GattLink for MockLink {
    fn connect(
        &mut self,
        address: &PeripheralAddress,
        generation: Generation,
    ) -> Result<(), ConnectError> {
        if let Some(error) = &self.connect_error {
            return Err(error.clone());
        }
        self.ops.push(LinkOp::Connect {
            address: address.to_string(),
            generation,
        });
        if let Some(peripheral) = &self.peripheral {
            peripheral.on_connect(generation);
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.ops.push(LinkOp::Disconnect);
        if let Some(peripheral) = &self.peripheral {
            peripheral.on_disconnect();
        }
    }

    fn discover_services(&mut self) {
        self.ops.push(LinkOp::DiscoverServices);
        if let Some(peripheral) = &self.peripheral {
            peripheral.on_discover();
        }
    }

    fn read_characteristic(&mut self, ticket: OperationTicket, handle: &CharacteristicHandle) {
        self.ops.push(LinkOp::Read {
            ticket,
            handle: handle.clone(),
        });
        if let Some(peripheral) = &self.peripheral {
            peripheral.on_read(ticket, handle);
        }
    }

    fn write_characteristic(
        &mut self,
        ticket: OperationTicket,
        handle: &CharacteristicHandle,
        value: Vec<u8>,
        write_type: WriteType,
    ) {
        if let Some(peripheral) = &self.peripheral {
            peripheral.on_write(ticket, handle, &value);
        }
        self.ops.push(LinkOp::Write {
            ticket,
            handle: handle.clone(),
            value,
            write_type,
        });
    }

    fn enable_notifications(&mut self, ticket: OperationTicket, handle: &CharacteristicHandle) {
        self.ops.push(LinkOp::EnableNotifications {
            ticket,
            handle: handle.clone(),
        });
        if let Some(peripheral) = &self.peripheral {
            peripheral.on_enable_notifications(ticket, handle);
        }
    }
}

#[derive(Debug)]
struct PeripheralState {
    generation: Generation,
    catalog: ServiceCatalog,
    values: HashMap<Uuid, Vec<u8>>,
    subscribed: HashSet<Uuid>,
    reject_status: Option<GattStatus>,
    write_encoding: DestinationEncoding,
}

#[derive(Debug)]
struct PeripheralShared {
    events: LinkEventSender,
    state: Mutex<PeripheralState>,
    connected: AtomicBool,
    silent_reads: AtomicBool,
    remaining_read_failures: AtomicU32,
    read_count: AtomicU32,
}

/// Scripted controller behind a responsive [`MockLink`].
///
/// Cloning shares the same peripheral.
#[derive(Debug, Clone)]
pub struct MockPeripheral {
    shared: Arc<PeripheralShared>,
}

impl MockPeripheral {
    fn new(events: LinkEventSender) -> Self {
        let values = [
            (uuids::REALTIME_TEMPERATURE, encode_temperature(20.0).to_vec()),
            (uuids::DESTINATION_TEMPERATURE, encode_temperature(65.0).to_vec()),
        ]
        .into_iter()
        .collect();

        Self {
            shared: Arc::new(PeripheralShared {
                events,
                state: Mutex::new(PeripheralState {
                    generation: Generation::default(),
                    catalog: controller_catalog(),
                    values,
                    subscribed: HashSet::new(),
                    reject_status: None,
                    write_encoding: DestinationEncoding::default(),
                }),
                connected: AtomicBool::new(false),
                silent_reads: AtomicBool::new(false),
                remaining_read_failures: AtomicU32::new(0),
                read_count: AtomicU32::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PeripheralState> {
        lock(&self.shared.state)
    }

    fn send(&self, generation: Generation, event: LinkEvent) {
        let _ = self
            .shared
            .events
            .send(LinkMessage::new(generation, event));
    }

    // ==================== Scripting ====================

    /// Set the temperature served for a role.
    pub fn set_temperature(&self, role: CharacteristicRole, value: f32) {
        self.set_raw(role, encode_temperature(value).to_vec());
    }

    /// Set the raw payload served for a role.
    pub fn set_raw(&self, role: CharacteristicRole, payload: Vec<u8>) {
        self.state().values.insert(role.uuid(), payload);
    }

    /// Temperature currently stored for a role.
    pub fn temperature(&self, role: CharacteristicRole) -> Option<f32> {
        self.state()
            .values
            .get(&role.uuid())
            .and_then(|payload| decode_temperature(payload).ok())
    }

    /// Replace the catalog returned by discovery.
    pub fn set_catalog(&self, catalog: ServiceCatalog) {
        self.state().catalog = catalog;
    }

    /// Answer connection attempts with a disconnect carrying `status`.
    pub fn reject_connections(&self, status: Option<GattStatus>) {
        self.state().reject_status = status;
    }

    /// How written setpoints are decoded.
    pub fn set_write_encoding(&self, encoding: DestinationEncoding) {
        self.state().write_encoding = encoding;
    }

    /// Fail the next `count` reads with a generic GATT failure.
    pub fn fail_next_reads(&self, count: u32) {
        self.shared
            .remaining_read_failures
            .store(count, Ordering::SeqCst);
    }

    /// Never answer reads.
    pub fn set_silent_reads(&self, silent: bool) {
        self.shared.silent_reads.store(silent, Ordering::SeqCst);
    }

    /// Push a notification for a role, if the client subscribed to it.
    ///
    /// Returns whether a notification was sent.
    pub fn notify(&self, role: CharacteristicRole, payload: Vec<u8>) -> bool {
        let (generation, subscribed) = {
            let state = self.state();
            (state.generation, state.subscribed.contains(&role.uuid()))
        };
        if !subscribed || !self.is_connected() {
            return false;
        }
        self.send(
            generation,
            LinkEvent::CharacteristicChanged {
                handle: CharacteristicHandle::new(role.service_uuid(), role.uuid()),
                value: payload,
            },
        );
        true
    }

    /// Simulate the peripheral going out of range.
    pub fn drop_connection(&self) {
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            let generation = {
                let mut state = self.state();
                state.subscribed.clear();
                state.generation
            };
            self.send(
                generation,
                LinkEvent::Disconnected {
                    status: SUPERVISION_TIMEOUT,
                },
            );
        }
    }

    // ==================== Inspection ====================

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self, role: CharacteristicRole) -> bool {
        self.state().subscribed.contains(&role.uuid())
    }

    /// Number of reads served so far.
    pub fn read_count(&self) -> u32 {
        self.shared.read_count.load(Ordering::SeqCst)
    }

    // ==================== Link callbacks ====================

    fn on_connect(&self, generation: Generation) {
        let reject = {
            let mut state = self.state();
            state.generation = generation;
            state.subscribed.clear();
            state.reject_status
        };
        match reject {
            Some(status) => self.send(generation, LinkEvent::Disconnected { status }),
            None => {
                self.shared.connected.store(true, Ordering::SeqCst);
                self.send(generation, LinkEvent::Connected);
            }
        }
    }

    fn on_disconnect(&self) {
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            let generation = {
                let mut state = self.state();
                state.subscribed.clear();
                state.generation
            };
            self.send(
                generation,
                LinkEvent::Disconnected {
                    status: GattStatus::Success,
                },
            );
        }
    }

    fn on_discover(&self) {
        let (generation, catalog) = {
            let state = self.state();
            (state.generation, state.catalog.clone())
        };
        self.send(
            generation,
            LinkEvent::ServicesDiscovered {
                status: GattStatus::Success,
                catalog,
            },
        );
    }

    fn on_read(&self, ticket: OperationTicket, handle: &CharacteristicHandle) {
        if self.shared.silent_reads.load(Ordering::SeqCst) {
            return;
        }
        self.shared.read_count.fetch_add(1, Ordering::SeqCst);

        let (generation, stored) = {
            let state = self.state();
            (state.generation, state.values.get(&handle.uuid()).cloned())
        };
        let failing = self
            .shared
            .remaining_read_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let (value, status) = match stored {
            Some(value) if !failing => (value, GattStatus::Success),
            _ => (Vec::new(), GattStatus::failure()),
        };
        self.send(
            generation,
            LinkEvent::CharacteristicRead {
                ticket,
                handle: handle.clone(),
                value,
                status,
            },
        );
    }

    fn on_write(&self, ticket: OperationTicket, handle: &CharacteristicHandle, payload: &[u8]) {
        let (generation, status, notification) = {
            let mut state = self.state();
            match state.write_encoding.decode(payload) {
                Ok(value) => {
                    let stored = encode_temperature(value).to_vec();
                    state.values.insert(handle.uuid(), stored.clone());
                    let notify = state.subscribed.contains(&handle.uuid());
                    (state.generation, GattStatus::Success, notify.then_some(stored))
                }
                Err(_) => (state.generation, GattStatus::failure(), None),
            }
        };

        self.send(
            generation,
            LinkEvent::CharacteristicWritten {
                ticket,
                handle: handle.clone(),
                status,
            },
        );
        if let Some(value) = notification {
            self.send(
                generation,
                LinkEvent::CharacteristicChanged {
                    handle: handle.clone(),
                    value,
                },
            );
        }
    }

    fn on_enable_notifications(&self, ticket: OperationTicket, handle: &CharacteristicHandle) {
        let generation = {
            let mut state = self.state();
            state.subscribed.insert(handle.uuid());
            state.generation
        };
        self.send(
            generation,
            LinkEvent::DescriptorWritten {
                ticket,
                handle: handle.clone(),
                descriptor: uuids::CLIENT_CHARACTERISTIC_CONFIG,
                status: GattStatus::Success,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::link_channel;

    const REALTIME: CharacteristicRole = CharacteristicRole::RealtimeTemperature;
    const DESTINATION: CharacteristicRole = CharacteristicRole::DestinationTemperature;

    fn address() -> PeripheralAddress {
        PeripheralAddress::parse("C4:4F:33:53:7A:57").unwrap()
    }

    fn handle(role: CharacteristicRole) -> CharacteristicHandle {
        CharacteristicHandle::new(role.service_uuid(), role.uuid())
    }

    #[test]
    fn test_catalog_helpers() {
        let catalog = controller_catalog();
        assert_eq!(catalog.characteristic_count(), 2);
        assert_eq!(catalog_without(DESTINATION).characteristic_count(), 1);
    }

    #[test]
    fn test_silent_link_records_only() {
        let mut link = MockLink::new();
        let log = link.ops();
        link.connect(&address(), Generation::new(3)).unwrap();
        link.read_characteristic(OperationTicket::new(1), &handle(REALTIME));
        link.disconnect();

        assert_eq!(log.len(), 3);
        assert_eq!(log.count(|op| matches!(op, LinkOp::Read { .. })), 1);
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_fail_connect() {
        let mut link = MockLink::new().fail_connect(ConnectError::AdapterUnavailable);
        assert_eq!(
            link.connect(&address(), Generation::new(1)),
            Err(ConnectError::AdapterUnavailable)
        );
        assert!(link.ops().is_empty());
    }

    #[test]
    fn test_responsive_connect_and_read() {
        let (tx, mut rx) = link_channel();
        let (mut link, peripheral) = MockLink::responsive(tx);
        let generation = Generation::new(7);

        link.connect(&address(), generation).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            LinkMessage::new(generation, LinkEvent::Connected)
        );
        assert!(peripheral.is_connected());

        peripheral.set_temperature(REALTIME, 71.5);
        link.read_characteristic(OperationTicket::new(1), &handle(REALTIME));
        match rx.try_recv().unwrap().event {
            LinkEvent::CharacteristicRead { value, status, .. } => {
                assert!(status.is_success());
                assert_eq!(decode_temperature(&value).unwrap(), 71.5);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_rejected_connection() {
        let (tx, mut rx) = link_channel();
        let (mut link, peripheral) = MockLink::responsive(tx);
        peripheral.reject_connections(Some(GattStatus::Failure(133)));

        link.connect(&address(), Generation::new(1)).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap().event,
            LinkEvent::Disconnected {
                status: GattStatus::Failure(133)
            }
        ));
        assert!(!peripheral.is_connected());
    }

    #[test]
    fn test_read_failures_then_success() {
        let (tx, mut rx) = link_channel();
        let (mut link, peripheral) = MockLink::responsive(tx);
        peripheral.fail_next_reads(1);

        link.read_characteristic(OperationTicket::new(1), &handle(DESTINATION));
        link.read_characteristic(OperationTicket::new(2), &handle(DESTINATION));

        let statuses: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|m| match m.event {
                LinkEvent::CharacteristicRead { status, .. } => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![GattStatus::failure(), GattStatus::Success]);
        assert_eq!(peripheral.read_count(), 2);
    }

    #[test]
    fn test_text_write_updates_value_and_notifies() {
        let (tx, mut rx) = link_channel();
        let (mut link, peripheral) = MockLink::responsive(tx);
        link.connect(&address(), Generation::new(1)).unwrap();
        link.enable_notifications(OperationTicket::new(1), &handle(DESTINATION));
        while rx.try_recv().is_ok() {}

        link.write_characteristic(
            OperationTicket::new(2),
            &handle(DESTINATION),
            b"68.5".to_vec(),
            WriteType::WithResponse,
        );
        assert_eq!(peripheral.temperature(DESTINATION), Some(68.5));
        assert!(matches!(
            rx.try_recv().unwrap().event,
            LinkEvent::CharacteristicWritten {
                status: GattStatus::Success,
                ..
            }
        ));
        assert!(matches!(
            rx.try_recv().unwrap().event,
            LinkEvent::CharacteristicChanged { .. }
        ));
    }

    #[test]
    fn test_garbage_write_fails() {
        let (tx, mut rx) = link_channel();
        let (mut link, peripheral) = MockLink::responsive(tx);
        link.write_characteristic(
            OperationTicket::new(1),
            &handle(DESTINATION),
            vec![0xFF, 0xFE],
            WriteType::WithResponse,
        );
        assert!(matches!(
            rx.try_recv().unwrap().event,
            LinkEvent::CharacteristicWritten { status, .. } if !status.is_success()
        ));
        assert_eq!(peripheral.temperature(DESTINATION), Some(65.0));
    }

    #[test]
    fn test_notify_requires_subscription() {
        let (tx, mut rx) = link_channel();
        let (mut link, peripheral) = MockLink::responsive(tx);
        link.connect(&address(), Generation::new(1)).unwrap();
        assert!(!peripheral.notify(REALTIME, encode_temperature(1.0).to_vec()));

        link.enable_notifications(OperationTicket::new(1), &handle(REALTIME));
        assert!(peripheral.is_subscribed(REALTIME));
        assert!(peripheral.notify(REALTIME, encode_temperature(1.0).to_vec()));

        peripheral.drop_connection();
        assert!(!peripheral.is_subscribed(REALTIME));
        let last = std::iter::from_fn(|| rx.try_recv().ok()).last().unwrap();
        assert_eq!(
            last.event,
            LinkEvent::Disconnected {
                status: SUPERVISION_TIMEOUT
            }
        );
    }
}
