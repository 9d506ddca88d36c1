//! [`GattLink`] over btleplug.
//!
//! btleplug exposes async request/response calls, while the session
//! controller drives a callback-style link. `BleLink` bridges the two by
//! spawning one task per primitive and reporting each completion on the
//! link event channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use brew_types::{PeripheralAddress, uuids};
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral};
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ConnectError, Error, Result};
use crate::link::{
    CharacteristicHandle, DiscoveredCharacteristic, DiscoveredService, GattLink, GattStatus,
    Generation, LinkEvent, LinkEventSender, LinkMessage, OperationTicket, ServiceCatalog,
    WriteType,
};
use crate::retry::{RetryConfig, with_retry};
use crate::scan::{ScanOptions, find_peripheral, get_adapter};

/// Default timeout for a single GATT request.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// State shared between the link and its tasks.
struct Shared<P = Peripheral> {
    generation: Option<Generation>,
    peripheral: Option<P>,
    characteristics: HashMap<CharacteristicHandle, Characteristic>,
}

impl<P> Default for Shared<P> {
    fn default() -> Self {
        Self {
            generation: None,
            peripheral: None,
            characteristics: HashMap::new(),
        }
    }
}

impl<P> Shared<P> {
    /// Hand a connected peripheral to `generation` so a later disconnect
    /// can release it. Gives it back if the generation was superseded.
    fn install(&mut self, generation: Generation, peripheral: P) -> std::result::Result<(), P> {
        if self.generation != Some(generation) {
            return Err(peripheral);
        }
        self.peripheral = Some(peripheral);
        Ok(())
    }
}

/// What a spawned task needs to report back.
#[derive(Clone)]
struct TaskContext {
    generation: Generation,
    events: LinkEventSender,
    shared: Arc<Mutex<Shared>>,
}

impl TaskContext {
    fn send(&self, event: LinkEvent) {
        debug!(generation = %self.generation, event = event.name(), "Link event");
        // The receiver is gone once the session task has exited
        let _ = self.events.send(LinkMessage::new(self.generation, event));
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }

    fn peripheral(&self) -> Option<Peripheral> {
        let shared = self.shared();
        if shared.generation != Some(self.generation) {
            return None;
        }
        shared.peripheral.clone()
    }

    fn lookup(&self, handle: &CharacteristicHandle) -> Option<(Peripheral, Characteristic)> {
        let shared = self.shared();
        if shared.generation != Some(self.generation) {
            return None;
        }
        let peripheral = shared.peripheral.clone()?;
        let characteristic = shared.characteristics.get(handle)?.clone();
        Some((peripheral, characteristic))
    }

    fn handle_for(&self, uuid: Uuid) -> Option<CharacteristicHandle> {
        self.shared()
            .characteristics
            .keys()
            .find(|handle| handle.uuid() == uuid)
            .cloned()
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A [`GattLink`] backed by a btleplug adapter.
///
/// # Example
///
/// ```no_run
/// use brew_core::{BleLink, SessionConfig, EventDispatcher, link_channel, spawn_session};
///
/// # async fn example() -> brew_core::Result<()> {
/// let (link_tx, link_rx) = link_channel();
/// let link = BleLink::new(link_tx).await;
/// let events = EventDispatcher::default();
/// let session = spawn_session(link, link_rx, events, SessionConfig::default());
/// session.start("C4:4F:33:53:7A:57").await?;
/// # Ok(())
/// # }
/// ```
pub struct BleLink {
    adapter: Option<Adapter>,
    runtime: Option<Handle>,
    events: LinkEventSender,
    shared: Arc<Mutex<Shared>>,
    tasks: Vec<JoinHandle<()>>,
    generation: Generation,
    scan_options: ScanOptions,
    io_timeout: Duration,
    connect_retry: RetryConfig,
}

impl std::fmt::Debug for BleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleLink")
            .field("has_adapter", &self.adapter.is_some())
            .field("generation", &self.generation)
            .field("tasks", &self.tasks.len())
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

impl BleLink {
    /// Create a link on the first available adapter.
    ///
    /// A missing adapter is not an error here; `connect` reports it as
    /// [`ConnectError::AdapterUnavailable`].
    pub async fn new(events: LinkEventSender) -> Self {
        let adapter = match get_adapter().await {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                warn!("No Bluetooth adapter: {}", e);
                None
            }
        };
        Self::with_adapter(adapter, events)
    }

    /// Create a link on a specific adapter.
    pub fn with_adapter(adapter: Option<Adapter>, events: LinkEventSender) -> Self {
        Self {
            adapter,
            runtime: None,
            events,
            shared: Arc::new(Mutex::new(Shared::default())),
            tasks: Vec::new(),
            generation: Generation::default(),
            scan_options: ScanOptions::default(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            connect_retry: RetryConfig::for_connect(),
        }
    }

    /// Set how the peripheral is located before connecting.
    #[must_use]
    pub fn scan_options(mut self, options: ScanOptions) -> Self {
        self.scan_options = options;
        self
    }

    /// Set the timeout for each GATT request.
    #[must_use]
    pub fn io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Set the retry policy for the low-level connect call.
    #[must_use]
    pub fn connect_retry(mut self, retry: RetryConfig) -> Self {
        self.connect_retry = retry;
        self
    }

    /// Whether an adapter is available.
    pub fn has_adapter(&self) -> bool {
        self.adapter.is_some()
    }

    fn context(&self) -> TaskContext {
        TaskContext {
            generation: self.generation,
            events: self.events.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(runtime) = &self.runtime else {
            warn!("GATT request issued before connect, ignoring");
            return;
        };
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(runtime.spawn(task));
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl GattLink for BleLink {
    #[tracing::instrument(level = "info", skip_all, fields(address = %address, generation = %generation))]
    fn connect(
        &mut self,
        address: &PeripheralAddress,
        generation: Generation,
    ) -> std::result::Result<(), ConnectError> {
        let adapter = self.adapter.clone().ok_or(ConnectError::AdapterUnavailable)?;
        let runtime = Handle::try_current().map_err(|_| ConnectError::AdapterUnavailable)?;

        self.abort_tasks();
        {
            let mut shared = lock(&self.shared);
            *shared = Shared {
                generation: Some(generation),
                ..Shared::default()
            };
        }
        self.generation = generation;
        self.runtime = Some(runtime);

        let ctx = self.context();
        let address = address.clone();
        let options = self.scan_options.clone();
        let retry = self.connect_retry.clone();
        let io_timeout = self.io_timeout;
        self.spawn(async move {
            run_connection(ctx, adapter, address, options, retry, io_timeout).await;
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        self.abort_tasks();
        let peripheral = {
            let mut shared = lock(&self.shared);
            shared.generation = None;
            shared.characteristics.clear();
            shared.peripheral.take()
        };

        if let (Some(peripheral), Some(runtime)) = (peripheral, &self.runtime) {
            info!("Disconnecting from peripheral");
            runtime.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    warn!("Disconnect failed: {}", e);
                }
            });
        }
    }

    fn discover_services(&mut self) {
        let ctx = self.context();
        let io_timeout = self.io_timeout;
        self.spawn(async move {
            let (status, catalog) = match discover(&ctx, io_timeout).await {
                Ok(catalog) => (GattStatus::Success, catalog),
                Err(e) => {
                    warn!("Service discovery failed: {}", e);
                    (GattStatus::failure(), ServiceCatalog::default())
                }
            };
            ctx.send(LinkEvent::ServicesDiscovered { status, catalog });
        });
    }

    fn read_characteristic(&mut self, ticket: OperationTicket, handle: &CharacteristicHandle) {
        let ctx = self.context();
        let handle = handle.clone();
        let io_timeout = self.io_timeout;
        self.spawn(async move {
            let outcome = match ctx.lookup(&handle) {
                Some((peripheral, characteristic)) => {
                    io(io_timeout, "read", peripheral.read(&characteristic)).await
                }
                None => Err(missing(&handle)),
            };
            let (value, status) = match outcome {
                Ok(value) => (value, GattStatus::Success),
                Err(e) => {
                    warn!(%ticket, "Read of {} failed: {}", handle, e);
                    (Vec::new(), GattStatus::failure())
                }
            };
            ctx.send(LinkEvent::CharacteristicRead {
                ticket,
                handle,
                value,
                status,
            });
        });
    }

    fn write_characteristic(
        &mut self,
        ticket: OperationTicket,
        handle: &CharacteristicHandle,
        value: Vec<u8>,
        write_type: WriteType,
    ) {
        let ctx = self.context();
        let handle = handle.clone();
        let io_timeout = self.io_timeout;
        self.spawn(async move {
            let outcome = match ctx.lookup(&handle) {
                Some((peripheral, characteristic)) => {
                    let request = peripheral.write(&characteristic, &value, write_type.into());
                    io(io_timeout, "write", request).await
                }
                None => Err(missing(&handle)),
            };
            let status = status_of(outcome, ticket, &handle, "Write");
            ctx.send(LinkEvent::CharacteristicWritten {
                ticket,
                handle,
                status,
            });
        });
    }

    fn enable_notifications(&mut self, ticket: OperationTicket, handle: &CharacteristicHandle) {
        let ctx = self.context();
        let handle = handle.clone();
        let io_timeout = self.io_timeout;
        self.spawn(async move {
            let outcome = match ctx.lookup(&handle) {
                Some((peripheral, characteristic)) => {
                    io(io_timeout, "subscribe", peripheral.subscribe(&characteristic)).await
                }
                None => Err(missing(&handle)),
            };
            let status = status_of(outcome, ticket, &handle, "Subscribe");
            ctx.send(LinkEvent::DescriptorWritten {
                ticket,
                handle,
                descriptor: uuids::CLIENT_CHARACTERISTIC_CONFIG,
                status,
            });
        });
    }
}

impl Drop for BleLink {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

async fn io<T>(
    duration: Duration,
    operation: &str,
    request: impl Future<Output = std::result::Result<T, btleplug::Error>>,
) -> Result<T> {
    timeout(duration, request)
        .await
        .map_err(|_| Error::timeout(operation, duration))?
        .map_err(Error::from)
}

fn missing(handle: &CharacteristicHandle) -> Error {
    Error::invalid_config(format!("characteristic {} not discovered", handle))
}

fn status_of(
    outcome: Result<()>,
    ticket: OperationTicket,
    handle: &CharacteristicHandle,
    operation: &str,
) -> GattStatus {
    match outcome {
        Ok(()) => GattStatus::Success,
        Err(e) => {
            warn!(%ticket, "{} of {} failed: {}", operation, handle, e);
            GattStatus::failure()
        }
    }
}

/// Locate and connect to the peripheral, then forward notifications and
/// watch for link loss until the task is aborted.
async fn run_connection(
    ctx: TaskContext,
    adapter: Adapter,
    address: PeripheralAddress,
    options: ScanOptions,
    retry: RetryConfig,
    io_timeout: Duration,
) {
    let peripheral = match establish(&adapter, &address, &options, &retry, io_timeout).await {
        Ok(peripheral) => peripheral,
        Err(e) => {
            warn!("Connection to {} failed: {}", address, e);
            ctx.send(LinkEvent::Disconnected {
                status: GattStatus::failure(),
            });
            return;
        }
    };

    // Installed before the next await, so an abort from here on still
    // leaves disconnect() something to release.
    let installed = ctx.shared().install(ctx.generation, peripheral.clone());
    if let Err(stale) = installed {
        debug!("Connection superseded, dropping it");
        let _ = stale.disconnect().await;
        return;
    }

    let streams = async {
        let notifications = peripheral.notifications().await?;
        let adapter_events = adapter.events().await?;
        Ok::<_, btleplug::Error>((notifications, adapter_events))
    };
    let (mut notifications, mut adapter_events) = match streams.await {
        Ok(streams) => streams,
        Err(e) => {
            warn!("Could not open event streams: {}", e);
            let _ = peripheral.disconnect().await;
            ctx.send(LinkEvent::Disconnected {
                status: GattStatus::failure(),
            });
            return;
        }
    };

    info!("Connected to {}", address);
    ctx.send(LinkEvent::Connected);

    let id = peripheral.id();
    loop {
        tokio::select! {
            Some(notification) = notifications.next() => {
                match ctx.handle_for(notification.uuid) {
                    Some(handle) => ctx.send(LinkEvent::CharacteristicChanged {
                        handle,
                        value: notification.value,
                    }),
                    None => debug!("Notification from unknown characteristic {}", notification.uuid),
                }
            }
            Some(event) = adapter_events.next() => {
                if let CentralEvent::DeviceDisconnected(lost) = event
                    && lost == id
                {
                    warn!("Link to {} lost", address);
                    ctx.send(LinkEvent::Disconnected {
                        status: GattStatus::failure(),
                    });
                    break;
                }
            }
            else => break,
        }
    }
}

async fn establish(
    adapter: &Adapter,
    address: &PeripheralAddress,
    options: &ScanOptions,
    retry: &RetryConfig,
    io_timeout: Duration,
) -> Result<Peripheral> {
    let peripheral = find_peripheral(adapter, address, options).await?;

    with_retry(retry, "connect", || {
        let peripheral = peripheral.clone();
        async move { io(io_timeout, "connect", peripheral.connect()).await }
    })
    .await?;

    Ok(peripheral)
}

async fn discover(ctx: &TaskContext, io_timeout: Duration) -> Result<ServiceCatalog> {
    let peripheral = ctx
        .peripheral()
        .ok_or_else(|| Error::invalid_config("discovery requested while disconnected"))?;

    io(io_timeout, "discover_services", peripheral.discover_services()).await?;

    let mut handles = HashMap::new();
    let services = peripheral
        .services()
        .into_iter()
        .map(|service| {
            let characteristics = service
                .characteristics
                .into_iter()
                .map(|characteristic| {
                    let handle =
                        CharacteristicHandle::new(characteristic.service_uuid, characteristic.uuid);
                    let discovered = DiscoveredCharacteristic {
                        handle: handle.clone(),
                        properties: characteristic.properties.into(),
                        descriptors: characteristic.descriptors.iter().map(|d| d.uuid).collect(),
                    };
                    handles.insert(handle, characteristic);
                    discovered
                })
                .collect();
            DiscoveredService {
                uuid: service.uuid,
                characteristics,
            }
        })
        .collect();
    let catalog = ServiceCatalog::new(services);

    debug!(
        services = catalog.len(),
        characteristics = catalog.characteristic_count(),
        "Discovery complete"
    );

    let mut shared = ctx.shared();
    if shared.generation == Some(ctx.generation) {
        shared.characteristics = handles;
    }
    Ok(catalog)
}
