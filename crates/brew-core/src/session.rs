//! The session state machine.
//!
//! [`SessionController`] drives a [`GattLink`] through
//! `Disconnected → Connecting → Connected → DiscoveringServices → Ready`,
//! serializes reads, writes and subscriptions through an
//! [`OperationQueue`], and translates link completions into
//! [`SessionEvent`]s.
//!
//! The controller is synchronous and owns all session state. Something must
//! feed it link events and call [`SessionController::poll_timeouts`] when
//! [`SessionController::next_deadline`] passes; the
//! [`runtime`](crate::runtime) module does this inside a tokio task.
//!
//! Every teardown bumps the session [`Generation`]. Link events carrying an
//! older generation, and completions whose ticket no longer matches the
//! in-flight operation, are dropped and counted as stale.

use std::collections::BTreeMap;
use std::fmt;

use brew_types::{
    CharacteristicRole, PeripheralAddress, TEMPERATURE_PAYLOAD_LEN, decode_temperature,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{ConnectError, ConnectionFailure, DiscoveryError, OperationError};
use crate::events::{DisconnectReason, EventSink, OperationContext, SessionEvent};
use crate::link::{
    CharacteristicHandle, GattLink, GattStatus, Generation, LinkEvent, LinkMessage,
    OperationTicket, ServiceCatalog,
};
use crate::queue::{GattOperation, InFlight, OperationQueue};
use crate::registry::{self, CharacteristicRegistry};
use crate::stats::SessionStats;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    DiscoveringServices,
    Ready,
}

impl ConnectionState {
    /// Whether a session attempt is underway or established.
    pub fn is_active(self) -> bool {
        self != ConnectionState::Disconnected
    }

    /// Whether the session is still being established.
    pub fn is_establishing(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::DiscoveringServices
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::DiscoveringServices => "discovering_services",
            ConnectionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// How a session is being torn down.
enum Teardown {
    UserRequested,
    LinkLost(GattStatus),
    Failed(ConnectionFailure),
}

/// State machine for one controller session.
pub struct SessionController<L, S> {
    link: L,
    sink: S,
    config: SessionConfig,
    state: ConnectionState,
    generation: Generation,
    address: Option<PeripheralAddress>,
    /// `Connected` was emitted for the current generation.
    announced: bool,
    /// Deadline for reaching `Ready`.
    connect_deadline: Option<Instant>,
    registry: CharacteristicRegistry,
    queue: OperationQueue,
    last_known: BTreeMap<CharacteristicRole, f32>,
    stats: SessionStats,
}

impl<L, S> fmt::Debug for SessionController<L, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("address", &self.address)
            .field("in_flight", &self.queue.in_flight())
            .field("pending", &self.queue.pending_len())
            .finish_non_exhaustive()
    }
}

impl<L: GattLink, S: EventSink> SessionController<L, S> {
    /// Create a controller in the `Disconnected` state.
    ///
    /// The config is used as given; call [`SessionConfig::validate`] first
    /// when it comes from user input.
    pub fn new(link: L, sink: S, config: SessionConfig) -> Self {
        let queue = OperationQueue::new(config.max_queue_depth);
        Self {
            link,
            sink,
            config,
            state: ConnectionState::Disconnected,
            generation: Generation::default(),
            address: None,
            announced: false,
            connect_deadline: None,
            registry: CharacteristicRegistry::new(),
            queue,
            last_known: BTreeMap::new(),
            stats: SessionStats::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Address of the current or most recent session.
    pub fn address(&self) -> Option<&PeripheralAddress> {
        self.address.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn registry(&self) -> &CharacteristicRegistry {
        &self.registry
    }

    /// The operation currently owned by the link.
    pub fn in_flight(&self) -> Option<&InFlight> {
        self.queue.in_flight()
    }

    /// Number of requests waiting for dispatch.
    pub fn pending_operations(&self) -> usize {
        self.queue.pending_len()
    }

    /// Last successfully decoded temperature for a role.
    ///
    /// Kept across reconnects; only a successful decode replaces it.
    pub fn last_temperature(&self, role: CharacteristicRole) -> Option<f32> {
        self.last_known.get(&role).copied()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Earliest instant at which [`poll_timeouts`](Self::poll_timeouts)
    /// has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.connect_deadline, self.queue.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Start a session with the peripheral at `address`.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::AlreadyActive`] unless the session is disconnected
    /// - [`ConnectError::InvalidAddress`] for a malformed address
    /// - [`ConnectError::AdapterUnavailable`] from the link
    ///
    /// The state is unchanged on error.
    pub fn start(&mut self, address: &str) -> Result<(), ConnectError> {
        if self.state.is_active() {
            return Err(ConnectError::AlreadyActive(self.state));
        }
        let address = PeripheralAddress::parse(address)
            .map_err(|_| ConnectError::InvalidAddress(address.to_string()))?;
        self.start_with(address)
    }

    /// Start a session with an already parsed address.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start), minus address validation.
    pub fn start_with(&mut self, address: PeripheralAddress) -> Result<(), ConnectError> {
        if self.state.is_active() {
            return Err(ConnectError::AlreadyActive(self.state));
        }

        let generation = self.generation.next();
        self.link.connect(&address, generation)?;

        info!(%address, %generation, "Connecting");
        self.generation = generation;
        self.state = ConnectionState::Connecting;
        self.announced = false;
        self.connect_deadline = Some(Instant::now() + self.config.connect_timeout);
        self.address = Some(address);
        self.stats.connections_started += 1;
        Ok(())
    }

    /// Tear the session down. No-op when already disconnected.
    pub fn stop(&mut self) {
        if !self.state.is_active() {
            return;
        }
        info!(state = %self.state, "Stopping session");
        self.teardown(Teardown::UserRequested);
    }

    /// Queue a read of `role`.
    ///
    /// # Errors
    ///
    /// [`OperationError::NotReady`] outside `Ready`,
    /// [`OperationError::QueueFull`] when the queue is at capacity.
    pub fn request_read(&mut self, role: CharacteristicRole) -> Result<(), OperationError> {
        self.enqueue(GattOperation::Read(role))
    }

    /// Queue a write of `value` to `role`.
    ///
    /// # Errors
    ///
    /// As [`request_read`](Self::request_read), plus
    /// [`OperationError::NotWritable`] for read-only roles and
    /// [`OperationError::InvalidValue`] for non-finite values.
    pub fn request_write(
        &mut self,
        role: CharacteristicRole,
        value: f32,
    ) -> Result<(), OperationError> {
        if !role.is_writable() {
            return Err(OperationError::NotWritable { role });
        }
        if !value.is_finite() {
            return Err(OperationError::InvalidValue { value });
        }
        self.enqueue(GattOperation::Write { role, value })
    }

    fn enqueue(&mut self, operation: GattOperation) -> Result<(), OperationError> {
        if self.state != ConnectionState::Ready {
            return Err(OperationError::NotReady { state: self.state });
        }
        self.queue.push_back(operation)?;
        debug!(%operation, pending = self.queue.pending_len(), "Queued operation");
        self.pump();
        Ok(())
    }

    /// Feed one event from the link.
    pub fn handle_link_event(&mut self, message: LinkMessage) {
        if message.generation != self.generation || !self.state.is_active() {
            self.drop_stale(message.event.name(), "generation mismatch");
            return;
        }

        match message.event {
            LinkEvent::Connected => self.on_connected(),
            LinkEvent::Disconnected { status } => self.on_disconnected(status),
            LinkEvent::ServicesDiscovered { status, catalog } => {
                self.on_services_discovered(status, catalog)
            }
            LinkEvent::CharacteristicRead {
                ticket,
                handle,
                value,
                status,
            } => self.on_read(ticket, &handle, value, status),
            LinkEvent::CharacteristicWritten {
                ticket,
                handle,
                status,
            } => self.on_written(ticket, &handle, status),
            LinkEvent::DescriptorWritten {
                ticket,
                handle,
                status,
                ..
            } => self.on_descriptor_written(ticket, &handle, status),
            LinkEvent::CharacteristicChanged { handle, value } => {
                self.on_changed(&handle, &value)
            }
        }
    }

    /// Expire whatever deadline has passed at `now`.
    pub fn poll_timeouts(&mut self, now: Instant) {
        if let Some(deadline) = self.connect_deadline
            && now >= deadline
            && self.state.is_establishing()
        {
            let state = self.state;
            warn!(%state, "Session not ready after {:?}", self.config.connect_timeout);
            let failure = if state == ConnectionState::DiscoveringServices {
                DiscoveryError::Timeout(self.config.connect_timeout).into()
            } else {
                ConnectionFailure::Timeout {
                    state,
                    duration: self.config.connect_timeout,
                }
            };
            self.teardown(Teardown::Failed(failure));
            return;
        }

        if let Some(expired) = self.queue.expire(now) {
            let timeout = self.config.operation_timeout;
            warn!(operation = %expired.operation, ticket = %expired.ticket, "Operation timed out after {:?}", timeout);
            self.stats.operations_timed_out += 1;
            self.emit(SessionEvent::OperationFailed {
                context: expired.operation.context(),
                error: OperationError::timeout(expired.operation.to_string(), timeout),
            });
            self.pump();
        }
    }

    fn on_connected(&mut self) {
        if self.state != ConnectionState::Connecting {
            warn!(state = %self.state, "Unexpected connected event");
            return;
        }
        let Some(address) = self.address.clone() else {
            return;
        };

        info!(%address, "Connected, discovering services");
        self.state = ConnectionState::Connected;
        self.announced = true;
        self.emit(SessionEvent::Connected { address });

        self.link.discover_services();
        self.state = ConnectionState::DiscoveringServices;
    }

    fn on_disconnected(&mut self, status: GattStatus) {
        info!(state = %self.state, %status, "Link disconnected");
        self.teardown(Teardown::LinkLost(status));
    }

    fn on_services_discovered(&mut self, status: GattStatus, catalog: ServiceCatalog) {
        if self.state != ConnectionState::DiscoveringServices {
            warn!(state = %self.state, "Unexpected discovery result");
            return;
        }
        if !status.is_success() {
            self.teardown(Teardown::Failed(DiscoveryError::Transport(status).into()));
            return;
        }

        let map = match registry::resolve(&catalog) {
            Ok(map) => map,
            Err(e) => {
                self.teardown(Teardown::Failed(e.into()));
                return;
            }
        };

        info!(
            services = catalog.len(),
            characteristics = catalog.characteristic_count(),
            "Services ready"
        );
        self.registry.install(map);
        self.state = ConnectionState::Ready;
        self.connect_deadline = None;
        self.stats.sessions_ready += 1;
        self.emit(SessionEvent::ServicesReady);

        for operation in self.startup_operations() {
            self.queue.push_startup(operation);
        }
        self.pump();
    }

    fn startup_operations(&self) -> Vec<GattOperation> {
        let mut operations = vec![GattOperation::EnableNotifications(
            CharacteristicRole::RealtimeTemperature,
        )];
        if self.config.notify_destination {
            operations.push(GattOperation::EnableNotifications(
                CharacteristicRole::DestinationTemperature,
            ));
        }
        if self.config.initial_read {
            operations.extend(CharacteristicRole::ALL.map(GattOperation::Read));
        }
        operations
    }

    fn on_read(
        &mut self,
        ticket: OperationTicket,
        handle: &CharacteristicHandle,
        value: Vec<u8>,
        status: GattStatus,
    ) {
        let Some(done) = self.complete(ticket, "characteristic_read") else {
            return;
        };
        let GattOperation::Read(role) = done.operation else {
            warn!(operation = %done.operation, %handle, "Read completion for a non-read operation");
            self.fail_operation(&done, OperationError::transport(GattStatus::failure()));
            return;
        };

        if !status.is_success() {
            if done.attempt < self.config.read_retries {
                debug!(%role, attempt = done.attempt + 1, %status, "Retrying read");
                self.stats.read_retries += 1;
                self.queue.push_retry(done.operation, done.attempt + 1);
                self.pump();
            } else {
                self.fail_operation(&done, OperationError::transport(status));
            }
            return;
        }

        if self.deliver_temperature(role, &value, OperationContext::Read(role)) {
            self.stats.operations_succeeded += 1;
        } else {
            self.stats.operations_failed += 1;
        }
        self.pump();
    }

    fn on_written(&mut self, ticket: OperationTicket, handle: &CharacteristicHandle, status: GattStatus) {
        let Some(done) = self.complete(ticket, "characteristic_written") else {
            return;
        };
        let GattOperation::Write { role, value } = done.operation else {
            warn!(operation = %done.operation, %handle, "Write completion for a non-write operation");
            self.fail_operation(&done, OperationError::transport(GattStatus::failure()));
            return;
        };

        if !status.is_success() {
            self.fail_operation(&done, OperationError::transport(status));
            return;
        }

        info!(%role, value, "Destination temperature written");
        self.stats.operations_succeeded += 1;
        self.emit(SessionEvent::DestinationWritten { value });
        self.pump();
    }

    fn on_descriptor_written(
        &mut self,
        ticket: OperationTicket,
        handle: &CharacteristicHandle,
        status: GattStatus,
    ) {
        let Some(done) = self.complete(ticket, "descriptor_written") else {
            return;
        };
        let GattOperation::EnableNotifications(role) = done.operation else {
            warn!(operation = %done.operation, %handle, "Descriptor completion for a non-subscribe operation");
            self.fail_operation(&done, OperationError::transport(GattStatus::failure()));
            return;
        };

        if !status.is_success() {
            self.fail_operation(&done, OperationError::transport(status));
            return;
        }

        debug!(%role, "Notifications enabled");
        self.stats.operations_succeeded += 1;
        self.emit(SessionEvent::NotificationsEnabled { role });
        self.pump();
    }

    fn on_changed(&mut self, handle: &CharacteristicHandle, value: &[u8]) {
        if self.state != ConnectionState::Ready {
            self.drop_stale("characteristic_changed", "session not ready");
            return;
        }
        let Some(role) = self.registry.role_for(handle) else {
            debug!(%handle, "Notification for unknown characteristic");
            return;
        };
        self.stats.notifications_received += 1;
        self.deliver_temperature(role, value, OperationContext::Notification(role));
    }

    /// Decode and publish a temperature. Returns whether it decoded.
    fn deliver_temperature(
        &mut self,
        role: CharacteristicRole,
        payload: &[u8],
        context: OperationContext,
    ) -> bool {
        match decode_temperature(payload) {
            Ok(value) => {
                debug!(%role, value, "Temperature updated");
                self.last_known.insert(role, value);
                self.emit(SessionEvent::TemperatureUpdated { role, value });
                true
            }
            Err(e) => {
                warn!(%context, "Discarding payload: {}", e);
                self.stats.decode_errors += 1;
                self.emit(SessionEvent::OperationFailed {
                    context,
                    error: OperationError::DecodeMismatch {
                        expected: TEMPERATURE_PAYLOAD_LEN,
                        actual: payload.len(),
                    },
                });
                false
            }
        }
    }

    /// Retire the in-flight operation for `ticket`, or count a stale drop.
    fn complete(&mut self, ticket: OperationTicket, event: &'static str) -> Option<InFlight> {
        let done = self.queue.complete(ticket);
        match &done {
            Some(op) => self.stats.record_latency(op.dispatched_at.elapsed()),
            None => self.drop_stale(event, "ticket mismatch"),
        }
        done
    }

    fn fail_operation(&mut self, done: &InFlight, error: OperationError) {
        warn!(operation = %done.operation, "Operation failed: {}", error);
        self.stats.operations_failed += 1;
        self.emit(SessionEvent::OperationFailed {
            context: done.operation.context(),
            error,
        });
        self.pump();
    }

    /// Dispatch the next queued operation if the link is idle.
    fn pump(&mut self) {
        if self.state != ConnectionState::Ready {
            return;
        }
        let timeout = self.config.operation_timeout;
        let Some(next) = self.queue.begin_next(Instant::now(), timeout).cloned() else {
            return;
        };
        let Some(handle) = self.registry.handle(next.operation.role()).cloned() else {
            // Unreachable while Ready; the registry is installed first.
            self.queue.abandon();
            return;
        };

        debug!(operation = %next.operation, ticket = %next.ticket, "Dispatching");
        self.stats.operations_dispatched += 1;
        match next.operation {
            GattOperation::Read(_) => self.link.read_characteristic(next.ticket, &handle),
            GattOperation::Write { value, .. } => {
                let payload = self.config.destination_encoding.encode(value);
                self.link
                    .write_characteristic(next.ticket, &handle, payload, self.config.write_type);
            }
            GattOperation::EnableNotifications(_) => {
                self.link.enable_notifications(next.ticket, &handle)
            }
        }
    }

    fn teardown(&mut self, cause: Teardown) {
        let cancelled = self.queue.clear();
        if cancelled > 0 {
            debug!(cancelled, "Cancelled pending operations");
            self.stats.operations_cancelled += cancelled as u64;
        }
        self.registry.clear();
        self.connect_deadline = None;
        self.state = ConnectionState::Disconnected;
        self.generation = self.generation.next();

        let announced = std::mem::take(&mut self.announced);
        let Some(address) = self.address.clone() else {
            return;
        };

        let event = match cause {
            Teardown::UserRequested => {
                self.link.disconnect();
                if !announced {
                    debug!(%address, "Stopped before the connection was announced");
                    return;
                }
                self.stats.disconnects += 1;
                SessionEvent::Disconnected {
                    address,
                    reason: DisconnectReason::UserRequested,
                }
            }
            Teardown::LinkLost(status) if announced => {
                self.stats.disconnects += 1;
                SessionEvent::Disconnected {
                    address,
                    reason: DisconnectReason::LinkLost { status },
                }
            }
            Teardown::LinkLost(status) => {
                self.stats.connection_failures += 1;
                SessionEvent::ConnectionFailed {
                    address,
                    reason: ConnectionFailure::Rejected { status },
                }
            }
            Teardown::Failed(reason) => {
                warn!(%address, "Session failed: {}", reason);
                self.link.disconnect();
                self.stats.connection_failures += 1;
                SessionEvent::ConnectionFailed { address, reason }
            }
        };
        self.emit(event);
    }

    fn drop_stale(&mut self, event: &'static str, why: &'static str) {
        debug!(event, why, generation = %self.generation, "Dropping stale link event");
        self.stats.stale_callbacks_dropped += 1;
    }

    fn emit(&self, event: SessionEvent) {
        self.sink.emit(event);
    }
}
