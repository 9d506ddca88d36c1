//! Session events and the sinks that consume them.
//!
//! The controller translates link completions into [`SessionEvent`]s and
//! hands them to an [`EventSink`]. Sinks must not block: the broadcast
//! dispatcher drops events when nobody listens and the mpsc sink is
//! unbounded.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use brew_types::{CharacteristicRole, PeripheralAddress};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::error::{ConnectionFailure, OperationError};
use crate::link::GattStatus;

/// Events emitted by a session.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// The link to the controller is up.
    Connected { address: PeripheralAddress },
    /// A session that had connected went down.
    Disconnected {
        address: PeripheralAddress,
        reason: DisconnectReason,
    },
    /// A session attempt failed before or while being established.
    ConnectionFailed {
        address: PeripheralAddress,
        reason: ConnectionFailure,
    },
    /// Both characteristics were resolved; requests are accepted.
    ServicesReady,
    /// Notifications are enabled for a characteristic.
    NotificationsEnabled { role: CharacteristicRole },
    /// A temperature was read or notified.
    TemperatureUpdated { role: CharacteristicRole, value: f32 },
    /// A new destination temperature was accepted by the controller.
    DestinationWritten { value: f32 },
    /// A single operation failed; the session stays up.
    OperationFailed {
        context: OperationContext,
        error: OperationError,
    },
    /// The runtime will try to reconnect after `delay`.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// The runtime stopped reconnecting; the session stays disconnected.
    ReconnectAbandoned { attempts: u32 },
}

impl SessionEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Connected { .. } => "connected",
            SessionEvent::Disconnected { .. } => "disconnected",
            SessionEvent::ConnectionFailed { .. } => "connection_failed",
            SessionEvent::ServicesReady => "services_ready",
            SessionEvent::NotificationsEnabled { .. } => "notifications_enabled",
            SessionEvent::TemperatureUpdated { .. } => "temperature_updated",
            SessionEvent::DestinationWritten { .. } => "destination_written",
            SessionEvent::OperationFailed { .. } => "operation_failed",
            SessionEvent::ReconnectScheduled { .. } => "reconnect_scheduled",
            SessionEvent::ReconnectAbandoned { .. } => "reconnect_abandoned",
        }
    }

    /// Whether the event ends a session attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::Disconnected { .. } | SessionEvent::ConnectionFailed { .. }
        )
    }
}

/// Reason for disconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Normal disconnection requested by the user.
    UserRequested,
    /// The link went down.
    LinkLost { status: GattStatus },
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::UserRequested => write!(f, "user requested"),
            DisconnectReason::LinkLost { status } => write!(f, "link lost ({})", status),
        }
    }
}

/// What an `OperationFailed` event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "role", rename_all = "snake_case")]
pub enum OperationContext {
    Read(CharacteristicRole),
    Write(CharacteristicRole),
    EnableNotifications(CharacteristicRole),
    /// An unsolicited value pushed by the controller.
    Notification(CharacteristicRole),
}

impl OperationContext {
    pub fn role(self) -> CharacteristicRole {
        match self {
            OperationContext::Read(role)
            | OperationContext::Write(role)
            | OperationContext::EnableNotifications(role)
            | OperationContext::Notification(role) => role,
        }
    }
}

impl fmt::Display for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationContext::Read(role) => write!(f, "read {}", role),
            OperationContext::Write(role) => write!(f, "write {}", role),
            OperationContext::EnableNotifications(role) => {
                write!(f, "enable {} notifications", role)
            }
            OperationContext::Notification(role) => write!(f, "{} notification", role),
        }
    }
}

/// Consumer of session events.
///
/// `emit` is called from inside the controller and must return promptly.
pub trait EventSink: Send {
    fn emit(&self, event: SessionEvent);
}

impl<S: EventSink + Sync + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: SessionEvent) {
        (**self).emit(event);
    }
}

impl EventSink for mpsc::UnboundedSender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        // The receiver may be gone during shutdown.
        let _ = self.send(event);
    }
}

impl EventSink for broadcast::Sender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        let _ = self.send(event);
    }
}

/// Adapts a closure into an [`EventSink`].
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(SessionEvent) + Send,
{
    fn emit(&self, event: SessionEvent) {
        (self.0)(event);
    }
}

impl<F> fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSink")
    }
}

/// Sender for session events.
pub type EventSender = broadcast::Sender<SessionEvent>;

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event, dropping it when nobody is subscribed.
    pub fn send(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the sender for direct use.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

impl EventSink for EventDispatcher {
    fn emit(&self, event: SessionEvent) {
        self.send(event);
    }
}

/// Sink that stores every event, for tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events recorded so far.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.lock().clone()
    }

    /// Remove and return all recorded events.
    pub fn take(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.lock())
    }

    /// Number of recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&SessionEvent) -> bool) -> usize {
        self.lock().iter().filter(|e| predicate(e)).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SessionEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: SessionEvent) {
        self.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> PeripheralAddress {
        PeripheralAddress::parse("C4:4F:33:53:7A:57").unwrap()
    }

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::TemperatureUpdated {
            role: CharacteristicRole::RealtimeTemperature,
            value: 66.5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "temperature_updated");
        assert_eq!(json["role"], "realtime_temperature");
        assert_eq!(json["value"], 66.5);

        let back: SessionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_operation_failed_serialization() {
        let event = SessionEvent::OperationFailed {
            context: OperationContext::Notification(CharacteristicRole::RealtimeTemperature),
            error: OperationError::DecodeMismatch {
                expected: 4,
                actual: 3,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["context"]["operation"], "notification");
        assert_eq!(json["error"]["kind"], "decode_mismatch");
        assert_eq!(json["error"]["actual"], 3);
    }

    #[test]
    fn test_terminal_events() {
        let disconnected = SessionEvent::Disconnected {
            address: address(),
            reason: DisconnectReason::UserRequested,
        };
        assert!(disconnected.is_terminal());
        assert!(!SessionEvent::ServicesReady.is_terminal());
        assert_eq!(disconnected.name(), "disconnected");
    }

    #[test]
    fn test_operation_context_display() {
        let context = OperationContext::EnableNotifications(CharacteristicRole::RealtimeTemperature);
        assert_eq!(context.to_string(), "enable realtime notifications");
        assert_eq!(context.role(), CharacteristicRole::RealtimeTemperature);
    }

    #[tokio::test]
    async fn test_dispatcher_delivers_to_subscribers() {
        let dispatcher = EventDispatcher::new(16);
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 1);

        dispatcher.emit(SessionEvent::ServicesReady);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::ServicesReady);
    }

    #[test]
    fn test_dispatcher_without_receivers_does_not_block() {
        let dispatcher = EventDispatcher::default();
        dispatcher.emit(SessionEvent::ServicesReady);
        assert_eq!(dispatcher.receiver_count(), 0);
    }

    #[test]
    fn test_mpsc_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.emit(SessionEvent::DestinationWritten { value: 65.0 });
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::DestinationWritten { value: 65.0 }
        );

        drop(rx);
        tx.emit(SessionEvent::ServicesReady);
    }

    #[test]
    fn test_fn_sink() {
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let sink = FnSink(move |_event: SessionEvent| {
            *counter.lock().unwrap() += 1;
        });
        sink.emit(SessionEvent::ServicesReady);
        sink.emit(SessionEvent::ServicesReady);
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        let shared: Arc<RecordingSink> = Arc::new(sink.clone());
        shared.emit(SessionEvent::ServicesReady);
        sink.emit(SessionEvent::DestinationWritten { value: 70.0 });

        assert_eq!(sink.len(), 2);
        assert_eq!(
            sink.count(|e| matches!(e, SessionEvent::DestinationWritten { .. })),
            1
        );
        assert_eq!(sink.take().len(), 2);
        assert!(sink.is_empty());
    }
}
