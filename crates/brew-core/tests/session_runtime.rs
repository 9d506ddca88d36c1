//! End-to-end tests of the session runtime against a scripted controller.

use std::time::Duration;

use brew_core::error::ConnectionFailure;
use brew_core::mock::catalog_without;
use brew_core::{
    CharacteristicRole, ConnectionState, DisconnectReason, GattStatus, MockLink, MockPeripheral,
    OperationContext, OperationError, ResolutionError, RetryConfig, SessionConfig, SessionEvent,
    SessionHandle, link_channel, spawn_session,
};
use brew_types::encode_temperature;
use tokio::sync::mpsc;
use tokio::time::timeout;

const ADDRESS: &str = "C4:4F:33:53:7A:57";

struct Harness {
    session: SessionHandle,
    peripheral: MockPeripheral,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Harness {
    fn new(config: SessionConfig) -> Self {
        let (link_tx, link_rx) = link_channel();
        let (link, peripheral) = MockLink::responsive(link_tx);
        let (event_tx, events) = mpsc::unbounded_channel();
        let session = spawn_session(link, link_rx, event_tx, config);
        Self {
            session,
            peripheral,
            events,
        }
    }

    async fn next_event(&mut self) -> SessionEvent {
        timeout(Duration::from_secs(60), self.events.recv())
            .await
            .expect("timed out waiting for a session event")
            .expect("event channel closed")
    }

    /// Skip events until one matches `predicate`.
    async fn wait_for(&mut self, predicate: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        loop {
            let event = self.next_event().await;
            if predicate(&event) {
                return event;
            }
        }
    }

    async fn start_ready(&mut self) {
        self.session.start(ADDRESS).await.unwrap();
        self.wait_ready().await;
    }

    async fn wait_ready(&mut self) {
        self.wait_for(|e| matches!(e, SessionEvent::ServicesReady))
            .await;
        // Startup reads finish with the destination temperature
        self.wait_for(|e| {
            matches!(
                e,
                SessionEvent::TemperatureUpdated {
                    role: CharacteristicRole::DestinationTemperature,
                    ..
                }
            )
        })
        .await;
    }
}

#[tokio::test]
async fn test_full_session_startup() {
    let mut h = Harness::new(SessionConfig::default());
    h.session.start(ADDRESS).await.unwrap();

    match h.next_event().await {
        SessionEvent::Connected { address } => assert_eq!(address.as_str(), ADDRESS),
        other => panic!("expected Connected, got {:?}", other),
    }
    assert_eq!(h.next_event().await, SessionEvent::ServicesReady);
    assert_eq!(
        h.next_event().await,
        SessionEvent::NotificationsEnabled {
            role: CharacteristicRole::RealtimeTemperature
        }
    );
    assert_eq!(
        h.next_event().await,
        SessionEvent::TemperatureUpdated {
            role: CharacteristicRole::RealtimeTemperature,
            value: 20.0
        }
    );
    assert_eq!(
        h.next_event().await,
        SessionEvent::TemperatureUpdated {
            role: CharacteristicRole::DestinationTemperature,
            value: 65.0
        }
    );

    assert_eq!(h.session.state(), ConnectionState::Ready);
    assert!(h.peripheral.is_subscribed(CharacteristicRole::RealtimeTemperature));
    assert!(!h.peripheral.is_subscribed(CharacteristicRole::DestinationTemperature));

    let stats = h.session.stats();
    assert_eq!(stats.sessions_ready, 1);
    assert_eq!(stats.operations_succeeded, 3);
}

#[tokio::test]
async fn test_notifications_update_temperature() {
    let mut h = Harness::new(SessionConfig::default());
    h.start_ready().await;

    assert!(h.peripheral.notify(
        CharacteristicRole::RealtimeTemperature,
        encode_temperature(21.5).to_vec()
    ));
    assert_eq!(
        h.next_event().await,
        SessionEvent::TemperatureUpdated {
            role: CharacteristicRole::RealtimeTemperature,
            value: 21.5
        }
    );
}

#[tokio::test]
async fn test_short_notification_reports_decode_error() {
    let mut h = Harness::new(SessionConfig::default());
    h.start_ready().await;

    h.peripheral
        .notify(CharacteristicRole::RealtimeTemperature, vec![0x00, 0x00, 0xA0]);
    assert_eq!(
        h.next_event().await,
        SessionEvent::OperationFailed {
            context: OperationContext::Notification(CharacteristicRole::RealtimeTemperature),
            error: OperationError::DecodeMismatch {
                expected: 4,
                actual: 3
            },
        }
    );

    // The session survives a bad payload
    assert_eq!(h.session.state(), ConnectionState::Ready);
    assert_eq!(h.session.stats().decode_errors, 1);
}

#[tokio::test]
async fn test_write_then_read_destination() {
    let mut h = Harness::new(SessionConfig::default());
    h.start_ready().await;

    h.session
        .request_write(CharacteristicRole::DestinationTemperature, 67.5)
        .await
        .unwrap();
    assert_eq!(
        h.next_event().await,
        SessionEvent::DestinationWritten { value: 67.5 }
    );
    assert_eq!(
        h.peripheral
            .temperature(CharacteristicRole::DestinationTemperature),
        Some(67.5)
    );

    h.session
        .request_read(CharacteristicRole::DestinationTemperature)
        .await
        .unwrap();
    assert_eq!(
        h.next_event().await,
        SessionEvent::TemperatureUpdated {
            role: CharacteristicRole::DestinationTemperature,
            value: 67.5
        }
    );
}

#[tokio::test]
async fn test_writing_realtime_is_rejected() {
    let mut h = Harness::new(SessionConfig::default());
    h.start_ready().await;

    let err = h
        .session
        .request_write(CharacteristicRole::RealtimeTemperature, 30.0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        brew_core::Error::Operation(OperationError::NotWritable { .. })
    ));
}

#[tokio::test]
async fn test_missing_characteristic_fails_connection() {
    let mut h = Harness::new(SessionConfig::default());
    h.peripheral
        .set_catalog(catalog_without(CharacteristicRole::DestinationTemperature));
    h.session.start(ADDRESS).await.unwrap();

    assert!(matches!(h.next_event().await, SessionEvent::Connected { .. }));
    match h.next_event().await {
        SessionEvent::ConnectionFailed { reason, .. } => assert_eq!(
            reason,
            ConnectionFailure::Resolution {
                error: ResolutionError::CharacteristicNotFound {
                    role: CharacteristicRole::DestinationTemperature
                }
            }
        ),
        other => panic!("expected ConnectionFailed, got {:?}", other),
    }

    h.session
        .wait_for_state(ConnectionState::Disconnected, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(!h.peripheral.is_connected());
}

#[tokio::test]
async fn test_rejected_connection() {
    let mut h = Harness::new(SessionConfig::default());
    h.peripheral
        .reject_connections(Some(GattStatus::Failure(0x85)));
    h.session.start(ADDRESS).await.unwrap();

    match h.next_event().await {
        SessionEvent::ConnectionFailed { reason, .. } => assert_eq!(
            reason,
            ConnectionFailure::Rejected {
                status: GattStatus::Failure(0x85)
            }
        ),
        other => panic!("expected ConnectionFailed, got {:?}", other),
    }
    assert_eq!(h.session.stats().connection_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_silent_read_times_out() {
    let config = SessionConfig::default().operation_timeout(Duration::from_secs(2));
    let mut h = Harness::new(config);
    h.peripheral.set_silent_reads(true);
    h.session.start(ADDRESS).await.unwrap();

    let event = h
        .wait_for(|e| matches!(e, SessionEvent::OperationFailed { .. }))
        .await;
    match event {
        SessionEvent::OperationFailed { context, error } => {
            assert_eq!(
                context,
                OperationContext::Read(CharacteristicRole::RealtimeTemperature)
            );
            assert!(matches!(
                error,
                OperationError::Timeout { duration, .. } if duration == Duration::from_secs(2)
            ));
        }
        _ => unreachable!(),
    }

    // The queue moves on to the next startup read
    let event = h
        .wait_for(|e| matches!(e, SessionEvent::OperationFailed { .. }))
        .await;
    assert!(matches!(
        event,
        SessionEvent::OperationFailed {
            context: OperationContext::Read(CharacteristicRole::DestinationTemperature),
            ..
        }
    ));
    assert_eq!(h.session.state(), ConnectionState::Ready);
    assert_eq!(h.session.stats().operations_timed_out, 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_link_loss() {
    let policy = RetryConfig::new(3)
        .initial_delay(Duration::from_millis(500))
        .jitter(false);
    let mut h = Harness::new(SessionConfig::default().reconnect(policy));
    h.start_ready().await;

    h.peripheral.drop_connection();
    match h.next_event().await {
        SessionEvent::Disconnected { reason, .. } => {
            assert!(matches!(reason, DisconnectReason::LinkLost { .. }));
        }
        other => panic!("expected Disconnected, got {:?}", other),
    }
    assert_eq!(
        h.next_event().await,
        SessionEvent::ReconnectScheduled {
            attempt: 1,
            delay: Duration::from_millis(500)
        }
    );

    // The runtime reconnects on its own
    h.wait_ready().await;
    assert_eq!(h.session.state(), ConnectionState::Ready);
    assert_eq!(h.session.stats().sessions_ready, 2);
    assert!(h.peripheral.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_after_policy_is_spent() {
    let policy = RetryConfig::new(1)
        .initial_delay(Duration::from_millis(500))
        .jitter(false);
    let mut h = Harness::new(SessionConfig::default().reconnect(policy));
    h.start_ready().await;

    h.peripheral
        .reject_connections(Some(GattStatus::Failure(0x85)));
    h.peripheral.drop_connection();

    assert!(h.next_event().await.is_terminal());
    assert!(matches!(
        h.next_event().await,
        SessionEvent::ReconnectScheduled { attempt: 1, .. }
    ));
    assert!(matches!(
        h.next_event().await,
        SessionEvent::ConnectionFailed {
            reason: ConnectionFailure::Rejected { .. },
            ..
        }
    ));
    assert_eq!(
        h.next_event().await,
        SessionEvent::ReconnectAbandoned { attempts: 1 }
    );
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_stop_is_not_followed_by_reconnect() {
    let mut h = Harness::new(SessionConfig::default().reconnect(RetryConfig::quick()));
    h.start_ready().await;

    h.session.stop().await.unwrap();
    assert_eq!(
        h.next_event().await,
        SessionEvent::Disconnected {
            address: ADDRESS.parse().unwrap(),
            reason: DisconnectReason::UserRequested,
        }
    );
    assert_eq!(h.session.state(), ConnectionState::Disconnected);

    h.session.shutdown().await;
    assert!(h.events.recv().await.is_none());
}

#[tokio::test]
#[ignore = "requires BLE hardware; set BREW_DEVICE to the controller address"]
async fn test_hardware_session() {
    use brew_core::{BleLink, EventDispatcher};

    let address = std::env::var("BREW_DEVICE").expect("BREW_DEVICE not set");
    let (link_tx, link_rx) = link_channel();
    let link = BleLink::new(link_tx).await;
    let dispatcher = EventDispatcher::default();
    let mut events = dispatcher.subscribe();

    let session = spawn_session(link, link_rx, dispatcher, SessionConfig::challenging_environment());
    session.start(&address).await.unwrap();
    session
        .wait_for_state(ConnectionState::Ready, Duration::from_secs(60))
        .await
        .unwrap();

    while let Ok(event) = events.recv().await {
        println!("{:?}", event);
        if matches!(
            event,
            SessionEvent::TemperatureUpdated {
                role: CharacteristicRole::DestinationTemperature,
                ..
            }
        ) {
            break;
        }
    }
    session.shutdown().await;
}
