//! Core BLE session library for brew temperature controllers.
//!
//! A brew controller exposes one GATT service with two temperature
//! characteristics: the realtime (measured) temperature, which notifies,
//! and the destination (setpoint) temperature, which can be written.
//! This crate connects to a controller, discovers and resolves those
//! characteristics, enables notifications, and serializes every GATT
//! request through a single-flight queue.
//!
//! # Layers
//!
//! - [`GattLink`]: callback-style GATT primitives. [`BleLink`] runs them on
//!   btleplug, [`MockLink`] scripts them for tests.
//! - [`SessionController`]: a synchronous state machine that consumes
//!   [`LinkMessage`]s and emits [`SessionEvent`]s to an [`EventSink`].
//! - [`spawn_session`]: runs a controller on a tokio task and returns a
//!   cloneable [`SessionHandle`], adding timeouts and reconnection.
//!
//! # Platform Differences
//!
//! On macOS, CoreBluetooth hides MAC addresses and identifies peripherals
//! by a per-host UUID. Pass that UUID (as printed by a scan) wherever an
//! address is expected. Linux and Windows use the MAC address.
//!
//! # Quick Start
//!
//! ```no_run
//! use brew_core::{BleLink, EventDispatcher, SessionConfig, SessionEvent, link_channel, spawn_session};
//!
//! #[tokio::main]
//! async fn main() -> brew_core::Result<()> {
//!     let (link_tx, link_rx) = link_channel();
//!     let link = BleLink::new(link_tx).await;
//!     let events = EventDispatcher::default();
//!     let mut rx = events.subscribe();
//!
//!     let session = spawn_session(link, link_rx, events, SessionConfig::default());
//!     session.start("C4:4F:33:53:7A:57").await?;
//!
//!     while let Ok(event) = rx.recv().await {
//!         if let SessionEvent::TemperatureUpdated { role, value } = event {
//!             println!("{role}: {value:.1}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod ble_link;
pub mod config;
pub mod error;
pub mod events;
pub mod link;
pub mod mock;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod scan;
pub mod session;
pub mod stats;
pub mod util;

pub use ble_link::BleLink;
pub use config::SessionConfig;
pub use error::{
    ConnectError, ConnectionFailure, DeviceNotFoundReason, DiscoveryError, Error,
    OperationError, ResolutionError, Result,
};
pub use events::{
    DisconnectReason, EventDispatcher, EventReceiver, EventSender, EventSink, FnSink,
    OperationContext, RecordingSink, SessionEvent,
};
pub use link::{
    CharacteristicHandle, GattLink, GattStatus, Generation, LinkEvent, LinkEventReceiver,
    LinkEventSender, LinkMessage, OperationTicket, ServiceCatalog, WriteType, link_channel,
};
pub use mock::{MockLink, MockPeripheral};
pub use queue::GattOperation;
pub use registry::CharacteristicRegistry;
pub use retry::{RetryConfig, with_retry};
pub use runtime::{SessionHandle, spawn_session};
pub use scan::{DiscoveredController, ScanOptions, scan_with_retry};
pub use session::{ConnectionState, SessionController};
pub use stats::SessionStats;
pub use util::{create_identifier, format_peripheral_id};

pub use brew_types::uuids;
pub use brew_types::{CharacteristicRole, DestinationEncoding, ParseError, PeripheralAddress};
