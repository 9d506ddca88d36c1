//! Session runtime.
//!
//! [`spawn_session`] moves a [`SessionController`] into a tokio task that
//! owns it exclusively. The task multiplexes caller commands, link events,
//! operation deadlines and the reconnect timer; no lock guards the
//! controller. Callers talk to the task through a cloneable
//! [`SessionHandle`].
//!
//! # Example
//!
//! ```no_run
//! use brew_core::{BleLink, EventDispatcher, SessionConfig, link_channel, spawn_session};
//! use brew_types::CharacteristicRole;
//!
//! # async fn example() -> brew_core::Result<()> {
//! let (link_tx, link_rx) = link_channel();
//! let link = BleLink::new(link_tx).await;
//! let dispatcher = EventDispatcher::default();
//! let mut events = dispatcher.subscribe();
//!
//! let session = spawn_session(link, link_rx, dispatcher, SessionConfig::default());
//! session.start("C4:4F:33:53:7A:57").await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use brew_types::{CharacteristicRole, PeripheralAddress};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{ConnectError, Error, OperationError, Result};
use crate::events::{EventSink, SessionEvent};
use crate::link::{GattLink, LinkEventReceiver};
use crate::session::{ConnectionState, SessionController};
use crate::stats::SessionStats;

enum Command {
    Start {
        address: String,
        reply: oneshot::Sender<std::result::Result<(), ConnectError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Read {
        role: CharacteristicRole,
        reply: oneshot::Sender<std::result::Result<(), OperationError>>,
    },
    Write {
        role: CharacteristicRole,
        value: f32,
        reply: oneshot::Sender<std::result::Result<(), OperationError>>,
    },
}

/// Handle to a running session task.
///
/// Cloning the handle shares the session. The task stops when
/// [`shutdown`](Self::shutdown) is called or every handle is dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    stats: watch::Receiver<SessionStats>,
    cancel: CancellationToken,
}

impl SessionHandle {
    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)
    }

    /// Start a session with the peripheral at `address`.
    ///
    /// Returns once the connection attempt has been issued; progress is
    /// reported through the event sink.
    ///
    /// # Errors
    ///
    /// [`Error::Connect`] when the controller rejects the request,
    /// [`Error::SessionClosed`] when the task has exited.
    pub async fn start(&self, address: &str) -> Result<()> {
        let address = address.to_string();
        self.call(|reply| Command::Start { address, reply })
            .await?
            .map_err(Error::from)
    }

    /// Stop the session and cancel any pending reconnect.
    pub async fn stop(&self) -> Result<()> {
        self.call(|reply| Command::Stop { reply }).await
    }

    /// Queue a read. The value arrives as a `TemperatureUpdated` event.
    pub async fn request_read(&self, role: CharacteristicRole) -> Result<()> {
        self.call(|reply| Command::Read { role, reply })
            .await?
            .map_err(Error::from)
    }

    /// Queue a write. Success arrives as a `DestinationWritten` event.
    pub async fn request_write(&self, role: CharacteristicRole, value: f32) -> Result<()> {
        self.call(|reply| Command::Write { role, value, reply })
            .await?
            .map_err(Error::from)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the session reaches `target`.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if `timeout` elapses first, [`Error::SessionClosed`]
    /// if the task exits.
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> Result<()> {
        let mut changes = self.state.clone();
        let wait = changes.wait_for(|state| *state == target);
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => Err(Error::timeout(format!("wait for {}", target), timeout)),
        }
    }

    /// Latest statistics snapshot.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }

    /// Whether the session task is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stop the session and end the task.
    ///
    /// Waits until the task has torn the session down.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.commands.closed().await;
    }
}

#[derive(Debug, Default)]
struct Reconnect {
    /// Address to reconnect to; set once a session reaches `Ready`.
    address: Option<PeripheralAddress>,
    attempt: u32,
    due: Option<Instant>,
}

struct SessionTask<L, S> {
    controller: SessionController<L, S>,
    commands: mpsc::UnboundedReceiver<Command>,
    link_events: LinkEventReceiver,
    state_tx: watch::Sender<ConnectionState>,
    stats_tx: watch::Sender<SessionStats>,
    cancel: CancellationToken,
    reconnect: Reconnect,
}

/// Spawn a session task driving `link`.
///
/// `link_events` must be the receiving half of the channel the link sends
/// its completions to. Must be called from within a tokio runtime.
pub fn spawn_session<L, S>(
    link: L,
    link_events: LinkEventReceiver,
    sink: S,
    config: SessionConfig,
) -> SessionHandle
where
    L: GattLink + 'static,
    S: EventSink + 'static,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (stats_tx, stats_rx) = watch::channel(SessionStats::default());
    let cancel = CancellationToken::new();

    let task = SessionTask {
        controller: SessionController::new(link, sink, config),
        commands: command_rx,
        link_events,
        state_tx,
        stats_tx,
        cancel: cancel.clone(),
        reconnect: Reconnect::default(),
    };
    tokio::spawn(task.run());

    SessionHandle {
        commands: command_tx,
        state: state_rx,
        stats: stats_rx,
        cancel,
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<L: GattLink, S: EventSink> SessionTask<L, S> {
    async fn run(mut self) {
        debug!("Session task started");
        loop {
            let deadline = self.controller.next_deadline();
            let reconnect_due = self.reconnect.due;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(message) = self.link_events.recv() => {
                    let before = self.controller.state();
                    self.controller.handle_link_event(message);
                    self.after_transition(before);
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = sleep_until_some(deadline) => {
                    let before = self.controller.state();
                    self.controller.poll_timeouts(Instant::now());
                    self.after_transition(before);
                }
                _ = sleep_until_some(reconnect_due) => self.attempt_reconnect(),
            }
            self.publish();
        }

        self.controller.stop();
        self.publish();
        debug!("Session task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { address, reply } => {
                self.reconnect = Reconnect::default();
                let _ = reply.send(self.controller.start(&address));
            }
            Command::Stop { reply } => {
                self.reconnect = Reconnect::default();
                self.controller.stop();
                let _ = reply.send(());
            }
            Command::Read { role, reply } => {
                let _ = reply.send(self.controller.request_read(role));
            }
            Command::Write { role, value, reply } => {
                let _ = reply.send(self.controller.request_write(role, value));
            }
        }
    }

    /// Track readiness and schedule a reconnect after an unexpected drop.
    fn after_transition(&mut self, before: ConnectionState) {
        let now = self.controller.state();
        if now == ConnectionState::Ready && before != ConnectionState::Ready {
            self.reconnect.address = self.controller.address().cloned();
            self.reconnect.attempt = 0;
        }
        if before.is_active() && now == ConnectionState::Disconnected {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let Some(policy) = self.controller.config().reconnect.clone() else {
            return;
        };
        if self.reconnect.address.is_none() {
            return;
        }
        if self.reconnect.attempt >= policy.max_retries {
            let attempts = self.reconnect.attempt;
            warn!(attempts, "Giving up on reconnecting");
            self.reconnect = Reconnect::default();
            self.controller
                .sink()
                .emit(SessionEvent::ReconnectAbandoned { attempts });
            return;
        }

        let delay = policy.delay_for_attempt(self.reconnect.attempt);
        self.reconnect.attempt += 1;
        self.reconnect.due = Some(Instant::now() + delay);
        info!(attempt = self.reconnect.attempt, ?delay, "Reconnect scheduled");
        self.controller.sink().emit(SessionEvent::ReconnectScheduled {
            attempt: self.reconnect.attempt,
            delay,
        });
    }

    fn attempt_reconnect(&mut self) {
        self.reconnect.due = None;
        let Some(address) = self.reconnect.address.clone() else {
            return;
        };
        if self.controller.state().is_active() {
            return;
        }
        if let Err(e) = self.controller.start_with(address) {
            warn!("Reconnect attempt failed: {}", e);
            self.schedule_reconnect();
        }
    }

    fn publish(&self) {
        let state = self.controller.state();
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        let stats = self.controller.stats();
        self.stats_tx.send_if_modified(|current| {
            let changed = *current != *stats;
            if changed {
                *current = stats.clone();
            }
            changed
        });
    }
}
