//! Stage client
//!
//! Owns the connection lifecycle, the startup handshake, and the dispatch of
//! inbound transport events to the correlator and the event bus. All public
//! operations resolve with exactly one typed outcome; none retry.

mod correlator;
mod sequencer;

use crate::communication::serial::SerialLineTransport;
use crate::communication::{ConnectionParams, LineTransport, TransportEvent};
use crate::protocol::commands::{self, DeviceCommand, MotionKind, ResponseMode};
use crate::protocol::response::DeviceResponse;
use correlator::CommandCorrelator;
use parking_lot::{Mutex, RwLock};
use stagekit_core::{
    ConnectionEvent, ConnectionState, DeviceEvent, EventBus, MoveTarget, Position, Result,
    StageError, StageEvent, TranscriptEntry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Capacity of the transport event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Client for a motorized 3-axis positioning stage
///
/// Cheap to clone; clones share the same connection, pending-command slot,
/// and event bus. Exactly one command may be outstanding across all clones:
/// concurrent issuers observe `Busy` rather than queueing.
#[derive(Clone)]
pub struct StageClient {
    transport: Arc<tokio::sync::Mutex<Box<dyn LineTransport>>>,
    correlator: Arc<CommandCorrelator>,
    state: Arc<RwLock<ConnectionState>>,
    position: Arc<RwLock<Position>>,
    speed: Arc<RwLock<f64>>,
    events: Arc<EventBus>,
    params: Arc<RwLock<Option<ConnectionParams>>>,
    dispatch_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl StageClient {
    /// Create a client backed by the serial transport
    pub fn new() -> Self {
        Self::with_transport(Box::new(SerialLineTransport::new()))
    }

    /// Create a client over a custom transport
    pub fn with_transport(transport: Box<dyn LineTransport>) -> Self {
        Self {
            transport: Arc::new(tokio::sync::Mutex::new(transport)),
            correlator: Arc::new(CommandCorrelator::new()),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            position: Arc::new(RwLock::new(Position::ORIGIN)),
            speed: Arc::new(RwLock::new(0.0)),
            events: Arc::new(EventBus::new()),
            params: Arc::new(RwLock::new(None)),
            dispatch_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Open the endpoint and perform the startup handshake
    ///
    /// Success means the device is minimally responsive, not merely that the
    /// endpoint accepted the open: the firmware information query must be
    /// acknowledged within the handshake timeout, or the connection is torn
    /// back down and the handshake failure is returned.
    pub async fn connect(&self, params: ConnectionParams) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != ConnectionState::Disconnected {
                return Err(StageError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }
        self.events
            .publish(StageEvent::Connection(ConnectionEvent::Connecting {
                port: params.port.clone(),
            }));

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let opened = { self.transport.lock().await.open(&params, tx).await };
        if let Err(e) = opened {
            *self.state.write() = ConnectionState::Disconnected;
            return Err(e);
        }

        let handshake_timeout = params.handshake_timeout;
        *self.params.write() = Some(params.clone());
        *self.state.write() = ConnectionState::Connected;

        // Dispatch must be running before the handshake so its reply is seen
        let dispatcher = self.clone();
        let handle = tokio::spawn(async move { dispatcher.dispatch_loop(rx).await });
        *self.dispatch_task.lock() = Some(handle);

        match self.issue(commands::firmware_info(), handshake_timeout).await {
            Ok(()) => {
                tracing::info!("Connected to stage on {}", params.port);
                self.events
                    .publish(StageEvent::Connection(ConnectionEvent::Connected {
                        port: params.port,
                    }));
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Startup handshake failed: {}", e);
                self.teardown(None).await;
                Err(e)
            }
        }
    }

    /// Close the connection
    ///
    /// A no-op success when already disconnected. A pending command is
    /// resolved with `Disconnected` before the transport closes.
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state == ConnectionState::Disconnected {
                return Ok(());
            }
            *state = ConnectionState::Disconnected;
        }

        if let Some(command) = self.correlator.fail(StageError::Disconnected) {
            tracing::debug!("Disconnect aborted pending command '{}'", command);
        }
        self.teardown(None).await;
        Ok(())
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Cached position: the last commanded target, origin after home
    /// operations. The device remains the source of truth.
    pub fn position(&self) -> Position {
        *self.position.read()
    }

    /// Current client-side speed in mm per time unit
    pub fn speed(&self) -> f64 {
        *self.speed.read()
    }

    /// Set the speed appended to subsequent move commands
    ///
    /// The wire protocol has no persistent speed register; nothing is sent.
    /// A non-positive value omits the speed word from moves.
    pub fn set_speed(&self, speed: f64) {
        *self.speed.write() = speed;
    }

    /// Define the current position as the stage origin
    pub async fn set_home(&self) -> Result<()> {
        self.issue(commands::set_home(), self.command_timeout())
            .await?;
        *self.position.write() = Position::ORIGIN;
        Ok(())
    }

    /// Move to the stage origin
    pub async fn go_home(&self) -> Result<()> {
        self.issue(commands::go_home(), self.command_timeout())
            .await?;
        *self.position.write() = Position::ORIGIN;
        Ok(())
    }

    /// Absolute move; omitted axes keep their current coordinate
    pub async fn move_to(&self, target: MoveTarget, kind: MotionKind) -> Result<()> {
        let command = commands::motion(kind, &target, self.speed());
        self.issue(command, self.command_timeout()).await?;
        self.position.write().apply(&target);
        Ok(())
    }

    /// Relative move; omitted axes do not move
    ///
    /// Composed of a mode switch, the motion, and a mode restore. The
    /// restore is attempted even when the motion fails, so the device is not
    /// left in relative mode; the caller always sees the motion's failure.
    pub async fn move_by(&self, delta: MoveTarget, kind: MotionKind) -> Result<()> {
        self.relative_sequence(delta, kind).await
    }

    /// Send caller-supplied command text with an explicit timeout
    pub async fn send_raw(&self, text: &str, timeout: Duration) -> Result<()> {
        self.issue(commands::raw(text), timeout).await
    }

    /// The event bus carrying connection, transcript, and device events
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to events for async consumption
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.events.receiver()
    }

    /// Copy of the retained wire transcript, oldest first
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.events.transcript()
    }

    pub(crate) fn command_timeout(&self) -> Duration {
        self.params
            .read()
            .as_ref()
            .map(|p| p.command_timeout)
            .unwrap_or(ConnectionParams::default().command_timeout)
    }

    pub(crate) fn current_speed(&self) -> f64 {
        *self.speed.read()
    }

    pub(crate) fn record_relative_move(&self, delta: &MoveTarget) {
        self.position.write().offset_by(delta);
    }

    pub(crate) fn publish(&self, event: StageEvent) {
        self.events.publish(event);
    }

    /// Issue one command and suspend until its single resolution
    ///
    /// Fails fast with `NotConnected` or `Busy`. Otherwise the command is
    /// written, the slot armed, and exactly one of five sources resolves it:
    /// completion marker, error marker, timer expiry, disconnect, or
    /// transport fault.
    pub(crate) async fn issue(&self, command: DeviceCommand, timeout: Duration) -> Result<()> {
        if *self.state.read() != ConnectionState::Connected {
            return Err(StageError::NotConnected);
        }

        let (seq, mut rx) = self.correlator.begin(&command.text)?;

        let written = { self.transport.lock().await.write_line(&command.text).await };
        if let Err(e) = written {
            self.correlator.resolve_if_current(seq, Err(e.clone()));
            if let StageError::Transport { detail } = &e {
                self.teardown(Some(detail.clone())).await;
            }
            return match rx.await {
                Ok(result) => result,
                Err(_) => Err(e),
            };
        }
        self.events
            .publish(StageEvent::Transcript(TranscriptEntry::sent(&command.text)));

        if command.response == ResponseMode::Immediate {
            self.correlator.resolve_if_current(seq, Ok(()));
            return match rx.await {
                Ok(result) => result,
                Err(_) => Err(StageError::Disconnected),
            };
        }

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StageError::Disconnected),
            Err(_elapsed) => {
                // The timer only wins if the slot still holds this command;
                // a marker that raced it has already resolved the receiver.
                self.correlator.expire(seq, timeout);
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(StageError::Disconnected),
                }
            }
        }
    }

    /// Route transport events to the correlator and the event bus
    async fn dispatch_loop(self, mut rx: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Opened => {
                    tracing::debug!("Transport open");
                }
                TransportEvent::Line(line) => {
                    self.events
                        .publish(StageEvent::Transcript(TranscriptEntry::received(&line)));
                    self.handle_line(&line);
                }
                TransportEvent::Fault(detail) => {
                    tracing::error!("Transport fault: {}", detail);
                    *self.state.write() = ConnectionState::Disconnected;
                    if let Some(command) = self.correlator.fail(StageError::transport(detail.clone())) {
                        tracing::warn!("Transport fault aborted pending command '{}'", command);
                    }
                    // This task is the dispatcher; drop its own handle
                    // instead of aborting, then release the endpoint.
                    let _ = self.dispatch_task.lock().take();
                    let _ = self.transport.lock().await.close().await;
                    self.events
                        .publish(StageEvent::Connection(ConnectionEvent::Disconnected {
                            fault: Some(detail),
                        }));
                    break;
                }
                TransportEvent::Closed => {
                    if *self.state.read() == ConnectionState::Connected {
                        tracing::warn!("Transport closed unexpectedly");
                        *self.state.write() = ConnectionState::Disconnected;
                        self.correlator.fail(StageError::Disconnected);
                        self.events
                            .publish(StageEvent::Connection(ConnectionEvent::Disconnected {
                                fault: Some("transport closed".to_string()),
                            }));
                    }
                    break;
                }
            }
        }
    }

    /// Classify one inbound line and resolve or forward it
    fn handle_line(&self, line: &str) {
        match DeviceResponse::classify(line) {
            DeviceResponse::Ok => match self.correlator.complete() {
                Some((command, elapsed)) => {
                    tracing::debug!("Command '{}' completed in {:?}", command, elapsed);
                }
                None => {
                    tracing::debug!("Completion marker with no pending command");
                }
            },
            DeviceResponse::Error(message) => {
                if self
                    .correlator
                    .fail(StageError::device(message.clone()))
                    .is_none()
                {
                    tracing::warn!("Unsolicited device error: {}", message);
                    self.events
                        .publish(StageEvent::Device(DeviceEvent::UnsolicitedError {
                            message,
                        }));
                }
            }
            DeviceResponse::Info(text) => {
                tracing::debug!("Device: {}", text);
            }
        }
    }

    /// Common teardown: stop dispatch, close the transport, announce
    async fn teardown(&self, fault: Option<String>) {
        *self.state.write() = ConnectionState::Disconnected;

        let handle = self.dispatch_task.lock().take();
        if let Some(handle) = handle {
            handle.abort();
        }

        let _ = self.transport.lock().await.close().await;
        self.events
            .publish(StageEvent::Connection(ConnectionEvent::Disconnected {
                fault,
            }));
    }
}

impl Default for StageClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageClient")
            .field("state", &self.connection_state())
            .field("position", &self.position())
            .field("speed", &self.speed())
            .finish()
    }
}
