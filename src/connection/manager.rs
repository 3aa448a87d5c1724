//! Connection manager owning the single active device link

use crate::config::LinkConfig;
use crate::error::{ConnectError, SendError};
use crate::poller::{PollSnapshot, StatusPollGate, StatusPoller, StatusPollerHandle};
use crate::router::{DeviceEvent, MessageRouter};
use crate::transport::{
    ActiveLink, BleConnector, FrameSink, LinkSignal, SerialConnector, TransportConnector,
};
use async_trait::async_trait;
use keypad_link_shared::{
    codec, ConnectionState, LinkStateMachine, LinkTrigger, TransitionResult, TransportKind,
};
use serde::Serialize;
use std::mem;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Buffered signals between a transport and the inbound pump
const SIGNAL_CAPACITY: usize = 256;

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The connection lifecycle moved
    StateChanged(ConnectionState),
    /// The device or stack dropped the link without being asked to
    LinkLost { kind: TransportKind, reason: String },
    /// Something the device sent
    Device(DeviceEvent),
}

/// Receiving side of the manager's event stream
pub type EventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

struct Session {
    machine: LinkStateMachine,
    link: ActiveLink,
    /// Bumped on every successful open so stale drop signals can be ignored
    generation: u64,
    pump: Option<JoinHandle<()>>,
    poller: Option<StatusPollerHandle>,
}

struct Inner {
    config: LinkConfig,
    session: Mutex<Session>,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    poll_gate: StatusPollGate,
}

/// Owns the connection lifecycle and the one active transport
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

/// Non-owning handle for background tasks
#[derive(Clone)]
pub struct WeakConnectionManager {
    inner: Weak<Inner>,
}

impl WeakConnectionManager {
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        self.inner.upgrade().map(|inner| ConnectionManager { inner })
    }
}

impl ConnectionManager {
    /// Create a disconnected manager and its event stream
    pub fn new(config: LinkConfig) -> (Self, EventReceiver) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let manager = Self {
            inner: Arc::new(Inner {
                config,
                session: Mutex::new(Session {
                    machine: LinkStateMachine::new(),
                    link: ActiveLink::None,
                    generation: 0,
                    pump: None,
                    poller: None,
                }),
                state_tx,
                event_tx,
                poll_gate: StatusPollGate::new(),
            }),
        };
        (manager, event_rx)
    }

    pub fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.state().transport()
    }

    /// Keep the status poller quiet for a while (e.g. around a settings write)
    pub fn pause_status_polling(&self, duration: Duration) {
        self.inner.poll_gate.pause_for(duration);
    }

    /// Open a link of the given kind using the configured device selection
    pub async fn connect(&self, kind: TransportKind) -> Result<(), ConnectError> {
        match kind {
            TransportKind::Serial => {
                self.connect_via(&SerialConnector::new(self.inner.config.serial.clone()))
                    .await
            }
            TransportKind::Ble => {
                self.connect_via(&BleConnector::new(self.inner.config.ble.clone()))
                    .await
            }
            TransportKind::Wifi => {
                warn!("[LINK] {} is not supported", kind);
                Err(ConnectError::Unsupported(kind))
            }
        }
    }

    /// Open a link through the given connector
    pub async fn connect_via<C>(&self, connector: &C) -> Result<(), ConnectError>
    where
        C: TransportConnector + ?Sized,
    {
        let kind = connector.kind();
        if kind == TransportKind::Wifi {
            return Err(ConnectError::Unsupported(kind));
        }

        let mut session = self.inner.session.lock().await;
        if let TransitionResult::Invalid { from, .. } =
            self.apply(&mut session, LinkTrigger::ConnectRequested)
        {
            debug!("[LINK] Connect refused while {}", from);
            return Err(ConnectError::AlreadyConnected);
        }

        info!("[LINK] Connecting via {}...", connector.name());
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);

        match connector.connect(signal_tx).await {
            Ok(link) => {
                session.generation += 1;
                let generation = session.generation;
                session.link = link;
                self.apply(&mut session, LinkTrigger::Opened(kind));

                session.pump = Some(tokio::spawn(pump_inbound(
                    self.downgrade(),
                    generation,
                    kind,
                    signal_rx,
                )));

                // The device streams its configuration right after connecting
                self.inner
                    .poll_gate
                    .pause_for(self.inner.config.poll.connect_quiet);
                session.poller = Some(StatusPoller::start(
                    self.downgrade(),
                    self.inner.poll_gate.clone(),
                    self.inner.config.poll.clone(),
                ));

                info!("[LINK] Connected via {}", kind);
                Ok(())
            }
            Err(e) => {
                warn!("[LINK] {} connection failed: {}", kind, e);
                self.apply(&mut session, LinkTrigger::OpenFailed);
                Err(e)
            }
        }
    }

    /// Close the link if there is one; never fails
    pub async fn disconnect(&self) {
        let mut session = self.inner.session.lock().await;

        if let Some(pump) = session.pump.take() {
            pump.abort();
        }
        session.poller = None;
        let link = mem::replace(&mut session.link, ActiveLink::None);
        if let Some(kind) = link.kind() {
            debug!("[LINK] Closing {} link", kind);
        }
        link.close().await;

        match self.apply(&mut session, LinkTrigger::DisconnectRequested) {
            TransitionResult::Success(_) => info!("[LINK] Disconnected"),
            _ => debug!("[LINK] Already disconnected"),
        }
    }

    /// Send one payload as a single frame
    pub async fn send(&self, payload: &str) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        let frame = codec::encode_text(payload)?;

        let writer = {
            let session = self.inner.session.lock().await;
            if !session.machine.state().is_connected() {
                return Err(SendError::NotConnected);
            }
            session.link.writer().ok_or(SendError::NotConnected)?
        };

        debug!("[LINK] Sending {} bytes", frame.len());
        writer.write_frame(frame).await
    }

    /// Serialize a message and send it
    pub async fn send_message<T>(&self, message: &T) -> Result<(), SendError>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_string(message).map_err(|e| SendError::Encode(e.to_string()))?;
        self.send(&payload).await
    }

    pub(crate) async fn poll_snapshot(&self) -> PollSnapshot {
        let session = self.inner.session.lock().await;
        PollSnapshot {
            state: session.machine.state(),
            writable: session.link.is_writable(),
        }
    }

    async fn handle_link_lost(&self, generation: u64, kind: TransportKind, reason: String) {
        let mut session = self.inner.session.lock().await;
        if session.generation != generation || !session.machine.state().is_connected() {
            debug!("[LINK] Ignoring stale drop: {}", reason);
            return;
        }

        warn!("[LINK] {} link lost: {}", kind, reason);
        // The pump calling us is the one being retired
        session.pump = None;
        session.poller = None;
        self.emit(LinkEvent::LinkLost { kind, reason });

        let link = mem::replace(&mut session.link, ActiveLink::None);
        link.close().await;
        self.apply(&mut session, LinkTrigger::LinkDropped);
    }

    /// Run a trigger through the state machine, publishing any change
    fn apply(&self, session: &mut Session, trigger: LinkTrigger) -> TransitionResult {
        let result = session.machine.process(trigger);
        if let TransitionResult::Success(state) = &result {
            self.inner.state_tx.send_replace(*state);
            self.emit(LinkEvent::StateChanged(*state));
        }
        result
    }

    fn emit(&self, event: LinkEvent) {
        // Nobody listening is fine
        let _ = self.inner.event_tx.send(event);
    }
}

#[async_trait]
impl FrameSink for ConnectionManager {
    async fn send_frame(&self, payload: &str) -> Result<(), SendError> {
        self.send(payload).await
    }

    fn transport_kind(&self) -> Option<TransportKind> {
        ConnectionManager::transport_kind(self)
    }
}

/// Deliver one connection's inbound frames, in order, until it ends
async fn pump_inbound(
    manager: WeakConnectionManager,
    generation: u64,
    kind: TransportKind,
    mut signals: mpsc::Receiver<LinkSignal>,
) {
    let mut router = MessageRouter::new();

    while let Some(signal) = signals.recv().await {
        let Some(manager) = manager.upgrade() else {
            return;
        };
        match signal {
            LinkSignal::Frame(frame) => {
                for event in router.dispatch(&frame) {
                    manager.emit(LinkEvent::Device(event));
                }
            }
            LinkSignal::Dropped { reason } => {
                manager.handle_link_lost(generation, kind, reason).await;
                return;
            }
        }
    }
}
