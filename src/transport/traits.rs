//! Transport trait abstraction for pluggable link backends

use crate::error::{ConnectError, SendError};
use crate::transport::ActiveLink;
use async_trait::async_trait;
use keypad_link_shared::{Frame, TransportKind};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Signals raised by a transport towards the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSignal {
    /// A complete inbound frame, in wire order
    Frame(Frame),
    /// The device or stack dropped the link
    Dropped { reason: String },
}

/// Channel a transport reports its signals on
pub type SignalSender = mpsc::Sender<LinkSignal>;

/// A byte stream a serial transport can run over
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> TransportStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Factory for opening a link
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open the device, returning the owned link on success
    async fn connect(&self, signals: SignalSender) -> Result<ActiveLink, ConnectError>;

    /// Kind of link this connector produces
    fn kind(&self) -> TransportKind;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// Write failure reported by the GATT stack
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct GattWriteError {
    pub message: String,
}

impl GattWriteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Whether the stack's message says the link is gone
    pub fn mentions_disconnect(&self) -> bool {
        let message = self.message.to_ascii_lowercase();
        message.contains("disconnected") || message.contains("not connected")
    }
}

/// One write/notify characteristic on a connected peripheral
#[async_trait]
pub trait GattLink: Send + Sync + 'static {
    /// Write a single value (at most one chunk) to the characteristic
    async fn write(&self, chunk: &[u8]) -> Result<(), GattWriteError>;

    /// Whether the peripheral is still connected
    async fn is_connected(&self) -> bool;

    /// Drop the connection to the peripheral
    async fn disconnect(&self);
}

/// Anything able to carry an already-serialized payload to the device
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, payload: &str) -> Result<(), SendError>;

    /// Kind of the active link, if any
    fn transport_kind(&self) -> Option<TransportKind>;
}
