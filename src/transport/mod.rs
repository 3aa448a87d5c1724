pub mod ble;
pub mod ble_discovery;
pub mod ble_queue;
pub mod serial;
pub mod traits;

pub use ble::BleConnector;
pub use serial::SerialConnector;
pub use traits::{FrameSink, LinkSignal, TransportConnector};

use crate::error::SendError;
use ble::BleTransport;
use ble_queue::BleWriter;
use serial::{SerialTransport, SerialWriter};
use bytes::Bytes;
use keypad_link_shared::TransportKind;

/// The transport owned by the connection manager
pub enum ActiveLink {
    None,
    Serial(SerialTransport),
    Ble(BleTransport),
}

impl ActiveLink {
    pub fn kind(&self) -> Option<TransportKind> {
        match self {
            ActiveLink::None => None,
            ActiveLink::Serial(_) => Some(TransportKind::Serial),
            ActiveLink::Ble(_) => Some(TransportKind::Ble),
        }
    }

    /// A cheap handle that can write frames without holding the link
    pub fn writer(&self) -> Option<LinkWriter> {
        match self {
            ActiveLink::None => None,
            ActiveLink::Serial(serial) => Some(LinkWriter::Serial(serial.writer())),
            ActiveLink::Ble(ble) => Some(LinkWriter::Ble(ble.writer())),
        }
    }

    pub fn is_writable(&self) -> bool {
        match self {
            ActiveLink::None => false,
            ActiveLink::Serial(serial) => serial.is_writable(),
            ActiveLink::Ble(ble) => ble.is_writable(),
        }
    }

    /// Best-effort close; errors are logged, never returned
    pub async fn close(self) {
        match self {
            ActiveLink::None => {}
            ActiveLink::Serial(serial) => serial.close().await,
            ActiveLink::Ble(ble) => ble.close().await,
        }
    }
}

/// Write path of the active link
#[derive(Clone)]
pub enum LinkWriter {
    Serial(SerialWriter),
    Ble(BleWriter),
}

impl LinkWriter {
    /// Write one encoded frame, resolving once it has left the host
    pub async fn write_frame(&self, frame: Bytes) -> Result<(), SendError> {
        match self {
            LinkWriter::Serial(writer) => writer.write_frame(frame).await,
            LinkWriter::Ble(writer) => writer.write_frame(frame).await,
        }
    }
}
