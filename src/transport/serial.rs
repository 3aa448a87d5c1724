//! USB serial transport
//!
//! 115200 baud, 8N1, no flow control. A background task reads the port,
//! splits the byte stream into lines and forwards them as frames; writes go
//! through a shared half guarded by a mutex so each frame lands whole.

use crate::config::SerialConfig;
use crate::error::{ConnectError, SendError};
use crate::transport::traits::{LinkSignal, SignalSender, TransportConnector, TransportStream};
use crate::transport::ActiveLink;
use async_trait::async_trait;
use bytes::Bytes;
use keypad_link_shared::{serial, CodecError, LineDecoder, TransportKind};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialPortType, StopBits};
use tracing::{debug, info, warn};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Upper bound on flushing the write half when closing
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// Write handle of an open serial link
#[derive(Clone)]
pub struct SerialWriter {
    inner: Arc<Mutex<BoxedWriter>>,
    alive: Arc<AtomicBool>,
    closed: watch::Receiver<bool>,
}

impl SerialWriter {
    /// Write one encoded frame and flush it to the port
    ///
    /// A write still pending when the transport closes is cancelled and
    /// reports `NotConnected`; the device may have received part of it.
    pub async fn write_frame(&self, frame: Bytes) -> Result<(), SendError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(SendError::NotConnected);
        }
        let mut closed = self.closed.clone();
        tokio::select! {
            result = self.write_locked(&frame) => result,
            _ = closed.wait_for(|closed| *closed) => Err(SendError::NotConnected),
        }
    }

    async fn write_locked(&self, frame: &[u8]) -> Result<(), SendError> {
        let mut writer = self.inner.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    pub fn is_writable(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// An open serial link
pub struct SerialTransport {
    port_name: String,
    writer: SerialWriter,
    reader: JoinHandle<()>,
    closed: watch::Sender<bool>,
}

impl SerialTransport {
    /// Open the configured port (or the first USB port) with the keypad's line settings
    pub fn open_port(
        config: &SerialConfig,
    ) -> Result<(tokio_serial::SerialStream, String), ConnectError> {
        let port_name = match &config.port {
            Some(port) => port.clone(),
            None => find_usb_port()?,
        };

        info!("[USB] Opening {} at {} baud", port_name, config.baud_rate);
        let stream = tokio_serial::new(&port_name, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| map_open_error(e, &port_name))?;

        Ok((stream, port_name))
    }

    /// Start the read loop over an already-open stream
    pub fn spawn<S: TransportStream>(stream: S, port_name: String, signals: SignalSender) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let alive = Arc::new(AtomicBool::new(true));
        let (closed, closed_rx) = watch::channel(false);

        let reader = tokio::spawn(read_loop(
            read_half,
            signals,
            alive.clone(),
            port_name.clone(),
        ));

        Self {
            port_name,
            writer: SerialWriter {
                inner: Arc::new(Mutex::new(Box::new(write_half))),
                alive,
                closed: closed_rx,
            },
            reader,
            closed,
        }
    }

    pub fn writer(&self) -> SerialWriter {
        self.writer.clone()
    }

    pub fn is_writable(&self) -> bool {
        self.writer.is_writable() && !self.reader.is_finished()
    }

    /// Cancel pending writes, stop reading, then release the write half
    pub async fn close(self) {
        self.writer.alive.store(false, Ordering::Release);
        self.closed.send_replace(true);
        self.reader.abort();
        let _ = self.reader.await;

        let shutdown = async {
            let mut writer = self.writer.inner.lock().await;
            writer.shutdown().await
        };
        match timeout(SHUTDOWN_TIMEOUT, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("[USB] Shutdown of {} failed: {}", self.port_name, e),
            Err(_) => warn!("[USB] Write half of {} did not shut down, dropping it", self.port_name),
        }
        info!("[USB] Closed {}", self.port_name);
    }
}

/// Read until EOF or a fatal error, forwarding every complete line
async fn read_loop<R>(mut reader: R, signals: SignalSender, alive: Arc<AtomicBool>, port: String)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; serial::READ_BUFFER_SIZE];

    let reason = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break "port closed".to_string(),
            Ok(n) => n,
            Err(e) if is_transient(&e) => {
                debug!("[USB] Transient read error on {}: {}", port, e);
                continue;
            }
            Err(e) => break format!("read error: {}", e),
        };

        decoder.extend(&buf[..n]);
        loop {
            match decoder.decode_next() {
                Ok(Some(frame)) => {
                    if signals.send(LinkSignal::Frame(frame)).await.is_err() {
                        // Nobody is listening any more
                        alive.store(false, Ordering::Release);
                        return;
                    }
                }
                Ok(None) => break,
                Err(CodecError::LineTooLong(len)) => {
                    warn!("[USB] Discarded {} bytes without a line delimiter", len);
                }
                Err(e) => {
                    warn!("[USB] Decode error: {}", e);
                    break;
                }
            }
        }
    };

    alive.store(false, Ordering::Release);
    warn!("[USB] Link on {} ended: {}", port, reason);
    let _ = signals.send(LinkSignal::Dropped { reason }).await;
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Pick the first USB serial port, falling back to any port at all
fn find_usb_port() -> Result<String, ConnectError> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| ConnectError::DeviceNotFound(format!("cannot enumerate ports: {}", e)))?;

    ports
        .iter()
        .find(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
        .or_else(|| ports.first())
        .map(|p| p.port_name.clone())
        .ok_or_else(|| ConnectError::DeviceNotFound("no serial port available".into()))
}

/// Classify an open failure into the connect error taxonomy
fn map_open_error(err: tokio_serial::Error, port: &str) -> ConnectError {
    let detail = format!("{}: {}", port, err.description);
    match err.kind {
        tokio_serial::ErrorKind::NoDevice => ConnectError::DeviceNotFound(detail),
        tokio_serial::ErrorKind::Io(io::ErrorKind::NotFound) => ConnectError::DeviceNotFound(detail),
        tokio_serial::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            ConnectError::PermissionDenied(detail)
        }
        _ if is_busy(&err.description) => ConnectError::AlreadyOpen(detail),
        _ => ConnectError::Other(detail),
    }
}

fn is_busy(description: &str) -> bool {
    let description = description.to_ascii_lowercase();
    description.contains("busy") || description.contains("already open") || description.contains("in use")
}

/// Connector opening the configured serial port
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportConnector for SerialConnector {
    async fn connect(&self, signals: SignalSender) -> Result<ActiveLink, ConnectError> {
        let (stream, port_name) = SerialTransport::open_port(&self.config)?;
        Ok(ActiveLink::Serial(SerialTransport::spawn(
            stream, port_name, signals,
        )))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn name(&self) -> &'static str {
        "USB"
    }
}
