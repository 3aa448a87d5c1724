//! BLE GATT transport
//!
//! The keypad exposes a UART-style service (ffe0) with a single
//! characteristic (ffe1) used for both writes and notifications. Outbound
//! frames go through [`BleWriteQueue`]; notifications are reassembled into
//! lines by a pump task.

use crate::config::{BleConfig, BleTiming};
use crate::error::ConnectError;
use crate::transport::ble_discovery::{map_bluer_error, BleDiscovery};
use crate::transport::ble_queue::{BleWriteQueue, BleWriter};
use crate::transport::traits::{
    GattLink, GattWriteError, LinkSignal, SignalSender, TransportConnector,
};
use crate::transport::ActiveLink;
use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::{Device, DeviceEvent, DeviceProperty, Uuid};
use futures::{Stream, StreamExt};
use keypad_link_shared::{ble, CodecError, LineDecoder, TransportKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// An open BLE link
pub struct BleTransport {
    label: String,
    link: Arc<dyn GattLink>,
    queue: BleWriteQueue,
    tasks: Vec<JoinHandle<()>>,
}

impl BleTransport {
    /// Start the write queue and the notification pump
    pub fn spawn<N>(
        label: String,
        link: Arc<dyn GattLink>,
        notifications: N,
        timing: BleTiming,
        signals: SignalSender,
    ) -> Self
    where
        N: Stream<Item = Vec<u8>> + Send + 'static,
    {
        let queue = BleWriteQueue::spawn(link.clone(), timing, signals.clone());
        let pump = tokio::spawn(pump_notifications(notifications, signals));
        Self {
            label,
            link,
            queue,
            tasks: vec![pump],
        }
    }

    /// Tie an extra background task to the lifetime of this link
    pub fn attach_task(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn writer(&self) -> BleWriter {
        self.queue.writer()
    }

    pub fn is_writable(&self) -> bool {
        self.queue.is_running()
    }

    /// Abandon pending writes and drop the GATT connection
    pub async fn close(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.queue.abandon();
        self.link.disconnect().await;
        info!("[BLE] Closed {}", self.label);
    }
}

/// Reassemble notifications into frames until the stream ends
pub(crate) async fn pump_notifications<N>(notifications: N, signals: SignalSender)
where
    N: Stream<Item = Vec<u8>> + Send,
{
    tokio::pin!(notifications);
    let mut decoder = LineDecoder::new();

    while let Some(value) = notifications.next().await {
        decoder.extend(&value);
        loop {
            match decoder.decode_next() {
                Ok(Some(frame)) => {
                    if signals.send(LinkSignal::Frame(frame)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(CodecError::LineTooLong(len)) => {
                    warn!("[BLE] Discarded {} bytes without a line delimiter", len);
                }
                Err(e) => {
                    warn!("[BLE] Decode error: {}", e);
                    break;
                }
            }
        }
        // One object per notification without a delimiter
        if let Some(frame) = decoder.take_complete_object() {
            if signals.send(LinkSignal::Frame(frame)).await.is_err() {
                return;
            }
        }
    }

    let _ = signals
        .send(LinkSignal::Dropped {
            reason: "notifications stopped".into(),
        })
        .await;
}

/// Report the peripheral going away
pub(crate) async fn watch_device<E>(events: E, signals: SignalSender)
where
    E: Stream<Item = DeviceEvent> + Send,
{
    tokio::pin!(events);
    while let Some(event) = events.next().await {
        if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
            warn!("[BLE] Device disconnected");
            let _ = signals
                .send(LinkSignal::Dropped {
                    reason: "device disconnected".into(),
                })
                .await;
            return;
        }
    }
}

/// GATT characteristic backed by BlueZ
pub struct BluerLink {
    device: Device,
    characteristic: Characteristic,
}

#[async_trait]
impl GattLink for BluerLink {
    async fn write(&self, chunk: &[u8]) -> Result<(), GattWriteError> {
        self.characteristic
            .write(chunk)
            .await
            .map_err(|e| GattWriteError::new(e.to_string()))
    }

    async fn is_connected(&self) -> bool {
        self.device.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) {
        if let Err(e) = self.device.disconnect().await {
            debug!("[BLE] Disconnect of {} failed: {}", self.device.address(), e);
        }
    }
}

/// Connector that scans for the keypad and opens its UART characteristic
pub struct BleConnector {
    config: BleConfig,
}

impl BleConnector {
    pub fn new(config: BleConfig) -> Self {
        Self { config }
    }

    async fn wait_for_services(&self, device: &Device) -> Result<(), ConnectError> {
        let deadline = Instant::now() + self.config.services_timeout;
        loop {
            if device
                .is_services_resolved()
                .await
                .map_err(|e| map_bluer_error(e, "services"))?
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ConnectError::Other("GATT services not resolved".into()));
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn find_characteristic(&self, device: &Device) -> Result<Characteristic, ConnectError> {
        let service_uuid = Uuid::from_u128(ble::SERVICE_UUID);
        let characteristic_uuid = Uuid::from_u128(ble::CHARACTERISTIC_UUID);

        let services = device
            .services()
            .await
            .map_err(|e| map_bluer_error(e, "services"))?;
        for service in services {
            if service.uuid().await.ok() != Some(service_uuid) {
                continue;
            }
            let characteristics = service
                .characteristics()
                .await
                .map_err(|e| map_bluer_error(e, "characteristics"))?;
            for characteristic in characteristics {
                if characteristic.uuid().await.ok() == Some(characteristic_uuid) {
                    return Ok(characteristic);
                }
            }
        }
        Err(ConnectError::DeviceNotFound(
            "device does not expose the keypad UART characteristic".into(),
        ))
    }

    async fn open(&self, device: &Device, signals: SignalSender) -> Result<BleTransport, ConnectError> {
        if !device.is_connected().await.unwrap_or(false) {
            device
                .connect()
                .await
                .map_err(|e| map_bluer_error(e, "connect"))?;
        }
        self.wait_for_services(device).await?;
        let characteristic = self.find_characteristic(device).await?;

        let notifications = characteristic
            .notify()
            .await
            .map_err(|e| map_bluer_error(e, "notify"))?;
        let events = device
            .events()
            .await
            .map_err(|e| map_bluer_error(e, "device events"))?;

        let label = match device.name().await.ok().flatten() {
            Some(name) => format!("{} ({})", name, device.address()),
            None => device.address().to_string(),
        };
        let link: Arc<dyn GattLink> = Arc::new(BluerLink {
            device: device.clone(),
            characteristic,
        });

        let mut transport = BleTransport::spawn(
            label,
            link,
            notifications,
            self.config.timing,
            signals.clone(),
        );
        transport.attach_task(tokio::spawn(watch_device(events, signals)));
        Ok(transport)
    }
}

#[async_trait]
impl TransportConnector for BleConnector {
    async fn connect(&self, signals: SignalSender) -> Result<ActiveLink, ConnectError> {
        let adapter = BleDiscovery::get_adapter().await?;
        info!("[BLE] Using adapter {}", adapter.name());

        let discovery = BleDiscovery::new(self.config.clone());
        let device = discovery.find_keypad(&adapter).await?;

        match self.open(&device, signals).await {
            Ok(transport) => {
                info!("[BLE] Connected to {}", transport.label());
                Ok(ActiveLink::Ble(transport))
            }
            Err(e) => {
                let _ = device.disconnect().await;
                Err(e)
            }
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    fn name(&self) -> &'static str {
        "BLE"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SendError;
    use crate::transport::ble_queue::tests::MockGatt;
    use bytes::Bytes;
    use keypad_link_shared::Frame;
    use tokio::sync::mpsc;

    fn notification_stream(rx: mpsc::UnboundedReceiver<Vec<u8>>) -> impl Stream<Item = Vec<u8>> {
        futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|v| (v, rx)) })
    }

    #[tokio::test]
    async fn test_notifications_reassemble_lines() {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(pump_notifications(notification_stream(notify_rx), tx));

        notify_tx.send(b"{\"type\":\"light\",".to_vec()).unwrap();
        notify_tx.send(b"\"level\":12}\n{\"type\":\"sta".to_vec()).unwrap();
        notify_tx.send(b"tus\",\"message\":\"ok\"}\n".to_vec()).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(LinkSignal::Frame(Frame::new(r#"{"type":"light","level":12}"#)))
        );
        assert_eq!(
            rx.recv().await,
            Some(LinkSignal::Frame(Frame::new(r#"{"type":"status","message":"ok"}"#)))
        );
    }

    #[tokio::test]
    async fn test_undelimited_object_is_flushed() {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(pump_notifications(notification_stream(notify_rx), tx));

        notify_tx.send(b"{\"type\":\"keypress\",\"row\":0,\"col\":3}".to_vec()).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(LinkSignal::Frame(Frame::new(r#"{"type":"keypress","row":0,"col":3}"#)))
        );
    }

    #[tokio::test]
    async fn test_stream_end_signals_dropped() {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(pump_notifications(notification_stream(notify_rx), tx));

        drop(notify_tx);
        assert!(matches!(rx.recv().await, Some(LinkSignal::Dropped { .. })));
    }

    #[tokio::test]
    async fn test_device_disconnect_event() {
        let (tx, mut rx) = mpsc::channel(16);
        let events = futures::stream::iter(vec![
            DeviceEvent::PropertyChanged(DeviceProperty::Connected(true)),
            DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)),
        ]);
        watch_device(events, tx).await;

        assert!(matches!(rx.recv().await, Some(LinkSignal::Dropped { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_disconnects_and_abandons_queue() {
        let gatt = Arc::new(MockGatt::default());
        let (_notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (tx, _rx) = mpsc::channel(16);
        let link: Arc<dyn GattLink> = gatt.clone();
        let transport = BleTransport::spawn(
            "mock".into(),
            link,
            notification_stream(notify_rx),
            BleTiming::default(),
            tx,
        );
        let writer = transport.writer();
        assert!(transport.is_writable());

        transport.close().await;

        assert!(!gatt.is_connected().await);
        let result = writer.write_frame(Bytes::from_static(b"x\n")).await;
        assert!(matches!(result, Err(SendError::NotConnected)));
    }
}
