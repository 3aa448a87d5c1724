//! Chunked firmware upload over the device link
//!
//! Protocol:
//! 1. `ota_start {filename, size, chunks}` then a settle delay
//! 2. `ota_chunk {index, data, encoded: true}` per 256-byte slice, paced
//! 3. `ota_end` then a grace period while the device finalizes
//!
//! Completion is optimistic: the device's own `ota_status` reports are
//! surfaced by the router but not awaited here.

use super::session::{OtaPhase, OtaSession};
use crate::config::OtaConfig;
use crate::error::OtaError;
use crate::transport::FrameSink;
use keypad_link_shared::messages::LinkMessage;
use keypad_link_shared::{codec, CodecError, TransportKind};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// Progress reports of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaEvent {
    Started {
        filename: String,
        size: usize,
        chunks: usize,
    },
    Progress {
        percent: u8,
        chunk: usize,
        total: usize,
    },
    Completed {
        filename: String,
    },
    Aborted {
        message: String,
    },
    /// The uploader is idle again and may be reused
    Ready,
}

/// Drives one firmware transfer at a time over a [`FrameSink`]
pub struct OtaUploader<S> {
    sink: S,
    config: OtaConfig,
    phase: OtaPhase,
    events: mpsc::UnboundedSender<OtaEvent>,
}

impl<S: FrameSink> OtaUploader<S> {
    pub fn new(sink: S, config: OtaConfig) -> (Self, mpsc::UnboundedReceiver<OtaEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                sink,
                config,
                phase: OtaPhase::Idle,
                events,
            },
            rx,
        )
    }

    pub fn phase(&self) -> OtaPhase {
        self.phase
    }

    /// Run a complete transfer: begin, transfer every chunk, end
    pub async fn upload(&mut self, image: &[u8], filename: &str) -> Result<(), OtaError> {
        let mut session = self.begin(image, filename).await?;
        self.transfer(&mut session, image).await?;
        self.end(&session).await
    }

    /// Validate the image and announce the transfer to the device
    pub async fn begin(&mut self, image: &[u8], filename: &str) -> Result<OtaSession, OtaError> {
        if self.phase != OtaPhase::Idle {
            return Err(OtaError::Busy);
        }
        match self.start_session(image, filename).await {
            Ok(session) => Ok(session),
            Err(e) => self.abort(e),
        }
    }

    /// Send every remaining chunk of the session
    pub async fn transfer(&mut self, session: &mut OtaSession, image: &[u8]) -> Result<(), OtaError> {
        match self.send_chunks(session, image).await {
            Ok(()) => Ok(()),
            Err(e) => self.abort(e),
        }
    }

    /// Close the transfer and wait for the device to finalize
    pub async fn end(&mut self, session: &OtaSession) -> Result<(), OtaError> {
        if !session.is_complete() {
            return self.abort(OtaError::Incomplete {
                sent: session.current_index,
                total: session.total_chunks,
            });
        }
        self.phase = OtaPhase::Completing;
        if let Err(e) = self.send(&LinkMessage::OtaEnd).await {
            return self.abort(e);
        }
        info!("[OTA] Sent {} ({} bytes), waiting for device", session.filename, session.total_size);
        self.emit(OtaEvent::Completed {
            filename: session.filename.clone(),
        });

        sleep(self.config.completion_grace).await;
        self.phase = OtaPhase::Idle;
        self.emit(OtaEvent::Ready);
        Ok(())
    }

    /// Return to idle after a session was dropped or an upload was cancelled
    /// mid-way; no-op when nothing is in progress
    pub fn reset(&mut self) {
        if self.phase != OtaPhase::Idle {
            let _ = self.abort::<()>(OtaError::Cancelled);
        }
    }

    async fn start_session(&mut self, image: &[u8], filename: &str) -> Result<OtaSession, OtaError> {
        if image.is_empty() {
            return Err(OtaError::EmptyImage);
        }
        self.phase = OtaPhase::Starting;

        let session = OtaSession::new(filename, image.len(), self.config.chunk_size);
        self.preflight(&session, image)?;

        info!(
            "[OTA] Starting {}: {} bytes in {} chunks (~{} bytes encoded)",
            session.filename,
            session.total_size,
            session.total_chunks,
            session.estimated_encoded_size()
        );
        self.send(&LinkMessage::OtaStart {
            filename: session.filename.clone(),
            size: session.total_size,
            chunks: session.total_chunks,
        })
        .await?;
        self.emit(OtaEvent::Started {
            filename: session.filename.clone(),
            size: session.total_size,
            chunks: session.total_chunks,
        });

        sleep(self.config.settle_delay).await;
        Ok(session)
    }

    async fn send_chunks(&mut self, session: &mut OtaSession, image: &[u8]) -> Result<(), OtaError> {
        self.phase = OtaPhase::Transferring;
        let delay = self.inter_chunk_delay();

        while let Some(range) = session.next_chunk() {
            let index = session.current_index;
            let message = LinkMessage::ota_chunk(index, &image[range]);
            let payload = serde_json::to_string(&message).map_err(CodecError::from)?;
            if payload.len() > self.config.max_message_size {
                return Err(OtaError::ChunkTooLarge {
                    index,
                    size: payload.len(),
                    limit: self.config.max_message_size,
                });
            }

            self.sink.send_frame(&payload).await?;
            session.advance();
            debug!("[OTA] Chunk {}/{}", session.current_index, session.total_chunks);
            self.emit(OtaEvent::Progress {
                percent: session.progress_percent(),
                chunk: session.current_index,
                total: session.total_chunks,
            });

            sleep(delay).await;
        }
        Ok(())
    }

    /// Every chunk message must fit the device's receive buffer before anything is sent
    fn preflight(&self, session: &OtaSession, image: &[u8]) -> Result<(), OtaError> {
        for index in 0..session.total_chunks {
            let message = LinkMessage::ota_chunk(index, &image[session.chunk_range(index)]);
            let size = codec::encoded_len(&message)?;
            if size > self.config.max_message_size {
                return Err(OtaError::ChunkTooLarge {
                    index,
                    size,
                    limit: self.config.max_message_size,
                });
            }
        }
        Ok(())
    }

    fn inter_chunk_delay(&self) -> Duration {
        match self.sink.transport_kind() {
            Some(TransportKind::Ble) => self.config.inter_chunk_delay_ble,
            _ => self.config.inter_chunk_delay_serial,
        }
    }

    async fn send(&self, message: &LinkMessage) -> Result<(), OtaError> {
        let payload = serde_json::to_string(message).map_err(CodecError::from)?;
        self.sink.send_frame(&payload).await?;
        Ok(())
    }

    fn abort<T>(&mut self, err: OtaError) -> Result<T, OtaError> {
        error!("[OTA] Update aborted: {}", err);
        self.phase = OtaPhase::Aborted;
        self.emit(OtaEvent::Aborted {
            message: err.to_string(),
        });
        self.phase = OtaPhase::Idle;
        self.emit(OtaEvent::Ready);
        Err(err)
    }

    fn emit(&self, event: OtaEvent) {
        // The receiver is optional
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SendError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Clone)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<(Instant, String)>>>,
        kind: TransportKind,
        fail_at: Option<usize>,
    }

    impl RecordingSink {
        fn new(kind: TransportKind) -> Self {
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                kind,
                fail_at: None,
            }
        }

        fn payloads(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
        }

        fn times(&self) -> Vec<Instant> {
            self.sent.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(&self, payload: &str) -> Result<(), SendError> {
            let mut sent = self.sent.lock().unwrap();
            if self.fail_at == Some(sent.len()) {
                return Err(SendError::LinkLost);
            }
            sent.push((Instant::now(), payload.to_string()));
            Ok(())
        }

        fn transport_kind(&self) -> Option<TransportKind> {
            Some(self.kind)
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<OtaEvent>) -> Vec<OtaEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_sends_start_chunks_end() {
        let sink = RecordingSink::new(TransportKind::Serial);
        let (mut uploader, mut rx) = OtaUploader::new(sink.clone(), OtaConfig::default());
        let image = image(1000);

        uploader.upload(&image, "main.py").await.unwrap();

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 6);
        let start: Value = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(
            start,
            json!({"type": "ota_start", "filename": "main.py", "size": 1000, "chunks": 4})
        );
        for (i, range) in [0..256, 256..512, 512..768, 768..1000].into_iter().enumerate() {
            let expected = serde_json::to_string(&LinkMessage::ota_chunk(i, &image[range])).unwrap();
            assert_eq!(payloads[i + 1], expected);
            assert!(payloads[i + 1].len() <= 512);
        }
        assert_eq!(payloads[5], r#"{"type":"ota_end"}"#);

        let progress: Vec<u8> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                OtaEvent::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![25, 50, 75, 100]);
        assert_eq!(uploader.phase(), OtaPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_pacing() {
        let sink = RecordingSink::new(TransportKind::Serial);
        let (mut uploader, _rx) = OtaUploader::new(sink.clone(), OtaConfig::default());
        let started = Instant::now();

        uploader.upload(&image(600), "fw.bin").await.unwrap();

        let times = sink.times();
        assert!(times[1] - times[0] >= Duration::from_millis(500));
        for pair in times[1..].windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(80));
        }
        // Grace period after ota_end
        assert!(Instant::now() - *times.last().unwrap() >= Duration::from_secs(3));
        assert!(Instant::now() > started);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ble_uses_longer_chunk_delay() {
        let sink = RecordingSink::new(TransportKind::Ble);
        let (mut uploader, _rx) = OtaUploader::new(sink.clone(), OtaConfig::default());

        uploader.upload(&image(600), "fw.bin").await.unwrap();

        let times = sink.times();
        assert!(times[2] - times[1] >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_chunk_aborts_before_sending() {
        let sink = RecordingSink::new(TransportKind::Serial);
        let config = OtaConfig {
            chunk_size: 512,
            ..Default::default()
        };
        let (mut uploader, mut rx) = OtaUploader::new(sink.clone(), config);

        let result = uploader.upload(&image(1000), "big.bin").await;

        assert!(matches!(
            result,
            Err(OtaError::ChunkTooLarge { index: 0, limit: 512, .. })
        ));
        assert!(sink.payloads().is_empty());
        let events = drain(&mut rx);
        assert!(matches!(events[0], OtaEvent::Aborted { .. }));
        assert_eq!(events[1], OtaEvent::Ready);
        assert_eq!(uploader.phase(), OtaPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_aborts_and_resets() {
        let mut sink = RecordingSink::new(TransportKind::Serial);
        sink.fail_at = Some(2);
        let (mut uploader, mut rx) = OtaUploader::new(sink.clone(), OtaConfig::default());

        let result = uploader.upload(&image(1000), "main.py").await;

        assert!(matches!(result, Err(OtaError::Send(SendError::LinkLost))));
        assert_eq!(sink.payloads().len(), 2);
        assert!(!sink.payloads().iter().any(|p| p.contains("ota_end")));

        let events = drain(&mut rx);
        assert_eq!(events.last(), Some(&OtaEvent::Ready));
        assert!(events.iter().any(|e| matches!(e, OtaEvent::Aborted { .. })));
        assert_eq!(uploader.phase(), OtaPhase::Idle);

        // The uploader can be used again
        let retry = RecordingSink::new(TransportKind::Serial);
        let (mut uploader, _rx) = OtaUploader::new(retry.clone(), OtaConfig::default());
        uploader.upload(&image(10), "main.py").await.unwrap();
        assert_eq!(retry.payloads().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_image_rejected() {
        let sink = RecordingSink::new(TransportKind::Serial);
        let (mut uploader, _rx) = OtaUploader::new(sink.clone(), OtaConfig::default());

        let result = uploader.upload(&[], "empty.bin").await;
        assert!(matches!(result, Err(OtaError::EmptyImage)));
        assert!(sink.payloads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_twice_is_busy() {
        let sink = RecordingSink::new(TransportKind::Serial);
        let (mut uploader, _rx) = OtaUploader::new(sink.clone(), OtaConfig::default());

        let _session = uploader.begin(&image(10), "a.bin").await.unwrap();
        assert_eq!(uploader.phase(), OtaPhase::Starting);
        let again = uploader.begin(&image(10), "b.bin").await;
        assert!(matches!(again, Err(OtaError::Busy)));
        assert_eq!(uploader.phase(), OtaPhase::Starting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_after_dropped_session() {
        let sink = RecordingSink::new(TransportKind::Serial);
        let (mut uploader, mut rx) = OtaUploader::new(sink.clone(), OtaConfig::default());

        drop(uploader.begin(&image(10), "a.bin").await.unwrap());
        drain(&mut rx);
        uploader.reset();

        assert_eq!(uploader.phase(), OtaPhase::Idle);
        let events = drain(&mut rx);
        assert!(matches!(events[0], OtaEvent::Aborted { .. }));
        assert_eq!(events[1], OtaEvent::Ready);

        uploader.upload(&image(10), "b.bin").await.unwrap();
        assert_eq!(sink.payloads().len(), 4);

        // Idle uploader: nothing to report
        drain(&mut rx);
        uploader.reset();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_after_cancelled_upload() {
        let sink = RecordingSink::new(TransportKind::Serial);
        let (mut uploader, _rx) = OtaUploader::new(sink.clone(), OtaConfig::default());

        let image = image(2000);
        let cancelled = tokio::time::timeout(
            Duration::from_millis(600),
            uploader.upload(&image, "fw.bin"),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(uploader.phase(), OtaPhase::Transferring);

        uploader.reset();
        assert_eq!(uploader.phase(), OtaPhase::Idle);
        assert!(uploader.begin(&image, "fw.bin").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_requires_every_chunk() {
        let sink = RecordingSink::new(TransportKind::Serial);
        let (mut uploader, _rx) = OtaUploader::new(sink.clone(), OtaConfig::default());

        let session = uploader.begin(&image(1000), "fw.bin").await.unwrap();
        let result = uploader.end(&session).await;

        assert!(matches!(
            result,
            Err(OtaError::Incomplete { sent: 0, total: 4 })
        ));
        assert!(!sink.payloads().iter().any(|p| p.contains("ota_end")));
        assert_eq!(uploader.phase(), OtaPhase::Idle);
    }
}
