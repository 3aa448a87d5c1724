//! Serialized write queue for the BLE characteristic
//!
//! The keypad's GATT stack rejects overlapping writes, so every outbound
//! frame goes through a single consumer task. The consumer enforces a
//! minimum interval between the end of one successful write and the start
//! of the next, and splits frames longer than one chunk into paced writes.

use crate::config::BleTiming;
use crate::error::SendError;
use crate::transport::traits::{GattLink, GattWriteError, LinkSignal, SignalSender};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

struct WriteJob {
    frame: Bytes,
    done: oneshot::Sender<Result<(), SendError>>,
}

/// Cloneable producer side of the queue
#[derive(Clone)]
pub struct BleWriter {
    jobs: mpsc::UnboundedSender<WriteJob>,
}

impl BleWriter {
    /// Queue a frame and wait until it has been written (or failed)
    pub async fn write_frame(&self, frame: Bytes) -> Result<(), SendError> {
        let (done, result) = oneshot::channel();
        self.jobs
            .send(WriteJob { frame, done })
            .map_err(|_| SendError::NotConnected)?;
        // A dropped job means the queue was abandoned
        result.await.unwrap_or(Err(SendError::NotConnected))
    }
}

/// Single-consumer write queue bound to one GATT link
pub struct BleWriteQueue {
    writer: BleWriter,
    task: JoinHandle<()>,
}

impl BleWriteQueue {
    /// Start the consumer; the first write waits a full interval from now
    pub fn spawn(link: Arc<dyn GattLink>, timing: BleTiming, signals: SignalSender) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_queue(link, rx, timing, signals));
        Self {
            writer: BleWriter { jobs: tx },
            task,
        }
    }

    pub fn writer(&self) -> BleWriter {
        self.writer.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the consumer; pending writes resolve with `NotConnected`
    pub fn abandon(self) {
        self.task.abort();
    }
}

async fn run_queue(
    link: Arc<dyn GattLink>,
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
    timing: BleTiming,
    signals: SignalSender,
) {
    let mut last_write_finished = Instant::now();

    while let Some(job) = jobs.recv().await {
        sleep_until(last_write_finished + timing.min_write_interval).await;

        match write_chunked(link.as_ref(), &job.frame, &timing).await {
            Ok(()) => {
                last_write_finished = Instant::now();
                let _ = job.done.send(Ok(()));
            }
            Err(e) => {
                let lost = e.mentions_disconnect() || !link.is_connected().await;
                if !lost {
                    debug!("[BLE] Write rejected: {}", e);
                    let _ = job.done.send(Err(SendError::WriteRejected(e.message)));
                    continue;
                }

                warn!("[BLE] Write failed, link lost: {}", e);
                let _ = job.done.send(Err(SendError::LinkLost));

                jobs.close();
                while let Ok(pending) = jobs.try_recv() {
                    let _ = pending.done.send(Err(SendError::LinkLost));
                }
                let _ = signals
                    .send(LinkSignal::Dropped {
                        reason: format!("write failed: {}", e),
                    })
                    .await;
                return;
            }
        }
    }
}

/// Write one frame, splitting it into paced chunks when needed
pub(crate) async fn write_chunked(
    link: &dyn GattLink,
    frame: &[u8],
    timing: &BleTiming,
) -> Result<(), GattWriteError> {
    let chunk_size = timing.chunk_size.max(1);
    if frame.len() <= chunk_size {
        return link.write(frame).await;
    }

    let mut chunks = frame.chunks(chunk_size).peekable();
    while let Some(chunk) = chunks.next() {
        link.write(chunk).await?;
        if chunks.peek().is_some() {
            sleep(timing.inter_chunk_delay).await;
        }
    }
    Ok(())
}
