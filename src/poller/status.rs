//! Status Poller
//!
//! Periodically asks the keypad for its ambient light level. The request is
//! low priority: it is skipped whenever the link is busy with something the
//! user started (connect burst, settings, firmware upload).

use crate::config::PollConfig;
use crate::connection::WeakConnectionManager;
use keypad_link_shared::messages::LinkMessage;
use keypad_link_shared::{ConnectionState, TransportKind};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Shared "don't poll before" instant; only ever moves forward
#[derive(Debug, Clone, Default)]
pub struct StatusPollGate {
    paused_until: Arc<Mutex<Option<Instant>>>,
}

impl StatusPollGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress polling until `deadline`; an earlier deadline never shortens a pause
    pub fn pause_until(&self, deadline: Instant) {
        let mut paused = self.paused_until.lock().unwrap_or_else(|e| e.into_inner());
        if paused.map_or(true, |current| deadline > current) {
            *paused = Some(deadline);
        }
    }

    pub fn pause_for(&self, duration: Duration) {
        self.pause_until(Instant::now() + duration);
    }

    pub fn paused_until(&self) -> Option<Instant> {
        *self.paused_until.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_paused_at(&self, now: Instant) -> bool {
        self.paused_until().is_some_and(|until| now < until)
    }
}

/// What the poller needs to know about the link at tick time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSnapshot {
    pub state: ConnectionState,
    pub writable: bool,
}

/// Whether a tick at `now` should send `get_light`
pub fn should_poll(
    snapshot: &PollSnapshot,
    config: &PollConfig,
    gate: &StatusPollGate,
    now: Instant,
) -> bool {
    if !config.ambient_light {
        return false;
    }
    match snapshot.state {
        // BLE peripherals push light telemetry on their own
        ConnectionState::Connected(TransportKind::Ble) => false,
        ConnectionState::Connected(_) => snapshot.writable && !gate.is_paused_at(now),
        _ => false,
    }
}

pub struct StatusPoller;

impl StatusPoller {
    /// Start polling in the background; stops when the handle is dropped
    /// or the manager goes away
    pub fn start(
        manager: WeakConnectionManager,
        gate: StatusPollGate,
        config: PollConfig,
    ) -> StatusPollerHandle {
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let snapshot = manager.poll_snapshot().await;
                if !should_poll(&snapshot, &config, &gate, Instant::now()) {
                    continue;
                }

                if let Err(e) = manager.send_message(&LinkMessage::GetLight).await {
                    debug!("[POLL] get_light failed: {}", e);
                }
            }

            info!("[POLL] Status polling stopped");
        });

        StatusPollerHandle { task }
    }
}

/// Handle to the polling task; aborts it on drop
pub struct StatusPollerHandle {
    task: JoinHandle<()>,
}

impl Drop for StatusPollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
