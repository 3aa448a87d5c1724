//! Link configuration
//!
//! Defaults carry the keypad's fixed protocol parameters; the CLI overrides
//! the device selection fields.

use keypad_link_shared::{ble, ota, poll};
use std::time::Duration;

/// Serial transport configuration
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port path (e.g. "/dev/ttyACM0"); `None` picks the first USB port found
    pub port: Option<String>,
    /// Baud rate; the keypad only speaks 115200
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: keypad_link_shared::serial::BAUD_RATE,
        }
    }
}

/// Write pacing of the BLE characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BleTiming {
    pub chunk_size: usize,
    pub min_write_interval: Duration,
    pub inter_chunk_delay: Duration,
}

impl Default for BleTiming {
    fn default() -> Self {
        Self {
            chunk_size: ble::CHUNK_SIZE,
            min_write_interval: Duration::from_millis(ble::MIN_WRITE_INTERVAL_MS),
            inter_chunk_delay: Duration::from_millis(ble::INTER_CHUNK_DELAY_MS),
        }
    }
}

/// BLE transport configuration
#[derive(Debug, Clone)]
pub struct BleConfig {
    /// Advertised name prefix to look for
    pub name_prefix: String,
    /// Known device addresses (tried before scanning)
    pub known_addresses: Vec<String>,
    /// How long to scan for devices
    pub scan_duration: Duration,
    /// How long to wait for GATT services after connecting
    pub services_timeout: Duration,
    pub timing: BleTiming,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            name_prefix: ble::DEFAULT_NAME_PREFIX.into(),
            known_addresses: Vec::new(),
            scan_duration: Duration::from_secs(10),
            services_timeout: Duration::from_secs(5),
            timing: BleTiming::default(),
        }
    }
}

/// Telemetry polling configuration
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Whether ambient light follows the sensor (only then is it polled)
    pub ambient_light: bool,
    pub interval: Duration,
    /// Quiet window after connecting
    pub connect_quiet: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            ambient_light: false,
            interval: Duration::from_millis(poll::INTERVAL_MS),
            connect_quiet: Duration::from_millis(poll::CONNECT_QUIET_MS),
        }
    }
}

/// Firmware transfer configuration
#[derive(Debug, Clone)]
pub struct OtaConfig {
    pub chunk_size: usize,
    pub max_message_size: usize,
    pub settle_delay: Duration,
    pub inter_chunk_delay_serial: Duration,
    pub inter_chunk_delay_ble: Duration,
    pub completion_grace: Duration,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            chunk_size: ota::RAW_CHUNK_SIZE,
            max_message_size: ota::MAX_MESSAGE_SIZE,
            settle_delay: Duration::from_millis(ota::SETTLE_DELAY_MS),
            inter_chunk_delay_serial: Duration::from_millis(ota::INTER_CHUNK_DELAY_SERIAL_MS),
            inter_chunk_delay_ble: Duration::from_millis(ota::INTER_CHUNK_DELAY_BLE_MS),
            completion_grace: Duration::from_millis(ota::COMPLETION_GRACE_MS),
        }
    }
}

/// Configuration for the connection manager
#[derive(Debug, Clone, Default)]
pub struct LinkConfig {
    pub serial: SerialConfig,
    pub ble: BleConfig,
    pub poll: PollConfig,
    pub ota: OtaConfig,
}
