//! Keypad Link Shared Protocol Types
//!
//! This crate provides the wire protocol types, line codec and link state
//! machine shared by the host-side device link and its tooling.

pub mod codec;
pub mod messages;
pub mod state_machine;

use std::fmt;

pub use codec::{CodecError, Frame, LineDecoder};
pub use messages::{InboundKind, OutboundKind};
pub use state_machine::{ConnectionState, LinkStateMachine, LinkTrigger, TransitionResult};

/// Physical channel used to reach the keypad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// USB CDC / UART byte stream
    Serial,
    /// Bluetooth Low-Energy GATT serial characteristic
    Ble,
    /// Reserved for the 2.4 GHz dongle; always rejected
    Wifi,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Serial => write!(f, "USB"),
            TransportKind::Ble => write!(f, "BLE"),
            TransportKind::Wifi => write!(f, "WiFi"),
        }
    }
}

/// Serial line parameters
pub mod serial {
    /// Fixed baud rate of the ESP32-S3 console/CDC port
    pub const BAUD_RATE: u32 = 115_200;

    /// Size of a single read from the port
    pub const READ_BUFFER_SIZE: usize = 1024;
}

/// BLE link parameters
pub mod ble {
    /// Serial-over-GATT service (0xFFE0)
    pub const SERVICE_UUID: u128 = 0x0000ffe0_0000_1000_8000_00805f9b34fb;

    /// Write/notify characteristic (0xFFE1)
    pub const CHARACTERISTIC_UUID: u128 = 0x0000ffe1_0000_1000_8000_00805f9b34fb;

    /// Largest payload written in a single characteristic write
    pub const CHUNK_SIZE: usize = 20;

    /// Minimum spacing between the end of one frame and the start of the next
    pub const MIN_WRITE_INTERVAL_MS: u64 = 800;

    /// Pause between the chunks of one frame
    pub const INTER_CHUNK_DELAY_MS: u64 = 30;

    /// Advertised name prefix of the keypad firmware
    pub const DEFAULT_NAME_PREFIX: &str = "Macropad";
}

/// Firmware transfer parameters
pub mod ota {
    /// Raw bytes carried per chunk before base64
    pub const RAW_CHUNK_SIZE: usize = 256;

    /// Hard ceiling on one serialized chunk message
    pub const MAX_MESSAGE_SIZE: usize = 512;

    /// base64 inflation
    pub const ENCODING_OVERHEAD: f64 = 4.0 / 3.0;

    /// Delay after `ota_start` so the receiver can open its temp file
    pub const SETTLE_DELAY_MS: u64 = 500;

    /// Inter-chunk delay on serial links
    pub const INTER_CHUNK_DELAY_SERIAL_MS: u64 = 80;

    /// Inter-chunk delay on BLE links
    pub const INTER_CHUNK_DELAY_BLE_MS: u64 = 100;

    /// Time left for the device to reboot before the uploader is re-armed
    pub const COMPLETION_GRACE_MS: u64 = 3000;
}

/// Telemetry polling parameters
pub mod poll {
    /// Period of the `get_light` request
    pub const INTERVAL_MS: u64 = 10_000;

    /// Quiet window after a connection while the initial configuration is pushed
    pub const CONNECT_QUIET_MS: u64 = 10_000;

    /// Highest raw ADC value reported by the light sensor
    pub const MAX_LIGHT_LEVEL: u32 = 1023;
}
