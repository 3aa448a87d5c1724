//! Inbound message routing
//!
//! Classifies frames from the keypad by their `type` discriminant and turns
//! them into typed [`DeviceEvent`]s.

mod dispatcher;
pub mod handlers;

pub use dispatcher::MessageRouter;

use serde_json::{Map, Value};
use std::fmt;

/// Something the keypad told us
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A line that was not JSON (firmware prints, boot banners)
    Log(String),
    KeyPressed { row: u8, col: u8 },
    Status { message: Option<String> },
    OtaStatus(DeviceOtaStatus),
    /// Ambient light level changed
    LightLevel(u32),
    UartLog {
        direction: UartDirection,
        message: String,
    },
    Fingerprint {
        action: FingerprintAction,
        body: Map<String, Value>,
    },
    SettingsAck {
        ok: bool,
        message: Option<String>,
    },
}

/// Firmware update progress as reported by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOtaStatus {
    Started { message: Option<String> },
    Progress {
        progress: u32,
        chunk: Option<u32>,
        total: Option<u32>,
    },
    Completed { message: Option<String> },
    Other {
        status: String,
        message: Option<String>,
    },
}

/// Direction of a mirrored UART line between the radio and the key matrix MCU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartDirection {
    /// Radio to matrix controller
    Tx,
    /// Matrix controller to radio
    Rx,
    Unknown,
}

impl UartDirection {
    pub fn parse(dir: Option<&str>) -> Self {
        match dir {
            Some("tx") => UartDirection::Tx,
            Some("rx") => UartDirection::Rx,
            _ => UartDirection::Unknown,
        }
    }
}

impl fmt::Display for UartDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UartDirection::Tx => write!(f, "ESP32→ATmega"),
            UartDirection::Rx => write!(f, "ATmega→ESP32"),
            UartDirection::Unknown => write!(f, "?"),
        }
    }
}

/// What a fingerprint message reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintAction {
    EnrollSuccess,
    EnrollError,
    DeleteSuccess,
    List,
    Match,
    Status,
    Other(String),
}

impl FingerprintAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "enroll_success" => FingerprintAction::EnrollSuccess,
            "enroll_error" => FingerprintAction::EnrollError,
            "delete_success" => FingerprintAction::DeleteSuccess,
            "list" => FingerprintAction::List,
            "match" => FingerprintAction::Match,
            "status" => FingerprintAction::Status,
            other => FingerprintAction::Other(other.to_string()),
        }
    }
}
