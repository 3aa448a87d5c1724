//! Application messages carried by the link
//!
//! Only the messages the link itself produces or interprets are typed here.
//! Configuration payloads (`config`, `backlight`, `display`, ...) are built
//! by collaborators and travel as opaque JSON.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Discriminants sent from the host to the keypad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    Config,
    Backlight,
    Fingerprint,
    Display,
    DisplayImage,
    Settings,
    GetLight,
    OtaStart,
    OtaChunk,
    OtaEnd,
}

impl OutboundKind {
    pub const ALL: [OutboundKind; 10] = [
        OutboundKind::Config,
        OutboundKind::Backlight,
        OutboundKind::Fingerprint,
        OutboundKind::Display,
        OutboundKind::DisplayImage,
        OutboundKind::Settings,
        OutboundKind::GetLight,
        OutboundKind::OtaStart,
        OutboundKind::OtaChunk,
        OutboundKind::OtaEnd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundKind::Config => "config",
            OutboundKind::Backlight => "backlight",
            OutboundKind::Fingerprint => "fingerprint",
            OutboundKind::Display => "display",
            OutboundKind::DisplayImage => "display_image",
            OutboundKind::Settings => "settings",
            OutboundKind::GetLight => "get_light",
            OutboundKind::OtaStart => "ota_start",
            OutboundKind::OtaChunk => "ota_chunk",
            OutboundKind::OtaEnd => "ota_end",
        }
    }

    pub fn from_discriminant(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

/// Discriminants sent from the keypad to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    Keypress,
    Status,
    OtaStatus,
    Light,
    UartLog,
    Fingerprint,
    Settings,
    Unknown,
}

impl InboundKind {
    /// Classify a discriminant; anything unrecognised is `Unknown`
    pub fn from_discriminant(value: &str) -> Self {
        match value {
            "keypress" => InboundKind::Keypress,
            "status" => InboundKind::Status,
            "ota_status" => InboundKind::OtaStatus,
            "light" => InboundKind::Light,
            "uart_log" => InboundKind::UartLog,
            "fingerprint" => InboundKind::Fingerprint,
            "settings" => InboundKind::Settings,
            _ => InboundKind::Unknown,
        }
    }
}

impl fmt::Display for InboundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InboundKind::Keypress => "keypress",
            InboundKind::Status => "status",
            InboundKind::OtaStatus => "ota_status",
            InboundKind::Light => "light",
            InboundKind::UartLog => "uart_log",
            InboundKind::Fingerprint => "fingerprint",
            InboundKind::Settings => "settings",
            InboundKind::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Messages originated by the link itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkMessage {
    /// Ambient light telemetry request
    GetLight,
    /// Opens a firmware transfer
    OtaStart {
        filename: String,
        size: usize,
        chunks: usize,
    },
    /// One base64-encoded slice of the image
    OtaChunk {
        index: usize,
        data: String,
        encoded: bool,
    },
    /// Closes a firmware transfer
    OtaEnd,
}

impl LinkMessage {
    /// Build an `ota_chunk` message from a raw slice of the image
    pub fn ota_chunk(index: usize, raw: &[u8]) -> Self {
        LinkMessage::OtaChunk {
            index,
            data: BASE64.encode(raw),
            encoded: true,
        }
    }

    pub fn kind(&self) -> OutboundKind {
        match self {
            LinkMessage::GetLight => OutboundKind::GetLight,
            LinkMessage::OtaStart { .. } => OutboundKind::OtaStart,
            LinkMessage::OtaChunk { .. } => OutboundKind::OtaChunk,
            LinkMessage::OtaEnd => OutboundKind::OtaEnd,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// `{"type":"keypress","row":1,"col":2}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeypressMessage {
    pub row: u8,
    pub col: u8,
}

/// `{"type":"status","message":"Macropad ready"}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusMessage {
    #[serde(default)]
    pub message: Option<String>,
}

/// `{"type":"ota_status","status":"progress","progress":40,"chunk":2,"total":5}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OtaStatusMessage {
    pub status: String,
    #[serde(default)]
    pub progress: Option<u32>,
    #[serde(default)]
    pub chunk: Option<u32>,
    #[serde(default)]
    pub total: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `{"type":"light","level":300}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LightMessage {
    #[serde(default)]
    pub level: Option<u32>,
}

/// `{"type":"uart_log","dir":"tx","msg":"..."}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UartLogMessage {
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub dir: Option<String>,
}

/// `{"type":"fingerprint","action":"match",...}`; the rest of the body is opaque
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FingerprintMessage {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

/// `{"type":"settings","status":"success"}` acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SettingsAckMessage {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
