//! Error types for the device link

use keypad_link_shared::{CodecError, InboundKind, TransportKind};
use thiserror::Error;

/// Failure to open a link
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Nothing selected or nothing in range; often a user cancellation
    #[error("No device found: {0}")]
    DeviceNotFound(String),

    /// The device only talks over a trusted (paired) link
    #[error("Insecure context: {0}")]
    InsecureContext(String),

    /// The platform refused access to the capability
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The port or device is held by another process
    #[error("Device already open: {0}")]
    AlreadyOpen(String),

    /// A link is already established or being established
    #[error("A connection is already active")]
    AlreadyConnected,

    #[error("{0} transport is not supported")]
    Unsupported(TransportKind),

    #[error("Connection failed: {0}")]
    Other(String),
}

impl ConnectError {
    /// Explanation suitable for showing to the person at the keyboard
    pub fn user_message(&self) -> String {
        match self {
            ConnectError::DeviceNotFound(_) => {
                "No device found. Check that the macropad is powered on, in the right mode, \
                 and that the correct port or Bluetooth adapter is selected."
                    .into()
            }
            ConnectError::InsecureContext(_) | ConnectError::PermissionDenied(_) => {
                "Access to the device was refused. Pair the keypad first, or grant the required \
                 permission (e.g. the dialout or bluetooth group)."
                    .into()
            }
            ConnectError::AlreadyOpen(_) => {
                "The port is already in use. Close other applications using it \
                 (serial monitor, Arduino IDE, ...)."
                    .into()
            }
            ConnectError::AlreadyConnected => "Already connected.".into(),
            ConnectError::Unsupported(kind) => {
                format!("{} is disabled for now. Use USB or Bluetooth.", kind)
            }
            ConnectError::Other(msg) => format!("Connection error: {}", msg),
        }
    }
}

/// Failure to deliver an outbound frame
#[derive(Error, Debug)]
pub enum SendError {
    #[error("Not connected")]
    NotConnected,

    #[error("Link lost")]
    LinkLost,

    #[error("Write rejected: {0}")]
    WriteRejected(String),

    #[error("Payload contains a raw line delimiter")]
    EmbeddedDelimiter,

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CodecError> for SendError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::EmbeddedDelimiter => SendError::EmbeddedDelimiter,
            other => SendError::Encode(other.to_string()),
        }
    }
}

/// A frame the router could not turn into an event
#[derive(Error, Debug)]
pub enum RouteError {
    /// Known discriminant, but the body does not match its shape
    #[error("Malformed {kind} frame: {source}")]
    MalformedFrame {
        kind: InboundKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of a firmware transfer; always fatal to the session
#[derive(Error, Debug)]
pub enum OtaError {
    #[error("Firmware image is empty")]
    EmptyImage,

    #[error("An update is already in progress")]
    Busy,

    #[error("Chunk {index} too large ({size} bytes, limit {limit})")]
    ChunkTooLarge {
        index: usize,
        size: usize,
        limit: usize,
    },

    #[error("Only {sent} of {total} chunks were sent")]
    Incomplete { sent: usize, total: usize },

    #[error("Transfer abandoned before it finished")]
    Cancelled,

    #[error("Send failed: {0}")]
    Send(#[from] SendError),

    #[error("Encode error: {0}")]
    Encode(#[from] CodecError),
}
