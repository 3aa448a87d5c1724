use super::HandlerResult;
use crate::router::DeviceEvent;
use keypad_link_shared::messages::StatusMessage;
use serde_json::Value;
use tracing::info;

/// Handle a free-form `status` line from the firmware
pub fn handle_status(body: Value) -> HandlerResult {
    let msg: StatusMessage = serde_json::from_value(body)?;
    if let Some(message) = &msg.message {
        info!("[DEVICE] {}", message);
    }
    Ok(vec![DeviceEvent::Status {
        message: msg.message,
    }])
}
