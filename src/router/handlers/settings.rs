use super::HandlerResult;
use crate::router::DeviceEvent;
use keypad_link_shared::messages::SettingsAckMessage;
use serde_json::Value;
use tracing::{debug, warn};

/// Handle the acknowledgement of a `settings` write
pub fn handle_settings(body: Value) -> HandlerResult {
    let msg: SettingsAckMessage = serde_json::from_value(body)?;

    let ok = match msg.status.as_deref() {
        Some("success") => true,
        Some("error") => {
            warn!("[SETTINGS] Device rejected settings: {:?}", msg.message);
            false
        }
        other => {
            debug!("[SETTINGS] Ignoring status {:?}", other);
            return Ok(Vec::new());
        }
    };

    Ok(vec![DeviceEvent::SettingsAck {
        ok,
        message: msg.message,
    }])
}
