use super::HandlerResult;
use crate::router::{DeviceEvent, FingerprintAction};
use keypad_link_shared::messages::FingerprintMessage;
use serde_json::Value;
use tracing::{debug, warn};

/// Handle a fingerprint sensor report; the body beyond `action` is passed through
pub fn handle_fingerprint(body: Value) -> HandlerResult {
    let msg: FingerprintMessage = serde_json::from_value(body)?;
    let action = FingerprintAction::parse(msg.action.as_deref().unwrap_or(""));

    let mut body = msg.body;
    body.remove("type");

    match &action {
        FingerprintAction::EnrollError => warn!("[FP] Enrollment failed: {:?}", body.get("message")),
        FingerprintAction::Other(name) => debug!("[FP] Unhandled action {:?}", name),
        _ => debug!("[FP] {:?}", action),
    }

    Ok(vec![DeviceEvent::Fingerprint { action, body }])
}
