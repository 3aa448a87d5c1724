use super::HandlerResult;
use crate::router::DeviceEvent;
use keypad_link_shared::messages::KeypressMessage;
use serde_json::Value;
use tracing::debug;

/// Handle a `keypress` report from the matrix
pub fn handle_keypress(body: Value) -> HandlerResult {
    let msg: KeypressMessage = serde_json::from_value(body)?;
    debug!("[KEY] Row {} Col {}", msg.row, msg.col);
    Ok(vec![DeviceEvent::KeyPressed {
        row: msg.row,
        col: msg.col,
    }])
}
