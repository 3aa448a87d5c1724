use super::HandlerResult;
use crate::router::{DeviceEvent, DeviceOtaStatus};
use keypad_link_shared::messages::OtaStatusMessage;
use serde_json::Value;
use tracing::info;

/// Handle the device's own view of a firmware transfer
pub fn handle_ota_status(body: Value) -> HandlerResult {
    let msg: OtaStatusMessage = serde_json::from_value(body)?;

    let status = match msg.status.as_str() {
        "started" => DeviceOtaStatus::Started {
            message: msg.message,
        },
        "progress" => DeviceOtaStatus::Progress {
            progress: msg.progress.unwrap_or(0),
            chunk: msg.chunk,
            total: msg.total,
        },
        "completed" => DeviceOtaStatus::Completed {
            message: msg.message,
        },
        _ => DeviceOtaStatus::Other {
            status: msg.status,
            message: msg.message,
        },
    };
    info!("[OTA] Device reports {:?}", status);

    Ok(vec![DeviceEvent::OtaStatus(status)])
}
