//! Handlers for each inbound message type

mod fingerprint;
mod keypress;
mod light;
mod ota_status;
mod settings;
mod status;
mod uart_log;

pub use fingerprint::handle_fingerprint;
pub use keypress::handle_keypress;
pub use light::handle_light;
pub use ota_status::handle_ota_status;
pub use settings::handle_settings;
pub use status::handle_status;
pub use uart_log::handle_uart_log;

use super::DeviceEvent;

/// Per-connection state shared by the handlers
#[derive(Debug, Clone, Default)]
pub struct HandlerContext {
    /// Last ambient light level reported, for de-duplication
    pub last_light_level: Option<u32>,
}

impl HandlerContext {
    /// Record a light level, returning an event only if it changed
    pub fn observe_light(&mut self, level: u32) -> Option<DeviceEvent> {
        if self.last_light_level == Some(level) {
            return None;
        }
        self.last_light_level = Some(level);
        Some(DeviceEvent::LightLevel(level))
    }
}

/// Outcome of a handler: events to publish, or a body that did not parse
pub type HandlerResult = Result<Vec<DeviceEvent>, serde_json::Error>;
