//! Frame dispatcher - classifies inbound frames and routes them to handlers

use super::handlers::{self, HandlerContext, HandlerResult};
use super::DeviceEvent;
use crate::error::RouteError;
use keypad_link_shared::{codec, Frame, InboundKind};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Routes frames of one connection; create a fresh router per connection
#[derive(Debug, Default)]
pub struct MessageRouter {
    ctx: HandlerContext,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn one frame into zero or more events
    ///
    /// Never fails: non-JSON lines become [`DeviceEvent::Log`], malformed
    /// and unknown frames are logged and dropped.
    pub fn dispatch(&mut self, frame: &Frame) -> Vec<DeviceEvent> {
        let value = match frame.parse() {
            Ok(value) => value,
            Err(_) => {
                debug!("[ROUTER] Non-JSON line: {}", frame.text());
                return vec![DeviceEvent::Log(frame.text().to_string())];
            }
        };

        let kind = codec::discriminant(&value)
            .map(InboundKind::from_discriminant)
            .unwrap_or(InboundKind::Unknown);

        match self.route(kind, value) {
            Ok(events) => events,
            Err(e) => {
                warn!("[ROUTER] {}", e);
                Vec::new()
            }
        }
    }

    fn route(&mut self, kind: InboundKind, value: Value) -> Result<Vec<DeviceEvent>, RouteError> {
        // Light and UART traffic is too chatty for the normal log level
        if !matches!(kind, InboundKind::Light | InboundKind::UartLog) {
            debug!("[ROUTER] Received {}", kind);
        }

        let result: HandlerResult = match kind {
            InboundKind::Keypress => handlers::handle_keypress(value),
            InboundKind::Status => handlers::handle_status(value),
            InboundKind::OtaStatus => handlers::handle_ota_status(value),
            InboundKind::Light => handlers::handle_light(&mut self.ctx, value),
            InboundKind::UartLog => handlers::handle_uart_log(&mut self.ctx, value),
            InboundKind::Fingerprint => handlers::handle_fingerprint(value),
            InboundKind::Settings => handlers::handle_settings(value),
            InboundKind::Unknown => {
                info!(
                    "[ROUTER] Unknown message type {:?}",
                    codec::discriminant(&value).unwrap_or("<none>")
                );
                Ok(Vec::new())
            }
        };

        result.map_err(|source| RouteError::MalformedFrame { kind, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{DeviceOtaStatus, FingerprintAction, UartDirection};

    fn dispatch(router: &mut MessageRouter, line: &str) -> Vec<DeviceEvent> {
        router.dispatch(&Frame::new(line))
    }

    #[test]
    fn test_keypress() {
        let mut router = MessageRouter::new();
        assert_eq!(
            dispatch(&mut router, r#"{"type":"keypress","row":2,"col":1}"#),
            vec![DeviceEvent::KeyPressed { row: 2, col: 1 }]
        );
    }

    #[test]
    fn test_non_json_becomes_log() {
        let mut router = MessageRouter::new();
        assert_eq!(
            dispatch(&mut router, "MicroPython v1.22 booting"),
            vec![DeviceEvent::Log("MicroPython v1.22 booting".into())]
        );
    }

    #[test]
    fn test_unknown_and_untyped_are_dropped() {
        let mut router = MessageRouter::new();
        assert!(dispatch(&mut router, r#"{"type":"reboot"}"#).is_empty());
        assert!(dispatch(&mut router, r#"{"level":3}"#).is_empty());
        assert!(dispatch(&mut router, "42").is_empty());
    }

    #[test]
    fn test_malformed_known_type_is_dropped() {
        let mut router = MessageRouter::new();
        assert!(dispatch(&mut router, r#"{"type":"keypress","row":"two"}"#).is_empty());
    }

    #[test]
    fn test_light_deduplicates() {
        let mut router = MessageRouter::new();
        assert_eq!(
            dispatch(&mut router, r#"{"type":"light","level":300}"#),
            vec![DeviceEvent::LightLevel(300)]
        );
        assert!(dispatch(&mut router, r#"{"type":"light","level":300}"#).is_empty());
        assert_eq!(
            dispatch(&mut router, r#"{"type":"light","level":301}"#),
            vec![DeviceEvent::LightLevel(301)]
        );

        // A new connection starts from scratch
        let mut fresh = MessageRouter::new();
        assert_eq!(
            dispatch(&mut fresh, r#"{"type":"light","level":300}"#),
            vec![DeviceEvent::LightLevel(300)]
        );
    }

    #[test]
    fn test_uart_log_carries_light() {
        let mut router = MessageRouter::new();
        let events = dispatch(
            &mut router,
            r#"{"type":"uart_log","dir":"rx","msg":"[LIGHT] Level: 42"}"#,
        );
        assert_eq!(
            events,
            vec![
                DeviceEvent::UartLog {
                    direction: UartDirection::Rx,
                    message: "[LIGHT] Level: 42".into(),
                },
                DeviceEvent::LightLevel(42),
            ]
        );

        // Same level via the light message is a repeat
        assert!(dispatch(&mut router, r#"{"type":"light","level":42}"#).is_empty());

        // The UART mirror reports it again regardless
        let again = dispatch(
            &mut router,
            r#"{"type":"uart_log","dir":"rx","msg":"[LIGHT] Level: 42"}"#,
        );
        assert_eq!(again.last(), Some(&DeviceEvent::LightLevel(42)));
    }

    #[test]
    fn test_ota_status_variants() {
        let mut router = MessageRouter::new();
        assert_eq!(
            dispatch(
                &mut router,
                r#"{"type":"ota_status","status":"progress","progress":40,"chunk":2,"total":5}"#
            ),
            vec![DeviceEvent::OtaStatus(DeviceOtaStatus::Progress {
                progress: 40,
                chunk: Some(2),
                total: Some(5),
            })]
        );
        assert_eq!(
            dispatch(&mut router, r#"{"type":"ota_status","status":"completed"}"#),
            vec![DeviceEvent::OtaStatus(DeviceOtaStatus::Completed { message: None })]
        );
        assert!(matches!(
            dispatch(&mut router, r#"{"type":"ota_status","status":"error","message":"crc"}"#)[0],
            DeviceEvent::OtaStatus(DeviceOtaStatus::Other { .. })
        ));
    }

    #[test]
    fn test_fingerprint_body_is_opaque() {
        let mut router = MessageRouter::new();
        let events = dispatch(
            &mut router,
            r#"{"type":"fingerprint","action":"match","id":3,"confidence":88}"#,
        );
        let DeviceEvent::Fingerprint { action, body } = &events[0] else {
            panic!("expected fingerprint event, got {:?}", events);
        };
        assert_eq!(*action, FingerprintAction::Match);
        assert_eq!(body.get("id"), Some(&Value::from(3)));
        assert!(!body.contains_key("type"));
    }

    #[test]
    fn test_settings_ack() {
        let mut router = MessageRouter::new();
        assert_eq!(
            dispatch(&mut router, r#"{"type":"settings","status":"success"}"#),
            vec![DeviceEvent::SettingsAck {
                ok: true,
                message: None
            }]
        );
        assert_eq!(
            dispatch(&mut router, r#"{"type":"settings","status":"error","message":"bad"}"#),
            vec![DeviceEvent::SettingsAck {
                ok: false,
                message: Some("bad".into())
            }]
        );
        assert!(dispatch(&mut router, r#"{"type":"settings","status":"pending"}"#).is_empty());
    }
}
