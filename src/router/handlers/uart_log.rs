use super::{HandlerContext, HandlerResult};
use crate::router::{DeviceEvent, UartDirection};
use keypad_link_shared::messages::UartLogMessage;
use keypad_link_shared::poll::MAX_LIGHT_LEVEL;
use serde_json::Value;
use tracing::trace;

const LIGHT_TAG: &str = "[LIGHT]";
const LEVEL_KEY: &str = "Level:";

/// Handle a mirrored UART line; light readings embedded in it are surfaced too
pub fn handle_uart_log(ctx: &mut HandlerContext, body: Value) -> HandlerResult {
    let msg: UartLogMessage = serde_json::from_value(body)?;
    let direction = UartDirection::parse(msg.dir.as_deref());
    trace!("[UART] {} {}", direction, msg.msg);

    let light = parse_light_level(&msg.msg);
    let mut events = vec![DeviceEvent::UartLog {
        direction,
        message: msg.msg,
    }];
    // Mirrored sensor readings are always reported, repeats included
    if let Some(level) = light {
        ctx.last_light_level = Some(level);
        events.push(DeviceEvent::LightLevel(level));
    }
    Ok(events)
}

/// Extract `N` from `... [LIGHT] Level: N ...` when it is a valid sensor reading
pub fn parse_light_level(line: &str) -> Option<u32> {
    let after_tag = &line[line.find(LIGHT_TAG)? + LIGHT_TAG.len()..];
    let after_key = after_tag.trim_start().strip_prefix(LEVEL_KEY)?.trim_start();

    let digits_end = after_key
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(after_key.len());
    let level: u32 = after_key[..digits_end].parse().ok()?;
    (level <= MAX_LIGHT_LEVEL).then_some(level)
}
