use super::{HandlerContext, HandlerResult};
use keypad_link_shared::messages::LightMessage;
use serde_json::Value;

/// Handle an ambient light reading; repeats of the last level are dropped
pub fn handle_light(ctx: &mut HandlerContext, body: Value) -> HandlerResult {
    let msg: LightMessage = serde_json::from_value(body)?;
    Ok(msg
        .level
        .and_then(|level| ctx.observe_light(level))
        .into_iter()
        .collect())
}
