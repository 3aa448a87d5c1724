//! Connection management for the keypad link
//!
//! This module handles:
//! - Opening exactly one transport (USB serial or BLE) at a time
//! - Publishing lifecycle changes and device events
//! - Tearing the link down on request or when the device goes away

mod manager;

pub use manager::{ConnectionManager, EventReceiver, LinkEvent, WeakConnectionManager};
