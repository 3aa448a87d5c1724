//! Background telemetry polling

mod status;

pub use status::{PollSnapshot, StatusPollGate, StatusPoller, StatusPollerHandle};
