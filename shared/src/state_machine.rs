//! Link State Machine
//!
//! Defines the valid connection lifecycle transitions of the device link.

use crate::TransportKind;
use std::fmt;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected(TransportKind),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    /// Transport in use, if connected
    pub fn transport(&self) -> Option<TransportKind> {
        match self {
            ConnectionState::Connected(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected(kind) => write!(f, "Connected ({})", kind),
        }
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTrigger {
    /// Caller asked to open a transport
    ConnectRequested,
    /// Transport opened successfully
    Opened(TransportKind),
    /// Transport could not be opened
    OpenFailed,
    /// Caller asked to close the link
    DisconnectRequested,
    /// Device or stack dropped the link on its own
    LinkDropped,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(ConnectionState),
    /// Transition was valid but the state is unchanged
    Unchanged(ConnectionState),
    /// Transition was invalid from current state
    Invalid {
        from: ConnectionState,
        trigger: LinkTrigger,
    },
}

/// The connection lifecycle state machine
#[derive(Debug, Default)]
pub struct LinkStateMachine {
    current_state: ConnectionState,
}

impl LinkStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Process a trigger and return the transition result
    pub fn process(&mut self, trigger: LinkTrigger) -> TransitionResult {
        let from = self.current_state;
        match self.next_state(&trigger) {
            Some(state) if state == from => TransitionResult::Unchanged(state),
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid { from, trigger },
        }
    }

    /// Get the next state for a given trigger, if the transition is valid
    fn next_state(&self, trigger: &LinkTrigger) -> Option<ConnectionState> {
        use ConnectionState::*;
        use LinkTrigger::*;

        match (self.current_state, trigger) {
            (Disconnected, ConnectRequested) => Some(Connecting),
            (Connecting, Opened(TransportKind::Wifi)) => None,
            (Connecting, Opened(kind)) => Some(Connected(*kind)),
            (Connecting, OpenFailed) => Some(Disconnected),

            // Closing is always allowed and always lands in Disconnected
            (_, DisconnectRequested) => Some(Disconnected),

            (Connected(_), LinkDropped) => Some(Disconnected),
            (Disconnected, LinkDropped) => Some(Disconnected),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let fsm = LinkStateMachine::new();
        assert_eq!(fsm.state(), ConnectionState::Disconnected);
        assert!(!fsm.state().is_connected());
    }

    #[test]
    fn test_connect_flow() {
        let mut fsm = LinkStateMachine::new();

        let result = fsm.process(LinkTrigger::ConnectRequested);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Connecting));

        let result = fsm.process(LinkTrigger::Opened(TransportKind::Ble));
        assert_eq!(
            result,
            TransitionResult::Success(ConnectionState::Connected(TransportKind::Ble))
        );
        assert_eq!(fsm.state().transport(), Some(TransportKind::Ble));

        let result = fsm.process(LinkTrigger::LinkDropped);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Disconnected));
    }

    #[test]
    fn test_open_failure_returns_to_disconnected() {
        let mut fsm = LinkStateMachine::new();
        fsm.process(LinkTrigger::ConnectRequested);

        let result = fsm.process(LinkTrigger::OpenFailed);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Disconnected));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut fsm = LinkStateMachine::new();
        let result = fsm.process(LinkTrigger::DisconnectRequested);
        assert_eq!(result, TransitionResult::Unchanged(ConnectionState::Disconnected));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut fsm = LinkStateMachine::new();

        // Can't be opened without a connect request
        let result = fsm.process(LinkTrigger::Opened(TransportKind::Serial));
        assert!(matches!(result, TransitionResult::Invalid { .. }));

        // Wifi never reaches Connected
        fsm.process(LinkTrigger::ConnectRequested);
        let result = fsm.process(LinkTrigger::Opened(TransportKind::Wifi));
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), ConnectionState::Connecting);

        // A second connect while connecting is refused
        let result = fsm.process(LinkTrigger::ConnectRequested);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
    }
}
