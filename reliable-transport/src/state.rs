//! Session finite-state machine (FSM) types.
//!
//! This module defines every state a [`crate::session::Session`] can occupy.
//! Transitions are driven by [`crate::session`]; the legal ones are:
//!
//! ```text
//!  UNINITIALIZED ──init──▶ IDLE ──submit──▶ AWAITING_ACK
//!                           ▲                 │   ▲  │
//!                           └──ack, drained───┘   └──┘ timeout / nack (resend)
//!                                             │      ack, queued payload (send next)
//!                                             │
//!                              retry limit hit▼
//!                                          FAILED
//!
//!  any initialised state ──teardown──▶ CLOSING
//! ```
//!
//! `FAILED` and `CLOSING` are terminal for the send direction.  Inbound
//! traffic is still answered in both.

/// All possible states of the session FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Created, but the surrounding stack is not wired yet.
    #[default]
    Uninitialized,
    /// Nothing outstanding, no timer armed.
    Idle,
    /// At least one packet is unacknowledged and its timer is armed.
    AwaitingAck,
    /// The application has gone away; no new sends are accepted.
    Closing,
    /// The retry limit was exceeded; the channel is unusable.
    Failed,
}

impl SessionState {
    /// `true` if the application may still submit payloads.
    pub fn accepts_sends(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::AwaitingAck)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "UNINITIALIZED",
            SessionState::Idle => "IDLE",
            SessionState::AwaitingAck => "AWAITING_ACK",
            SessionState::Closing => "CLOSING",
            SessionState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_uninitialized() {
        assert_eq!(SessionState::default(), SessionState::Uninitialized);
    }

    #[test]
    fn only_live_states_accept_sends() {
        assert!(SessionState::Idle.accepts_sends());
        assert!(SessionState::AwaitingAck.accepts_sends());
        assert!(!SessionState::Uninitialized.accepts_sends());
        assert!(!SessionState::Closing.accepts_sends());
        assert!(!SessionState::Failed.accepts_sends());
    }

    #[test]
    fn display_uses_protocol_names() {
        assert_eq!(SessionState::AwaitingAck.to_string(), "AWAITING_ACK");
    }
}
