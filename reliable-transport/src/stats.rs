//! Per-session counters.
//!
//! Updated inline by [`crate::session::Session`] as events are processed.
//! Single-threaded like the session itself; no synchronisation.

use std::fmt;

/// Counts of everything a session has sent, received and decided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    // === Send direction ===
    /// Payloads accepted from the application
    pub app_sends: u64,

    /// First transmissions of DATA packets
    pub data_sent: u64,

    /// DATA packets sent again after a timeout or NACK
    pub retransmissions: u64,

    /// Timer fires that triggered a retransmission decision
    pub timeouts: u64,

    /// Timer fires that no longer matched the live timer
    pub stale_timeouts: u64,

    /// ACKs that released an outstanding packet
    pub acks_accepted: u64,

    /// ACKs ignored (duplicate, stale or premature)
    pub acks_ignored: u64,

    /// NACKs received
    pub nacks_received: u64,

    // === Receive direction ===
    /// Payloads handed to the application
    pub delivered: u64,

    /// Payloads dropped because the application had gone away
    pub discarded_after_teardown: u64,

    /// Duplicate DATA packets re-acknowledged
    pub duplicates: u64,

    /// DATA packets that failed the checksum
    pub corrupt: u64,

    /// Datagrams that could not be decoded, or fell outside the window
    pub violations: u64,

    /// ACKs sent
    pub acks_sent: u64,

    /// NACKs sent
    pub nacks_sent: u64,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  sent:      {} data, {} retransmitted, {} timeouts ({} stale)",
            self.data_sent, self.retransmissions, self.timeouts, self.stale_timeouts
        )?;
        writeln!(
            f,
            "  acks:      {} accepted, {} ignored, {} nacks received",
            self.acks_accepted, self.acks_ignored, self.nacks_received
        )?;
        writeln!(
            f,
            "  received:  {} delivered, {} duplicate, {} corrupt, {} violations",
            self.delivered, self.duplicates, self.corrupt, self.violations
        )?;
        write!(
            f,
            "  replied:   {} acks, {} nacks",
            self.acks_sent, self.nacks_sent
        )
    }
}
