//! Retransmission timers, measured in simulated ticks.
//!
//! Reliable delivery requires that an unacknowledged packet is re-sent if no
//! ACK arrives within a bounded number of ticks.  This module provides:
//! - [`TimerConfig`] — the retransmission deadline and back-off policy.
//! - [`RetransmitTimer`] — the session-side bookkeeping for the single timer
//!   guarding the oldest unacknowledged packet.  It arms and cancels through
//!   the [`Stack`] and recognises stale fires.
//! - [`TickTimers`] — a concrete tick-driven timer facility that a driver can
//!   hand to sessions through its [`Stack`] implementation.
//!
//! # Stale fires
//!
//! A fire event and an ACK can be queued back to back.  If the ACK is
//! processed first the timer is cancelled, but the fire may still be
//! delivered.  Every arming therefore gets a fresh [`TimerToken::generation`];
//! a fire whose token does not match the live arming is ignored, and
//! cancelling a timer that already fired is a no-op.

use std::collections::{BTreeMap, HashMap};

use crate::session::Stack;

/// Opaque id issued by the timer facility for one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// Identifies which outstanding packet a timer guards.
///
/// The facility hands the token back unchanged when the deadline elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    /// Sequence number of the packet at the head of the send window.
    pub seq: u32,
    /// Distinguishes successive armings for the same sequence number.
    pub generation: u64,
}

/// Adjustable timeout parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// Ticks to wait for an ACK before retransmitting.
    pub rto_ticks: u64,
    /// Upper bound for the deadline after repeated back-off.
    pub max_rto_ticks: u64,
    /// Double the deadline on each consecutive timeout.
    pub backoff: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            rto_ticks: 1000,
            max_rto_ticks: 8000,
            backoff: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveTimer {
    handle: TimerHandle,
    token: TimerToken,
}

/// The retransmission timer of one session.
///
/// At most one timer is live at a time; it always guards the packet at the
/// head of the send window.
#[derive(Debug)]
pub struct RetransmitTimer {
    config: TimerConfig,
    /// Deadline used for the next arming.
    current_rto: u64,
    next_generation: u64,
    live: Option<LiveTimer>,
}

impl RetransmitTimer {
    pub fn new(config: TimerConfig) -> Self {
        let rto = config.rto_ticks;
        Self {
            config,
            current_rto: rto,
            next_generation: 0,
            live: None,
        }
    }

    /// Deadline in ticks that the next [`arm`](Self::arm) will use.
    pub fn current_rto(&self) -> u64 {
        self.current_rto
    }

    pub fn is_armed(&self) -> bool {
        self.live.is_some()
    }

    /// Sequence number guarded by the live timer, if any.
    pub fn armed_seq(&self) -> Option<u32> {
        self.live.map(|t| t.token.seq)
    }

    /// Arm the timer for `seq`, replacing any live arming.
    pub fn arm<S: Stack + ?Sized>(&mut self, stack: &mut S, seq: u32) -> TimerToken {
        self.cancel(stack);

        let token = TimerToken {
            seq,
            generation: self.next_generation,
        };
        self.next_generation = self.next_generation.wrapping_add(1);

        let handle = stack.arm_timer(self.current_rto, token);
        self.live = Some(LiveTimer { handle, token });
        token
    }

    /// Cancel the live timer.  Returns `false` (and does nothing) when no
    /// timer is live, including when it has already fired.
    pub fn cancel<S: Stack + ?Sized>(&mut self, stack: &mut S) -> bool {
        match self.live.take() {
            Some(live) => {
                stack.cancel_timer(live.handle);
                true
            }
            None => false,
        }
    }

    /// Accept a fire event.
    ///
    /// Returns the guarded sequence number when `token` belongs to the live
    /// arming, which is then consumed.  Returns `None` for a stale token.
    pub fn on_fire(&mut self, token: TimerToken) -> Option<u32> {
        match self.live {
            Some(live) if live.token == token => {
                self.live = None;
                Some(token.seq)
            }
            _ => None,
        }
    }

    /// Double the deadline (if back-off is enabled), capped at
    /// `config.max_rto_ticks`.
    pub fn back_off(&mut self) {
        if self.config.backoff {
            self.current_rto = self
                .current_rto
                .saturating_mul(2)
                .min(self.config.max_rto_ticks);
        }
    }

    /// Restore the configured base deadline.
    pub fn reset(&mut self) {
        self.current_rto = self.config.rto_ticks;
    }
}

/// A tick-driven timer facility.
///
/// Deadlines are absolute ticks; [`TickTimers::advance`] moves the clock and
/// returns every timer that expired, earliest first.
#[derive(Debug, Default)]
pub struct TickTimers {
    now: u64,
    next_id: u64,
    /// Keyed by `(deadline, id)` so iteration is deadline order, ties broken
    /// by arming order.
    queue: BTreeMap<(u64, u64), TimerToken>,
    deadlines: HashMap<u64, u64>,
}

impl TickTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Number of timers armed and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Arm a timer that expires `ticks` after the current tick.
    pub fn arm(&mut self, ticks: u64, token: TimerToken) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;

        let deadline = self.now.saturating_add(ticks);
        self.queue.insert((deadline, id), token);
        self.deadlines.insert(id, deadline);
        TimerHandle(id)
    }

    /// Cancel a timer.  Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.deadlines.remove(&handle.0) {
            Some(deadline) => self.queue.remove(&(deadline, handle.0)).is_some(),
            None => false,
        }
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.queue.keys().next().map(|&(deadline, _)| deadline)
    }

    /// Move the clock to `now` and collect every timer whose deadline is at
    /// or before it.
    pub fn advance(&mut self, now: u64) -> Vec<(TimerHandle, TimerToken)> {
        self.now = self.now.max(now);

        let mut fired = Vec::new();
        loop {
            let Some(&(deadline, id)) = self.queue.keys().next() else {
                break;
            };
            if deadline > self.now {
                break;
            }
            if let Some(token) = self.queue.remove(&(deadline, id)) {
                self.deadlines.remove(&id);
                fired.push((TimerHandle(id), token));
            }
        }
        fired
    }
}
