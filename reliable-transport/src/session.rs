//! Transport session: the per-endpoint ARQ state machine.
//!
//! A [`Session`] owns the complete transport state for one endpoint.  Its
//! responsibilities are:
//! - Driving the finite-state machine (see [`crate::state`]).
//! - Coordinating [`crate::sender`] and [`crate::receiver`].
//! - Dispatching inbound [`Packet`]s to the right handler.
//! - Arming and cancelling the retransmission timer via [`crate::timer`].
//!
//! The session never blocks and never performs I/O on its own.  It is driven
//! by three call-ins, each processed to completion before the next:
//! [`Session::on_app_send`], [`Session::on_network_receive`] (or
//! [`Session::on_network_datagram`]) and [`Session::on_timeout`].  Every
//! effect on the outside world goes through the [`Stack`] passed to the
//! call-in.
//!
//! Buffers cross the boundary by value: payloads handed to
//! [`Stack::deliver_to_application`] and packets handed to
//! [`Stack::send_to_network`] are owned by the receiver from then on.  The
//! session keeps its own copy of every unacknowledged packet.

use std::fmt;

use log::{debug, error, warn};
use thiserror::Error;

use crate::packet::{Kind, Packet, PacketError};
use crate::receiver::{ReceiveSequencer, Verdict};
use crate::sender::{RetransmitBuffer, Retransmit};
use crate::state::SessionState;
use crate::stats::SessionStats;
use crate::timer::{RetransmitTimer, TimerConfig, TimerHandle, TimerToken};

/// Largest accepted window size.
pub const MAX_WINDOW: usize = 1024;

/// Services a session consumes from the layers around it.
pub trait Stack {
    /// Push an in-order payload to the application above.
    fn deliver_to_application(&mut self, payload: Vec<u8>);

    /// Push a packet to the network layer below.
    fn send_to_network(&mut self, packet: Packet);

    /// Schedule [`Session::on_timeout`] with `token` after `ticks` ticks.
    fn arm_timer(&mut self, ticks: u64, token: TimerToken) -> TimerHandle;

    /// Cancel a timer.  Must be a no-op if the timer already fired.
    fn cancel_timer(&mut self, handle: TimerHandle);

    /// Tell the application the channel is unusable: packet `seq` exhausted
    /// its retries.
    fn channel_failed(&mut self, seq: u32);
}

/// Identifies the network endpoint a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(pub u32);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep{}", self.0)
    }
}

/// Tunable session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum unacknowledged packets (1 = stop-and-wait).
    pub window_size: usize,
    /// Retransmission requests tolerated per packet; the last one declares
    /// the link down instead of resending.
    pub retry_limit: u32,
    pub timer: TimerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_size: 1,
            retry_limit: 8,
            timer: TimerConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.window_size == 0 || self.window_size > MAX_WINDOW {
            return Err(SessionError::InvalidConfig(format!(
                "window_size must be in 1..={MAX_WINDOW}, got {}",
                self.window_size
            )));
        }
        if self.retry_limit == 0 {
            return Err(SessionError::InvalidConfig(
                "retry_limit must be at least 1".into(),
            ));
        }
        if self.timer.rto_ticks == 0 {
            return Err(SessionError::InvalidConfig(
                "rto_ticks must be at least 1".into(),
            ));
        }
        if self.timer.max_rto_ticks < self.timer.rto_ticks {
            return Err(SessionError::InvalidConfig(format!(
                "max_rto_ticks ({}) is below rto_ticks ({})",
                self.timer.max_rto_ticks, self.timer.rto_ticks
            )));
        }
        Ok(())
    }
}

/// Errors surfaced to the caller of a session operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no network endpoint to bind to")]
    NoEndpoint,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("session has not been initialised")]
    NotInitialized,
    #[error("session is already initialised")]
    AlreadyInitialized,
    #[error("session is closing; sends are no longer accepted")]
    Closing,
    #[error("link down: packet {seq} was never acknowledged")]
    LinkDown { seq: u32 },
    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// One endpoint's transport state.
#[derive(Debug)]
pub struct Session {
    endpoint: EndpointId,
    config: SessionConfig,
    state: SessionState,
    sender: RetransmitBuffer,
    receiver: ReceiveSequencer,
    timer: RetransmitTimer,
    stats: SessionStats,
    /// Sequence number that exhausted its retries, once `Failed`.
    failed_seq: Option<u32>,
}

impl Session {
    /// Create a session bound to `endpoint`.
    ///
    /// Fails when no endpoint is given or the configuration is invalid.  The
    /// session must be [`init`](Self::init)ialised before use.
    pub fn create(
        endpoint: Option<EndpointId>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let endpoint = endpoint.ok_or(SessionError::NoEndpoint)?;
        config.validate()?;

        Ok(Self {
            endpoint,
            sender: RetransmitBuffer::new(config.window_size, config.retry_limit),
            receiver: ReceiveSequencer::new(config.window_size),
            timer: RetransmitTimer::new(config.timer.clone()),
            config,
            state: SessionState::Uninitialized,
            stats: SessionStats::default(),
            failed_seq: None,
        })
    }

    /// Mark the session usable.  Call once, after the surrounding stack is
    /// fully wired.
    pub fn init(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Uninitialized {
            return Err(SessionError::AlreadyInitialized);
        }
        self.state = SessionState::Idle;
        debug!(
            "[{}] initialised (window={}, retry_limit={}, rto={} ticks)",
            self.endpoint, self.config.window_size, self.config.retry_limit, self.timer.current_rto()
        );
        Ok(())
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Next sequence number to assign to an outgoing data packet.
    pub fn send_seq(&self) -> u32 {
        self.sender.next_seq()
    }

    /// Next sequence number required for in-order delivery.
    pub fn expect_seq(&self) -> u32 {
        self.receiver.expect_seq()
    }

    /// Packets sent and not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.sender.in_flight()
    }

    /// Payloads waiting for window space.
    pub fn queued(&self) -> usize {
        self.sender.queued()
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    /// `true` when nothing is outstanding or queued in the send direction.
    pub fn is_idle(&self) -> bool {
        self.sender.is_drained()
    }

    // -----------------------------------------------------------------------
    // Call-ins
    // -----------------------------------------------------------------------

    /// Accept a payload from the application.
    ///
    /// The payload is copied; the caller may reuse its buffer immediately.
    /// If the window is full the payload is queued and sent once earlier
    /// packets are acknowledged.  On error nothing about the session changes.
    pub fn on_app_send<S: Stack + ?Sized>(
        &mut self,
        stack: &mut S,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        match self.state {
            SessionState::Uninitialized => return Err(SessionError::NotInitialized),
            SessionState::Closing => return Err(SessionError::Closing),
            SessionState::Failed => {
                return Err(SessionError::LinkDown {
                    seq: self.failed_seq.unwrap_or_default(),
                })
            }
            SessionState::Idle | SessionState::AwaitingAck => {}
        }

        let sent = self.sender.submit(payload)?;
        self.stats.app_sends += 1;

        match sent {
            Some(packet) => {
                self.transmit_new(stack, packet);
                self.ensure_timer(stack);
                self.refresh_state();
            }
            None => debug!(
                "[{}] window full ({} in flight); queued {} bytes ({} waiting)",
                self.endpoint,
                self.sender.in_flight(),
                payload.len(),
                self.sender.queued()
            ),
        }
        Ok(())
    }

    /// Decode a raw datagram from the network and handle it.
    ///
    /// A datagram that does not frame correctly is treated like corruption
    /// of an unknown packet: dropped without a reply.
    pub fn on_network_datagram<S: Stack + ?Sized>(&mut self, stack: &mut S, bytes: &[u8]) {
        match Packet::decode(bytes) {
            Ok(packet) => self.on_network_receive(stack, packet),
            Err(e) => {
                self.stats.violations += 1;
                warn!("[{}] dropping undecodable datagram ({} bytes): {e}", self.endpoint, bytes.len());
            }
        }
    }

    /// Handle a packet from the network layer.
    pub fn on_network_receive<S: Stack + ?Sized>(&mut self, stack: &mut S, packet: Packet) {
        if self.state == SessionState::Uninitialized {
            warn!("[{}] dropping {} seq={} before init", self.endpoint, packet.kind, packet.seq);
            return;
        }

        match packet.kind {
            Kind::Data => self.handle_data(stack, packet),
            Kind::Ack | Kind::Nack if !packet.verify() => {
                self.stats.violations += 1;
                warn!("[{}] dropping {} seq={} with bad checksum", self.endpoint, packet.kind, packet.seq);
            }
            Kind::Ack => self.handle_ack(stack, packet.seq),
            Kind::Nack => self.handle_nack(stack, packet.seq),
        }
    }

    /// Handle expiry of a retransmission timer.
    pub fn on_timeout<S: Stack + ?Sized>(&mut self, stack: &mut S, token: TimerToken) {
        let Some(seq) = self.timer.on_fire(token) else {
            self.stats.stale_timeouts += 1;
            debug!(
                "[{}] ignoring stale timer seq={} gen={}",
                self.endpoint, token.seq, token.generation
            );
            return;
        };
        self.stats.timeouts += 1;

        match self.sender.on_timeout(seq) {
            Retransmit::Resend(packet) => {
                self.stats.retransmissions += 1;
                debug!(
                    "[{}] timeout; ↻ DATA seq={} len={}",
                    self.endpoint,
                    packet.seq,
                    packet.size()
                );
                stack.send_to_network(packet);
                self.timer.back_off();
                self.timer.arm(stack, seq);
            }
            Retransmit::Exhausted { seq, attempts } => self.fail(stack, seq, attempts),
            Retransmit::NotOutstanding => self.ensure_timer(stack),
        }
    }

    /// The application above is gone; the network below still works.
    ///
    /// Outstanding and queued payloads are abandoned and the timer is
    /// cancelled.  Inbound DATA is still acknowledged so the peer's sender
    /// can finish, but nothing more is delivered upward.
    ///
    /// Before [`init`](Self::init) there is nothing to tear down and the call
    /// is ignored.
    pub fn on_teardown<S: Stack + ?Sized>(&mut self, stack: &mut S) {
        match self.state {
            SessionState::Closing => return,
            SessionState::Uninitialized => {
                warn!("[{}] teardown before init ignored", self.endpoint);
                return;
            }
            SessionState::Idle | SessionState::AwaitingAck | SessionState::Failed => {}
        }

        self.timer.cancel(stack);
        let abandoned = self.sender.abandon();
        if abandoned > 0 {
            warn!("[{}] teardown abandons {abandoned} unacknowledged payload(s)", self.endpoint);
        }
        debug!("[{}] {} → {}", self.endpoint, self.state, SessionState::Closing);
        self.state = SessionState::Closing;
    }

    /// Release everything the session holds.
    ///
    /// Safe with unacknowledged data outstanding.  Returns how many payloads
    /// were abandoned.
    pub fn destroy<S: Stack + ?Sized>(mut self, stack: &mut S) -> usize {
        self.timer.cancel(stack);
        let abandoned = self.sender.abandon();
        debug!("[{}] destroyed ({abandoned} payload(s) abandoned)", self.endpoint);
        abandoned
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    fn handle_data<S: Stack + ?Sized>(&mut self, stack: &mut S, packet: Packet) {
        let (seq, len) = (packet.seq, packet.size());
        let received = self.receiver.on_data(packet);

        match received.verdict {
            Verdict::Delivered | Verdict::Buffered => debug!(
                "[{}] ← DATA seq={seq} len={len} {:?}; expect={}",
                self.endpoint,
                received.verdict,
                self.receiver.expect_seq()
            ),
            Verdict::Duplicate => {
                self.stats.duplicates += 1;
                debug!("[{}] ← DATA seq={seq} duplicate; re-ACK", self.endpoint);
            }
            Verdict::Corrupt => {
                self.stats.corrupt += 1;
                warn!("[{}] ← DATA seq={seq} len={len} failed checksum; NACK", self.endpoint);
            }
            Verdict::OutOfWindow => {
                self.stats.violations += 1;
                warn!(
                    "[{}] ← DATA seq={seq} outside window (expect={}); dropped",
                    self.endpoint,
                    self.receiver.expect_seq()
                );
            }
        }

        for payload in received.deliver {
            if self.state == SessionState::Closing {
                self.stats.discarded_after_teardown += 1;
            } else {
                self.stats.delivered += 1;
                stack.deliver_to_application(payload);
            }
        }

        if let Some(reply) = received.reply {
            match reply.kind {
                Kind::Ack => self.stats.acks_sent += 1,
                Kind::Nack => self.stats.nacks_sent += 1,
                Kind::Data => {}
            }
            debug!("[{}] → {} seq={}", self.endpoint, reply.kind, reply.seq);
            stack.send_to_network(reply);
        }
    }

    fn handle_ack<S: Stack + ?Sized>(&mut self, stack: &mut S, seq: u32) {
        let Some(entry) = self.sender.on_ack(seq) else {
            self.stats.acks_ignored += 1;
            debug!("[{}] ← ACK seq={seq} ignored", self.endpoint);
            return;
        };

        self.stats.acks_accepted += 1;
        debug!(
            "[{}] ← ACK seq={seq} after {} transmission(s)",
            self.endpoint, entry.tx_count
        );

        self.timer.cancel(stack);
        self.timer.reset();

        for packet in self.sender.fill_window() {
            self.transmit_new(stack, packet);
        }
        self.ensure_timer(stack);
        self.refresh_state();
    }

    fn handle_nack<S: Stack + ?Sized>(&mut self, stack: &mut S, seq: u32) {
        self.stats.nacks_received += 1;
        let is_head = self.sender.oldest_seq() == Some(seq);

        match self.sender.on_nack(seq) {
            Retransmit::Resend(packet) => {
                self.stats.retransmissions += 1;
                debug!(
                    "[{}] ← NACK seq={seq}; ↻ DATA len={}",
                    self.endpoint,
                    packet.size()
                );
                stack.send_to_network(packet);
                if is_head {
                    self.timer.arm(stack, seq);
                }
            }
            Retransmit::Exhausted { seq, attempts } => self.fail(stack, seq, attempts),
            Retransmit::NotOutstanding => {
                debug!("[{}] ← NACK seq={seq} ignored", self.endpoint);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn transmit_new<S: Stack + ?Sized>(&mut self, stack: &mut S, packet: Packet) {
        self.stats.data_sent += 1;
        debug!(
            "[{}] → DATA seq={} len={} in_flight={}",
            self.endpoint,
            packet.seq,
            packet.size(),
            self.sender.in_flight()
        );
        stack.send_to_network(packet);
    }

    /// Arm the timer for the window head if something is outstanding and no
    /// timer is live.
    fn ensure_timer<S: Stack + ?Sized>(&mut self, stack: &mut S) {
        if self.timer.is_armed() {
            return;
        }
        if let Some(head) = self.sender.oldest_seq() {
            self.timer.arm(stack, head);
        }
    }

    fn refresh_state(&mut self) {
        if self.state.accepts_sends() {
            self.state = if self.sender.has_unacked() {
                SessionState::AwaitingAck
            } else {
                SessionState::Idle
            };
        }
    }

    fn fail<S: Stack + ?Sized>(&mut self, stack: &mut S, seq: u32, attempts: u32) {
        error!(
            "[{}] link down: seq={seq} unacknowledged after {attempts} transmission(s)",
            self.endpoint
        );
        self.timer.cancel(stack);
        let abandoned = self.sender.abandon();
        if abandoned > 1 {
            warn!("[{}] dropping {} more payload(s) behind it", self.endpoint, abandoned - 1);
        }
        self.state = SessionState::Failed;
        self.failed_seq = Some(seq);
        stack.channel_failed(seq);
    }
}
