//! Send-side retransmission buffer.
//!
//! [`RetransmitBuffer`] assigns sequence numbers, keeps a copy of every data
//! packet until it is acknowledged, and queues application payloads while
//! the window is full.  It does **not** touch the network or the timers;
//! [`crate::session::Session`] calls these methods and performs the I/O.
//!
//! # Window contract
//!
//! - At most `window_size` packets are outstanding (1 = stop-and-wait).
//! - Payloads submitted while the window is full wait in a FIFO queue and
//!   are promoted by [`RetransmitBuffer::fill_window`] once an ACK frees a
//!   slot, so they are never sent concurrently with a full window.
//! - Only an ACK for the **oldest** outstanding sequence slides the window;
//!   any other ACK is stale or premature and ignored.
//! - A NACK or timeout resends the stored packet unchanged.  The
//!   `retry_limit`-th retransmission request for one packet reports
//!   [`Retransmit::Exhausted`] instead of resending.
//!
//! ```text
//!  oldest_seq          next_seq
//!      │                  │
//!  ────┼──────────────────┼──────────────────▶ seq space
//!      │ <── in flight ──▶│ <── queued ─────▶
//! ```

use std::collections::VecDeque;

use crate::packet::{checksum, Kind, Packet, PacketError, MAX_PAYLOAD};

/// A packet that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitEntry {
    /// Retained copy; clones of it go to the network.
    pub packet: Packet,
    /// How many times this packet has been transmitted (1 = first send).
    pub tx_count: u32,
    /// Retransmission requests (timeouts and NACKs) received so far.
    pub retries: u32,
}

/// Outcome of a retransmission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retransmit {
    /// Send this copy of the stored packet.
    Resend(Packet),
    /// The packet reached the retry limit; the channel is unusable.
    Exhausted { seq: u32, attempts: u32 },
    /// The sequence number is not outstanding (already acknowledged, or never
    /// sent).
    NotOutstanding,
}

/// Send-side state for one session.
#[derive(Debug)]
pub struct RetransmitBuffer {
    /// Sequence number for the next new data packet.
    next_seq: u32,
    window_size: usize,
    retry_limit: u32,
    /// Outstanding packets ordered by sequence number (front = oldest).
    window: VecDeque<RetransmitEntry>,
    /// Payloads accepted from the application but not yet sent.
    queued: VecDeque<Vec<u8>>,
}

impl RetransmitBuffer {
    /// Create an empty buffer whose first packet will carry sequence 0.
    ///
    /// `window_size` must be at least 1 and `retry_limit` at least 1; the
    /// session validates both before constructing the buffer.
    pub fn new(window_size: usize, retry_limit: u32) -> Self {
        debug_assert!(window_size >= 1, "window_size must be at least 1");
        debug_assert!(retry_limit >= 1, "retry_limit must be at least 1");
        Self {
            next_seq: 0,
            window_size,
            retry_limit,
            window: VecDeque::with_capacity(window_size),
            queued: VecDeque::new(),
        }
    }

    /// Sequence number the next new packet will carry.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// `true` when there is room for at least one more outstanding packet.
    pub fn can_send(&self) -> bool {
        self.window.len() < self.window_size
    }

    /// Number of packets awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    /// Number of payloads waiting for window space.
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    pub fn has_unacked(&self) -> bool {
        !self.window.is_empty()
    }

    /// `true` when nothing is outstanding and nothing is queued.
    pub fn is_drained(&self) -> bool {
        self.window.is_empty() && self.queued.is_empty()
    }

    /// Sequence number at the head of the window.
    pub fn oldest_seq(&self) -> Option<u32> {
        self.window.front().map(|e| e.packet.seq)
    }

    /// Iterate over outstanding packets from oldest to newest.
    pub fn entries(&self) -> impl Iterator<Item = &RetransmitEntry> {
        self.window.iter()
    }

    /// Accept a payload from the application.
    ///
    /// Returns `Ok(Some(packet))` with a copy to transmit when the window has
    /// room, or `Ok(None)` when the payload was queued.  An oversized payload
    /// is rejected before any sequence number is consumed.
    pub fn submit(&mut self, payload: &[u8]) -> Result<Option<Packet>, PacketError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        // Earlier payloads still queued go first.
        if !self.can_send() || !self.queued.is_empty() {
            self.queued.push_back(payload.to_vec());
            return Ok(None);
        }

        Ok(Some(self.push_outstanding(payload.to_vec())))
    }

    /// Promote queued payloads into the window while it has room.
    ///
    /// Returns the newly outstanding packets, oldest first, for transmission.
    pub fn fill_window(&mut self) -> Vec<Packet> {
        let mut sent = Vec::new();
        while self.can_send() {
            let Some(payload) = self.queued.pop_front() else {
                break;
            };
            sent.push(self.push_outstanding(payload));
        }
        sent
    }

    /// `payload` must already be within [`MAX_PAYLOAD`].
    fn push_outstanding(&mut self, payload: Vec<u8>) -> Packet {
        let packet = Packet {
            kind: Kind::Data,
            seq: self.next_seq,
            checksum: checksum(&payload),
            payload,
        };
        self.window.push_back(RetransmitEntry {
            packet: packet.clone(),
            tx_count: 1,
            retries: 0,
        });
        self.next_seq = self.next_seq.wrapping_add(1);
        packet
    }

    /// Process an ACK.
    ///
    /// If `seq` is the oldest outstanding sequence the entry is released and
    /// returned; otherwise the ACK is ignored and `None` is returned.
    pub fn on_ack(&mut self, seq: u32) -> Option<RetransmitEntry> {
        if self.oldest_seq() == Some(seq) {
            self.window.pop_front()
        } else {
            None
        }
    }

    /// Handle a NACK for `seq`.
    pub fn on_nack(&mut self, seq: u32) -> Retransmit {
        self.retransmit(seq)
    }

    /// Handle expiry of the timer guarding `seq`.
    pub fn on_timeout(&mut self, seq: u32) -> Retransmit {
        self.retransmit(seq)
    }

    fn retransmit(&mut self, seq: u32) -> Retransmit {
        let Some(oldest) = self.oldest_seq() else {
            return Retransmit::NotOutstanding;
        };
        let offset = seq.wrapping_sub(oldest) as usize;
        let retry_limit = self.retry_limit;
        let Some(entry) = self.window.get_mut(offset) else {
            return Retransmit::NotOutstanding;
        };

        entry.retries += 1;
        if entry.retries >= retry_limit {
            return Retransmit::Exhausted {
                seq,
                attempts: entry.tx_count,
            };
        }
        entry.tx_count += 1;
        Retransmit::Resend(entry.packet.clone())
    }

    /// Drop every outstanding and queued payload.
    ///
    /// Returns how many were abandoned.
    pub fn abandon(&mut self) -> usize {
        let n = self.window.len() + self.queued.len();
        self.window.clear();
        self.queued.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let s = RetransmitBuffer::new(1, 3);
        assert_eq!(s.next_seq(), 0);
        assert!(s.can_send());
        assert!(!s.has_unacked());
        assert!(s.is_drained());
        assert_eq!(s.oldest_seq(), None);
    }

    #[test]
    fn submit_assigns_sequence_and_retains_copy() {
        let mut s = RetransmitBuffer::new(1, 3);
        let pkt = s.submit(b"A").unwrap().unwrap();

        assert_eq!(pkt.kind, Kind::Data);
        assert_eq!(pkt.seq, 0);
        assert_eq!(pkt.payload, b"A");
        assert_eq!(s.next_seq(), 1);
        assert_eq!(s.oldest_seq(), Some(0));
        assert_eq!(s.entries().next().unwrap().tx_count, 1);
    }

    #[test]
    fn stop_and_wait_queues_second_submit() {
        let mut s = RetransmitBuffer::new(1, 3);
        assert!(s.submit(b"D").unwrap().is_some());
        assert!(s.submit(b"E").unwrap().is_none());

        assert_eq!(s.in_flight(), 1);
        assert_eq!(s.queued(), 1);
        assert_eq!(s.next_seq(), 1);
    }

    #[test]
    fn ack_releases_head_and_fill_promotes_queue() {
        let mut s = RetransmitBuffer::new(1, 3);
        s.submit(b"D").unwrap();
        s.submit(b"E").unwrap();

        let released = s.on_ack(0).unwrap();
        assert_eq!(released.packet.payload, b"D");
        assert!(!s.has_unacked());

        let sent = s.fill_window();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].seq, 1);
        assert_eq!(sent[0].payload, b"E");
        assert_eq!(s.queued(), 0);
        assert_eq!(s.oldest_seq(), Some(1));
    }

    #[test]
    fn ack_for_other_sequence_is_ignored() {
        let mut s = RetransmitBuffer::new(2, 3);
        s.submit(b"x").unwrap();
        s.submit(b"y").unwrap();

        assert!(s.on_ack(1).is_none());
        assert!(s.on_ack(99).is_none());
        assert_eq!(s.in_flight(), 2);

        assert!(s.on_ack(0).is_some());
        // Duplicate ACK after release.
        assert!(s.on_ack(0).is_none());
        assert_eq!(s.oldest_seq(), Some(1));
    }

    #[test]
    fn window_of_four_sends_four_then_queues() {
        let mut s = RetransmitBuffer::new(4, 3);
        for i in 0..4u8 {
            assert!(s.submit(&[i]).unwrap().is_some());
        }
        assert!(!s.can_send());
        assert!(s.submit(&[4]).unwrap().is_none());
        assert_eq!(s.in_flight(), 4);
        assert_eq!(s.queued(), 1);
    }

    #[test]
    fn fifo_order_preserved_while_queue_nonempty() {
        let mut s = RetransmitBuffer::new(2, 3);
        s.submit(b"a").unwrap();
        s.submit(b"b").unwrap();
        s.submit(b"c").unwrap();
        s.on_ack(0).unwrap();

        // A slot is free but "c" is still queued, so "d" must wait behind it.
        assert!(s.submit(b"d").unwrap().is_none());
        let sent = s.fill_window();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload, b"c");
        assert_eq!(s.queued(), 1);
    }

    #[test]
    fn nack_resends_identical_packet() {
        let mut s = RetransmitBuffer::new(1, 5);
        let original = s.submit(b"B").unwrap().unwrap();

        match s.on_nack(0) {
            Retransmit::Resend(pkt) => assert_eq!(pkt, original),
            other => panic!("expected resend, got {other:?}"),
        }
        assert_eq!(s.entries().next().unwrap().tx_count, 2);
    }

    #[test]
    fn nack_for_unknown_sequence_is_ignored() {
        let mut s = RetransmitBuffer::new(1, 5);
        assert_eq!(s.on_nack(0), Retransmit::NotOutstanding);
        s.submit(b"B").unwrap();
        assert_eq!(s.on_nack(7), Retransmit::NotOutstanding);
        s.on_ack(0).unwrap();
        assert_eq!(s.on_nack(0), Retransmit::NotOutstanding);
    }

    #[test]
    fn nack_within_window_targets_that_packet() {
        let mut s = RetransmitBuffer::new(4, 5);
        for p in [b"a", b"b", b"c"] {
            s.submit(p).unwrap();
        }
        match s.on_nack(2) {
            Retransmit::Resend(pkt) => assert_eq!(pkt.payload, b"c"),
            other => panic!("expected resend, got {other:?}"),
        }
    }

    #[test]
    fn retry_limit_reached_on_rth_request() {
        let mut s = RetransmitBuffer::new(1, 3);
        s.submit(b"C").unwrap();

        assert!(matches!(s.on_timeout(0), Retransmit::Resend(_)));
        assert!(matches!(s.on_timeout(0), Retransmit::Resend(_)));
        assert_eq!(
            s.on_timeout(0),
            Retransmit::Exhausted {
                seq: 0,
                attempts: 3
            }
        );
    }

    #[test]
    fn oversized_payload_consumes_no_sequence() {
        let mut s = RetransmitBuffer::new(1, 3);
        let big = vec![0u8; MAX_PAYLOAD + 1];
        assert!(s.submit(&big).is_err());
        assert_eq!(s.next_seq(), 0);
        assert!(s.is_drained());
    }

    #[test]
    fn retained_copy_is_independent_of_caller_buffer() {
        let mut s = RetransmitBuffer::new(1, 3);
        let mut buf = b"original".to_vec();
        s.submit(&buf).unwrap();
        buf.copy_from_slice(b"mutated!");

        match s.on_timeout(0) {
            Retransmit::Resend(pkt) => {
                assert_eq!(pkt.payload, b"original");
                assert!(pkt.verify());
            }
            other => panic!("expected resend, got {other:?}"),
        }
    }

    #[test]
    fn abandon_counts_outstanding_and_queued() {
        let mut s = RetransmitBuffer::new(1, 3);
        s.submit(b"1").unwrap();
        s.submit(b"2").unwrap();
        s.submit(b"3").unwrap();
        assert_eq!(s.abandon(), 3);
        assert!(s.is_drained());
    }

    #[test]
    fn seq_wraps_around() {
        let mut s = RetransmitBuffer::new(2, 3);
        s.next_seq = u32::MAX;
        let a = s.submit(b"a").unwrap().unwrap();
        let b = s.submit(b"b").unwrap().unwrap();
        assert_eq!(a.seq, u32::MAX);
        assert_eq!(b.seq, 0);

        match s.on_nack(0) {
            Retransmit::Resend(pkt) => assert_eq!(pkt.payload, b"b"),
            other => panic!("expected resend, got {other:?}"),
        }
        assert!(s.on_ack(u32::MAX).is_some());
        assert_eq!(s.oldest_seq(), Some(0));
    }
}
