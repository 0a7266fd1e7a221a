//! Receive-side sequencing.
//!
//! The [`ReceiveSequencer`] decides what happens to every inbound DATA
//! packet after it is decoded and before anything reaches the application:
//! - Verifying the payload checksum (corrupt → NACK, nothing delivered).
//! - Delivering the packet carrying `expect_seq` and advancing it.
//! - Re-acknowledging duplicates of already-delivered packets without
//!   delivering them again.
//! - Holding packets that arrive ahead of a gap (window > 1 only) until the
//!   gap is filled.
//! - Dropping packets whose sequence number is outside any plausible window.
//!
//! The sequencer does **not** send anything itself; it returns the reply
//! that [`crate::session::Session`] should put on the network.
//!
//! The plausible window is `[expect_seq - W, expect_seq + W)`, computed in
//! wrap-around arithmetic.  With W = 1 only `expect_seq` (new) and
//! `expect_seq - 1` (duplicate) are plausible.

use std::collections::HashMap;

use crate::packet::Packet;

/// How an inbound DATA packet was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// In order; delivered (together with any buffered successors).
    Delivered,
    /// Ahead of a gap; held until the gap fills.
    Buffered,
    /// Already delivered; re-acknowledged only.
    Duplicate,
    /// Checksum mismatch; NACKed.
    Corrupt,
    /// Sequence number outside the plausible window; dropped silently.
    OutOfWindow,
}

/// Result of [`ReceiveSequencer::on_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub verdict: Verdict,
    /// ACK or NACK to send back, if any.
    pub reply: Option<Packet>,
    /// Payloads to hand to the application, in sequence order.
    pub deliver: Vec<Vec<u8>>,
}

impl Received {
    fn reply(verdict: Verdict, reply: Packet) -> Self {
        Self {
            verdict,
            reply: Some(reply),
            deliver: Vec::new(),
        }
    }
}

/// Receive-side state for one session.
#[derive(Debug)]
pub struct ReceiveSequencer {
    /// Next sequence number required for in-order delivery.
    expect_seq: u32,
    window_size: usize,
    /// Verified packets received ahead of `expect_seq`.
    pending: HashMap<u32, Vec<u8>>,
}

impl ReceiveSequencer {
    /// Create a sequencer expecting sequence 0 first.
    pub fn new(window_size: usize) -> Self {
        Self {
            expect_seq: 0,
            window_size,
            pending: HashMap::new(),
        }
    }

    pub fn expect_seq(&self) -> u32 {
        self.expect_seq
    }

    /// Number of packets held ahead of a gap.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Classify an inbound DATA packet.
    pub fn on_data(&mut self, packet: Packet) -> Received {
        let n = packet.seq;

        if !packet.verify() {
            return Received::reply(Verdict::Corrupt, Packet::nack(n));
        }

        let ahead = n.wrapping_sub(self.expect_seq) as usize;
        let behind = self.expect_seq.wrapping_sub(n) as usize;

        if ahead == 0 {
            let mut deliver = vec![packet.payload];
            self.expect_seq = self.expect_seq.wrapping_add(1);
            while let Some(next) = self.pending.remove(&self.expect_seq) {
                deliver.push(next);
                self.expect_seq = self.expect_seq.wrapping_add(1);
            }
            return Received {
                verdict: Verdict::Delivered,
                reply: Some(Packet::ack(n)),
                deliver,
            };
        }

        if ahead < self.window_size {
            self.pending.entry(n).or_insert(packet.payload);
            return Received::reply(Verdict::Buffered, Packet::ack(n));
        }

        if behind <= self.window_size {
            return Received::reply(Verdict::Duplicate, Packet::ack(n));
        }

        Received {
            verdict: Verdict::OutOfWindow,
            reply: None,
            deliver: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Kind;

    fn data(seq: u32, payload: &[u8]) -> Packet {
        Packet::data(seq, payload).unwrap()
    }

    #[test]
    fn initial_state() {
        let r = ReceiveSequencer::new(1);
        assert_eq!(r.expect_seq(), 0);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn in_order_packet_delivered_and_acked() {
        let mut r = ReceiveSequencer::new(1);
        let got = r.on_data(data(0, b"A"));

        assert_eq!(got.verdict, Verdict::Delivered);
        assert_eq!(got.deliver, vec![b"A".to_vec()]);
        assert_eq!(got.reply, Some(Packet::ack(0)));
        assert_eq!(r.expect_seq(), 1);
    }

    #[test]
    fn corrupt_packet_nacked_with_its_sequence() {
        let mut r = ReceiveSequencer::new(1);
        let mut pkt = data(0, b"B");
        pkt.payload[0] ^= 0x04;

        let got = r.on_data(pkt);
        assert_eq!(got.verdict, Verdict::Corrupt);
        assert!(got.deliver.is_empty());
        let reply = got.reply.unwrap();
        assert_eq!(reply.kind, Kind::Nack);
        assert_eq!(reply.seq, 0);
        assert_eq!(r.expect_seq(), 0);
    }

    #[test]
    fn duplicate_reacked_not_redelivered() {
        let mut r = ReceiveSequencer::new(1);
        r.on_data(data(0, b"C"));

        for _ in 0..3 {
            let got = r.on_data(data(0, b"C"));
            assert_eq!(got.verdict, Verdict::Duplicate);
            assert!(got.deliver.is_empty());
            assert_eq!(got.reply, Some(Packet::ack(0)));
        }
        assert_eq!(r.expect_seq(), 1);
    }

    #[test]
    fn stop_and_wait_drops_packet_ahead() {
        let mut r = ReceiveSequencer::new(1);
        let got = r.on_data(data(1, b"future"));
        assert_eq!(got.verdict, Verdict::OutOfWindow);
        assert!(got.reply.is_none());
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn far_behind_is_protocol_violation() {
        let mut r = ReceiveSequencer::new(1);
        for seq in 0..5 {
            r.on_data(data(seq, b"x"));
        }
        let got = r.on_data(data(1, b"x"));
        assert_eq!(got.verdict, Verdict::OutOfWindow);
        assert!(got.reply.is_none());
    }

    #[test]
    fn window_buffers_until_gap_filled() {
        let mut r = ReceiveSequencer::new(4);

        let got = r.on_data(data(2, b"c"));
        assert_eq!(got.verdict, Verdict::Buffered);
        assert_eq!(got.reply, Some(Packet::ack(2)));
        let got = r.on_data(data(1, b"b"));
        assert_eq!(got.verdict, Verdict::Buffered);
        assert_eq!(r.buffered(), 2);

        let got = r.on_data(data(0, b"a"));
        assert_eq!(got.verdict, Verdict::Delivered);
        assert_eq!(
            got.deliver,
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
        assert_eq!(r.expect_seq(), 3);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn window_rejects_beyond_its_size() {
        let mut r = ReceiveSequencer::new(4);
        assert_eq!(r.on_data(data(3, b"ok")).verdict, Verdict::Buffered);
        assert_eq!(r.on_data(data(4, b"no")).verdict, Verdict::OutOfWindow);
    }

    #[test]
    fn buffered_duplicate_keeps_first_copy() {
        let mut r = ReceiveSequencer::new(4);
        r.on_data(data(1, b"first"));
        r.on_data(data(1, b"first"));
        let got = r.on_data(data(0, b"zero"));
        assert_eq!(got.deliver, vec![b"zero".to_vec(), b"first".to_vec()]);
    }

    #[test]
    fn empty_payload_is_deliverable() {
        let mut r = ReceiveSequencer::new(1);
        let got = r.on_data(data(0, b""));
        assert_eq!(got.verdict, Verdict::Delivered);
        assert_eq!(got.deliver, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn seq_wrap_around() {
        let mut r = ReceiveSequencer::new(2);
        r.expect_seq = u32::MAX;

        assert_eq!(r.on_data(data(0, b"b")).verdict, Verdict::Buffered);
        let got = r.on_data(data(u32::MAX, b"a"));
        assert_eq!(got.deliver, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(r.expect_seq(), 1);
        assert_eq!(r.on_data(data(u32::MAX, b"a")).verdict, Verdict::Duplicate);
    }
}
