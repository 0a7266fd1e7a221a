//! Wire-format definitions for transport packets.
//!
//! Every unit exchanged with the network layer is a [`Packet`].  This module
//! is responsible for:
//! - Defining the on-wire binary layout (kind, sequence, size, checksum,
//!   payload).
//! - Computing the 16-bit Internet checksum over the payload.
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed or truncated input.
//!
//! Pure data transformation; no I/O.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Kind      |               Sequence Number                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     (cont.)   |          Payload Size         |   Checksum    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    (cont.)    |              Payload ...                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 9 bytes.
//! kind(1) + seq(4) + size(2) + checksum(2)
//!
//! The checksum covers the payload only.  It detects accidental corruption
//! with high probability; it is not a cryptographic integrity check (two
//! swapped 16-bit words, for instance, produce the same sum).

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 9;

/// Largest payload the 16-bit `size` field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

// Byte offsets of each field within the serialised header.
const OFF_KIND: usize = 0;
const OFF_SEQ: usize = 1;
const OFF_SIZE: usize = 5;
pub(crate) const OFF_CHECKSUM: usize = 7;

/// What a packet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Application payload with a sequence number.
    Data,
    /// Positive acknowledgement echoing a data sequence number.
    Ack,
    /// Negative acknowledgement: the data packet arrived corrupted.
    Nack,
}

impl Kind {
    fn to_wire(self) -> u8 {
        match self {
            Kind::Data => 0,
            Kind::Ack => 1,
            Kind::Nack => 2,
        }
    }

    fn from_wire(byte: u8) -> Result<Self, PacketError> {
        match byte {
            0 => Ok(Kind::Data),
            1 => Ok(Kind::Ack),
            2 => Ok(Kind::Nack),
            other => Err(PacketError::UnknownKind(other)),
        }
    }

    /// `true` for ACK and NACK.
    pub fn is_control(self) -> bool {
        !matches!(self, Kind::Data)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Kind::Data => "DATA",
            Kind::Ack => "ACK",
            Kind::Nack => "NACK",
        };
        f.pad(name)
    }
}

/// A transport protocol data unit.
///
/// The payload is owned; cloning a packet copies the payload, so a copy kept
/// for retransmission never aliases a buffer the application may reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: Kind,
    /// Position in the send order (DATA) or the sequence acknowledged (ACK/NACK).
    pub seq: u32,
    /// Checksum carried on the wire.  For a freshly built packet this is
    /// [`checksum`] of `payload`; after [`Packet::decode`] it is whatever the
    /// sender wrote, which may disagree with a corrupted payload.
    pub checksum: u16,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a DATA packet, copying `payload` into a buffer owned by the packet.
    pub fn data(seq: u32, payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        Ok(Self {
            kind: Kind::Data,
            seq,
            checksum: checksum(payload),
            payload: payload.to_vec(),
        })
    }

    /// Build an ACK echoing `seq`.
    pub fn ack(seq: u32) -> Self {
        Self::control(Kind::Ack, seq)
    }

    /// Build a NACK echoing `seq`.
    pub fn nack(seq: u32) -> Self {
        Self::control(Kind::Nack, seq)
    }

    fn control(kind: Kind, seq: u32) -> Self {
        Self {
            kind,
            seq,
            checksum: checksum(&[]),
            payload: Vec::new(),
        }
    }

    /// Number of payload bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Recompute the checksum over the payload and compare it with the
    /// carried one.
    pub fn verify(&self) -> bool {
        checksum(&self.payload) == self.checksum
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// The carried `checksum` is written as-is; it is not recomputed, so a
    /// packet built through [`Packet::data`] encodes its own checksum.
    pub fn encode(&self) -> Vec<u8> {
        let size = self.payload.len();
        let mut buf = vec![0u8; HEADER_LEN + size];

        buf[OFF_KIND] = self.kind.to_wire();
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        // Constructors cap the payload at MAX_PAYLOAD, so the cast is lossless.
        buf[OFF_SIZE..OFF_SIZE + 2].copy_from_slice(&(size as u16).to_be_bytes());
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&self.checksum.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        buf
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the `size` field disagrees with `buf.len()`,
    /// - the kind byte is unknown, or
    /// - a control packet carries payload bytes.
    ///
    /// The checksum is **not** verified here; see [`Packet::verify`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let kind = Kind::from_wire(buf[OFF_KIND])?;
        let seq = u32::from_be_bytes([
            buf[OFF_SEQ],
            buf[OFF_SEQ + 1],
            buf[OFF_SEQ + 2],
            buf[OFF_SEQ + 3],
        ]);
        let size = u16::from_be_bytes([buf[OFF_SIZE], buf[OFF_SIZE + 1]]) as usize;
        let carried = u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]);

        let actual = buf.len() - HEADER_LEN;
        if actual != size {
            return Err(PacketError::LengthMismatch {
                declared: size,
                actual,
            });
        }
        if kind.is_control() && size != 0 {
            return Err(PacketError::ControlWithPayload);
        }

        Ok(Packet {
            kind,
            seq,
            checksum: carried,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when building or parsing a packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("buffer too short to contain a header")]
    BufferTooShort,
    /// `size` field does not match the actual remaining bytes.
    #[error("size field says {declared} payload bytes, buffer has {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    /// Kind byte is not DATA, ACK or NACK.
    #[error("unknown packet kind {0:#04x}")]
    UnknownKind(u8),
    /// ACK or NACK with a non-empty payload.
    #[error("control packet carries a payload")]
    ControlWithPayload,
    /// Payload does not fit the 16-bit size field.
    #[error("payload of {len} bytes exceeds the {max}-byte maximum")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// Sums consecutive 16-bit big-endian words with end-around carry, padding
/// an odd trailing byte with a zero low byte, and returns the one's
/// complement of the sum.  [`Packet::encode`] writes the result big-endian.
pub fn checksum(data: &[u8]) -> u16 {
    let mut acc: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        acc += u32::from(u16::from_be_bytes([word[0], word[1]]));
        if acc > 0xffff {
            acc -= 0xffff;
        }
    }
    if let [last] = words.remainder() {
        acc += u32::from(*last) << 8;
        if acc > 0xffff {
            acc -= 0xffff;
        }
    }

    !(acc as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_empty_payload_is_all_ones() {
        assert_eq!(checksum(&[]), 0xffff);
    }

    #[test]
    fn checksum_matches_rfc1071_example() {
        // Worked example from RFC 1071 §3: the sum is 0xddf2.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum(&data), !0xddf2);
    }

    #[test]
    fn checksum_pads_odd_trailing_byte() {
        assert_eq!(checksum(&[0xab]), !0xab00);
        assert_eq!(checksum(b"A"), checksum(&[b'A', 0]));
    }

    #[test]
    fn checksum_is_deterministic() {
        let payload = b"the quick brown fox jumps over the lazy dog";
        assert_eq!(checksum(payload), checksum(&payload.to_vec()));
    }

    #[test]
    fn single_bit_flips_change_checksum() {
        // A single-bit flip moves the sum by a power of two, which is never
        // zero modulo 0xffff.
        let payload: Vec<u8> = (0u8..64).map(|b| b.wrapping_mul(37).wrapping_add(11)).collect();
        let original = checksum(&payload);
        for byte in 0..payload.len() {
            for bit in 0..8 {
                let mut flipped = payload.clone();
                flipped[byte] ^= 1 << bit;
                assert_ne!(checksum(&flipped), original, "byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn data_packet_carries_payload_checksum() {
        let pkt = Packet::data(7, b"hello").unwrap();
        assert_eq!(pkt.kind, Kind::Data);
        assert_eq!(pkt.seq, 7);
        assert_eq!(pkt.size(), 5);
        assert_eq!(pkt.checksum, checksum(b"hello"));
        assert!(pkt.verify());
    }

    #[test]
    fn data_packet_owns_independent_copy() {
        let mut buf = b"reuse me".to_vec();
        let pkt = Packet::data(0, &buf).unwrap();
        let copy = pkt.clone();
        buf.fill(0);
        drop(pkt);
        assert_eq!(copy.payload, b"reuse me");
        assert!(copy.verify());
    }

    #[test]
    fn oversized_payload_rejected() {
        let big = vec![0u8; MAX_PAYLOAD + 1];
        assert_eq!(
            Packet::data(0, &big),
            Err(PacketError::PayloadTooLarge {
                len: MAX_PAYLOAD + 1,
                max: MAX_PAYLOAD
            })
        );
    }

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = Packet::data(42, b"payload").unwrap();
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn control_packets_roundtrip_without_payload() {
        for pkt in [Packet::ack(3), Packet::nack(9)] {
            let bytes = pkt.encode();
            assert_eq!(bytes.len(), HEADER_LEN);
            let decoded = Packet::decode(&bytes).unwrap();
            assert_eq!(decoded, pkt);
            assert!(decoded.verify());
        }
    }

    #[test]
    fn header_fields_big_endian_on_wire() {
        let pkt = Packet::data(0x0102_0304, &[0xaa, 0xbb, 0xcc]).unwrap();
        let bytes = pkt.encode();
        assert_eq!(bytes[OFF_KIND], 0);
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[OFF_SIZE..OFF_SIZE + 2], &[0x00, 0x03]);
        assert_eq!(
            &bytes[OFF_CHECKSUM..OFF_CHECKSUM + 2],
            &pkt.checksum.to_be_bytes()
        );
        assert_eq!(&bytes[HEADER_LEN..], &[0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Packet::decode(&[]), Err(PacketError::BufferTooShort));
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Packet::decode(&[0u8; HEADER_LEN - 1]),
            Err(PacketError::BufferTooShort)
        );
    }

    #[test]
    fn decode_truncated_payload_returns_error() {
        let mut bytes = Packet::data(0, b"data").unwrap().encode();
        bytes.pop();
        assert_eq!(
            Packet::decode(&bytes),
            Err(PacketError::LengthMismatch {
                declared: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn decode_unknown_kind_returns_error() {
        let mut bytes = Packet::ack(1).encode();
        bytes[OFF_KIND] = 0x7f;
        assert_eq!(Packet::decode(&bytes), Err(PacketError::UnknownKind(0x7f)));
    }

    #[test]
    fn decode_control_with_payload_returns_error() {
        let mut bytes = Packet::data(1, b"x").unwrap().encode();
        bytes[OFF_KIND] = 1;
        assert_eq!(Packet::decode(&bytes), Err(PacketError::ControlWithPayload));
    }

    #[test]
    fn corrupted_payload_decodes_but_fails_verification() {
        let mut bytes = Packet::data(5, b"test").unwrap().encode();
        bytes[HEADER_LEN] ^= 0x01;
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.seq, 5);
        assert!(!decoded.verify());
    }
}
