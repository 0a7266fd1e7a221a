//! Deterministic, fault-injecting network between two endpoints.
//!
//! Real networks drop, duplicate, delay and damage packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! the [`Simulator`] carries encoded datagrams between [`Side::A`] and
//! [`Side::B`] and applies a configurable fault model:
//!
//! | Fault        | Description                                             |
//! |--------------|---------------------------------------------------------|
//! | Loss         | Drop a datagram with probability `loss_rate`.           |
//! | Corruption   | Flip one random bit with probability `corrupt_rate`.    |
//! | Duplication  | Deliver a datagram twice with `duplicate_rate`.         |
//! | Latency      | Deliver `latency_ticks` after sending.                  |
//! | Jitter       | Add up to `jitter_ticks` extra delay, allowing reorder. |
//!
//! Corruption flips a bit in the payload, or in the checksum field of a
//! control packet that has no payload.  The rest of the header is never
//! touched: the checksum does not cover it, so damage there would be
//! undetectable by design of the wire format.
//!
//! On top of the random model, one-shot [`Fault`]s can be scripted against a
//! specific transmission (`side`, `kind`, `seq`), which is how the scenario
//! tests lose exactly one ACK or damage exactly one DATA packet.
//!
//! All randomness comes from a seeded ChaCha8 RNG: the same seed and the same
//! sequence of transmissions always produce the same deliveries.

use std::collections::BTreeMap;
use std::fmt;

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::packet::{Kind, Packet, HEADER_LEN, OFF_CHECKSUM};

/// One of the two endpoints attached to the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::A, Side::B];

    /// The endpoint on the other end of the link.
    pub fn peer(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::A => "A",
            Side::B => "B",
        })
    }
}

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Probability that a datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram has one bit flipped.
    pub corrupt_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Base delivery delay in ticks (at least 1).
    pub latency_ticks: u64,
    /// Maximum extra delay in ticks, drawn uniformly per datagram.
    pub jitter_ticks: u64,
    /// Random seed for determinism.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // Perfect one-tick link.
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            duplicate_rate: 0.0,
            latency_ticks: 1,
            jitter_ticks: 0,
            seed: 0,
        }
    }
}

impl SimulatorConfig {
    /// A perfect link with the given seed.
    pub fn perfect(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// A link that loses, damages and duplicates `rate` of all datagrams.
    pub fn lossy(rate: f64, seed: u64) -> Self {
        Self {
            loss_rate: rate,
            corrupt_rate: rate,
            duplicate_rate: rate,
            seed,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SimulatorError> {
        for (name, value) in [
            ("loss_rate", self.loss_rate),
            ("corrupt_rate", self.corrupt_rate),
            ("duplicate_rate", self.duplicate_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimulatorError::InvalidRate { name, value });
            }
        }
        if self.latency_ticks == 0 {
            return Err(SimulatorError::ZeroLatency);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulatorError {
    #[error("{name} must be within [0, 1], got {value}")]
    InvalidRate { name: &'static str, value: f64 },
    #[error("latency_ticks must be at least 1")]
    ZeroLatency,
}

/// A fault that can be scripted against one specific transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Drop,
    Corrupt,
    Duplicate,
}

/// What the network did with one transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Delivered,
    Dropped,
    Corrupted,
    Duplicated,
}

impl fmt::Display for Fate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Fate::Delivered => "delivered",
            Fate::Dropped => "dropped",
            Fate::Corrupted => "corrupted",
            Fate::Duplicated => "duplicated",
        })
    }
}

/// One line of the transmission trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEvent {
    pub tick: u64,
    pub from: Side,
    pub kind: Kind,
    pub seq: u32,
    pub fate: Fate,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:<6} {}→{} {:<4} seq={:<5} {}",
            self.tick,
            self.from,
            self.from.peer(),
            self.kind,
            self.seq,
            self.fate
        )
    }
}

/// Counters for everything the simulator did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub transmitted: u64,
    pub dropped: u64,
    pub corrupted: u64,
    pub duplicated: u64,
    pub delivered: u64,
}

#[derive(Debug, Clone, Copy)]
struct Scripted {
    from: Side,
    kind: Kind,
    seq: u32,
    fault: Fault,
}

/// The simulated link.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    rng: ChaCha8Rng,
    /// Datagrams in flight keyed by `(deliver_at, order)`, so delivery is in
    /// time order and ties keep transmission order.
    in_flight: BTreeMap<(u64, u64), (Side, Vec<u8>)>,
    next_order: u64,
    scripted: Vec<Scripted>,
    trace: Vec<TraceEvent>,
    stats: NetworkStats,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Result<Self, SimulatorError> {
        config.validate()?;
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            in_flight: BTreeMap::new(),
            next_order: 0,
            scripted: Vec::new(),
            trace: Vec::new(),
            stats: NetworkStats::default(),
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn trace(&self) -> &[TraceEvent] {
        &self.trace
    }

    /// Apply `fault` to the next transmission of `kind`/`seq` sent by `from`.
    ///
    /// Each scripted fault fires once.  Scripted faults take precedence over
    /// the random model for the transmission they match.
    pub fn script(&mut self, from: Side, kind: Kind, seq: u32, fault: Fault) {
        self.scripted.push(Scripted {
            from,
            kind,
            seq,
            fault,
        });
    }

    /// Number of scripted faults that have not matched a transmission yet.
    pub fn scripted_pending(&self) -> usize {
        self.scripted.len()
    }

    /// `true` when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Tick at which the next datagram is due.
    pub fn next_due(&self) -> Option<u64> {
        self.in_flight.keys().next().map(|&(at, _)| at)
    }

    /// Send `packet` from `from` to its peer at tick `now`.
    pub fn transmit(&mut self, now: u64, from: Side, packet: &Packet) {
        self.stats.transmitted += 1;
        let mut bytes = packet.encode();

        let fault = match self.take_scripted(from, packet.kind, packet.seq) {
            Some(fault) => Some(fault),
            None => self.random_fault(),
        };

        let fate = match fault {
            None => Fate::Delivered,
            Some(Fault::Drop) => Fate::Dropped,
            Some(Fault::Corrupt) => {
                self.flip_bit(&mut bytes);
                Fate::Corrupted
            }
            Some(Fault::Duplicate) => Fate::Duplicated,
        };

        self.trace.push(TraceEvent {
            tick: now,
            from,
            kind: packet.kind,
            seq: packet.seq,
            fate,
        });

        if fate != Fate::Delivered {
            debug!("[net] {}→{} {} seq={} {fate}", from, from.peer(), packet.kind, packet.seq);
        }

        match fate {
            Fate::Dropped => self.stats.dropped += 1,
            Fate::Corrupted => {
                self.stats.corrupted += 1;
                self.schedule(now, from.peer(), bytes);
            }
            Fate::Duplicated => {
                self.stats.duplicated += 1;
                self.schedule(now, from.peer(), bytes.clone());
                self.schedule(now, from.peer(), bytes);
            }
            Fate::Delivered => self.schedule(now, from.peer(), bytes),
        }
    }

    /// Remove and return every datagram due at or before `now`, as
    /// `(destination, bytes)` in delivery order.
    pub fn due(&mut self, now: u64) -> Vec<(Side, Vec<u8>)> {
        let mut out = Vec::new();
        loop {
            let Some(&key) = self.in_flight.keys().next() else {
                break;
            };
            if key.0 > now {
                break;
            }
            if let Some(datagram) = self.in_flight.remove(&key) {
                out.push(datagram);
            }
        }
        self.stats.delivered += out.len() as u64;
        out
    }

    fn take_scripted(&mut self, from: Side, kind: Kind, seq: u32) -> Option<Fault> {
        let pos = self
            .scripted
            .iter()
            .position(|s| s.from == from && s.kind == kind && s.seq == seq)?;
        Some(self.scripted.remove(pos).fault)
    }

    fn random_fault(&mut self) -> Option<Fault> {
        if self.rng.gen_bool(self.config.loss_rate) {
            Some(Fault::Drop)
        } else if self.rng.gen_bool(self.config.corrupt_rate) {
            Some(Fault::Corrupt)
        } else if self.rng.gen_bool(self.config.duplicate_rate) {
            Some(Fault::Duplicate)
        } else {
            None
        }
    }

    fn flip_bit(&mut self, bytes: &mut [u8]) {
        let index = if bytes.len() > HEADER_LEN {
            self.rng.gen_range(HEADER_LEN..bytes.len())
        } else {
            self.rng.gen_range(OFF_CHECKSUM..HEADER_LEN)
        };
        let bit = self.rng.gen_range(0..8);
        bytes[index] ^= 1 << bit;
    }

    fn schedule(&mut self, now: u64, to: Side, bytes: Vec<u8>) {
        let jitter = if self.config.jitter_ticks > 0 {
            self.rng.gen_range(0..=self.config.jitter_ticks)
        } else {
            0
        };
        let at = now
            .saturating_add(self.config.latency_ticks)
            .saturating_add(jitter);
        let order = self.next_order;
        self.next_order += 1;
        self.in_flight.insert((at, order), (to, bytes));
    }
}
