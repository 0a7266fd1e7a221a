//! `reliable-transport` — a tick-driven ARQ transport layer.
//!
//! Turns an unreliable, corrupting datagram service into an in-order,
//! exactly-once, uncorrupted payload stream using checksums, positive and
//! negative acknowledgements, and timeout-driven retransmission.
//!
//! # Architecture
//!
//! ```text
//!          application payloads
//!                 │   ▲
//!     on_app_send │   │ deliver_to_application
//!  ┌──────────────▼───┴─────────────────────────┐
//!  │                  Session                   │
//!  │  ┌────────────────┐    ┌────────────────┐  │
//!  │  │ RetransmitBuf. │    │ ReceiveSequenc.│  │◀── on_timeout
//!  │  └────────────────┘    └────────────────┘  │
//!  │           RetransmitTimer (one live)       │──▶ arm_timer / cancel_timer
//!  └──────────────┬───▲─────────────────────────┘
//!  send_to_network│   │ on_network_receive
//!                 ▼   │
//!            Packet codec (wire format)
//!                 │   ▲
//!  ┌──────────────▼───┴─────────────────────────┐
//!  │     Simulator (seeded lossy link)          │   driven by the Harness
//!  └────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]    — wire format and Internet checksum
//! - [`sender`]    — outbound window, queued payloads, retry accounting
//! - [`receiver`]  — inbound verification, duplicate suppression, ordering
//! - [`timer`]     — retransmission timer and a tick-based timer facility
//! - [`state`]     — finite-state-machine types
//! - [`session`]   — the per-endpoint state machine and its [`session::Stack`]
//! - [`stats`]     — per-session counters
//! - [`simulator`] — deterministic fault-injecting network
//! - [`harness`]   — two sessions joined by a simulated link

pub mod harness;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod simulator;
pub mod state;
pub mod stats;
pub mod timer;

pub use harness::{Harness, HarnessError};
pub use packet::{checksum, Kind, Packet, PacketError};
pub use session::{EndpointId, Session, SessionConfig, SessionError, Stack};
pub use simulator::{Side, SimulatorConfig};
pub use state::SessionState;
pub use timer::{TimerConfig, TimerHandle, TimerToken};
