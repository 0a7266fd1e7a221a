//! Two-endpoint driver.
//!
//! [`Harness`] wires two [`Session`]s to each other through a [`Simulator`]
//! and gives each its own [`TickTimers`] and application inbox.  Time only
//! moves when the harness is told to: [`Harness::tick`] advances one tick,
//! [`Harness::run_until_idle`] jumps straight from one event to the next.
//!
//! Within a tick, expired timers are collected first, then every datagram
//! due at that tick is handed to its destination, and only then are the
//! collected timer fires dispatched.  A fire that lost the race against an
//! ACK in the same tick therefore reaches the session as a stale token,
//! which is exactly the interleaving the session has to tolerate.

use log::{debug, info};
use thiserror::Error;

use crate::packet::Packet;
use crate::session::{EndpointId, Session, SessionConfig, SessionError, Stack};
use crate::simulator::{Side, Simulator, SimulatorConfig, SimulatorError, TraceEvent};
use crate::timer::{TickTimers, TimerHandle, TimerToken};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("session: {0}")]
    Session(#[from] SessionError),
    #[error("simulator: {0}")]
    Simulator(#[from] SimulatorError),
}

/// Everything that belongs to one endpoint.
#[derive(Debug)]
struct Node {
    session: Session,
    timers: TickTimers,
    inbox: Vec<Vec<u8>>,
    failures: Vec<u32>,
}

/// The [`Stack`] one session sees while a call-in is running.
struct NodeStack<'a> {
    side: Side,
    now: u64,
    timers: &'a mut TickTimers,
    inbox: &'a mut Vec<Vec<u8>>,
    failures: &'a mut Vec<u32>,
    network: &'a mut Simulator,
}

impl Stack for NodeStack<'_> {
    fn deliver_to_application(&mut self, payload: Vec<u8>) {
        self.inbox.push(payload);
    }

    fn send_to_network(&mut self, packet: Packet) {
        self.network.transmit(self.now, self.side, &packet);
    }

    fn arm_timer(&mut self, ticks: u64, token: TimerToken) -> TimerHandle {
        self.timers.arm(ticks, token)
    }

    fn cancel_timer(&mut self, handle: TimerHandle) {
        self.timers.cancel(handle);
    }

    fn channel_failed(&mut self, seq: u32) {
        self.failures.push(seq);
    }
}

/// Two sessions joined by a simulated link.
#[derive(Debug)]
pub struct Harness {
    nodes: [Node; 2],
    network: Simulator,
    now: u64,
}

impl Harness {
    /// Build both endpoints with the same session configuration.
    pub fn new(config: SessionConfig, link: SimulatorConfig) -> Result<Self, HarnessError> {
        let node = |id| -> Result<Node, SessionError> {
            let mut session = Session::create(Some(EndpointId(id)), config.clone())?;
            session.init()?;
            Ok(Node {
                session,
                timers: TickTimers::new(),
                inbox: Vec::new(),
                failures: Vec::new(),
            })
        };

        Ok(Self {
            nodes: [node(0)?, node(1)?],
            network: Simulator::new(link)?,
            now: 0,
        })
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn session(&self, side: Side) -> &Session {
        &self.nodes[side.index()].session
    }

    /// Payloads delivered to the application at `side`, in delivery order.
    pub fn delivered(&self, side: Side) -> &[Vec<u8>] {
        &self.nodes[side.index()].inbox
    }

    /// Sequence numbers reported through `channel_failed` at `side`.
    pub fn failures(&self, side: Side) -> &[u32] {
        &self.nodes[side.index()].failures
    }

    pub fn trace(&self) -> &[TraceEvent] {
        self.network.trace()
    }

    pub fn network(&self) -> &Simulator {
        &self.network
    }

    /// Access to the link, e.g. to script faults.
    pub fn network_mut(&mut self) -> &mut Simulator {
        &mut self.network
    }

    /// Submit `payload` from the application at `side`.
    pub fn send(&mut self, side: Side, payload: &[u8]) -> Result<(), SessionError> {
        self.drive(side, |session, stack| session.on_app_send(stack, payload))
    }

    /// The application at `side` goes away.
    pub fn teardown(&mut self, side: Side) {
        self.drive(side, |session, stack| session.on_teardown(stack));
    }

    /// Advance one tick and process everything due at it.
    pub fn tick(&mut self) {
        self.now += 1;
        self.process();
    }

    /// `true` when neither session has anything outstanding or queued and no
    /// datagram is in flight.
    pub fn is_idle(&self) -> bool {
        self.network.is_empty() && self.nodes.iter().all(|n| n.session.is_idle())
    }

    /// Run until [`is_idle`](Self::is_idle), jumping from event to event.
    ///
    /// Gives up and returns `false` once the next event lies more than
    /// `max_ticks` past the starting tick, or when nothing is scheduled but
    /// the harness is still not idle.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> bool {
        let limit = self.now.saturating_add(max_ticks);
        loop {
            if self.is_idle() {
                debug!("[harness] idle at t={}", self.now);
                return true;
            }
            let Some(next) = self.next_event() else {
                return false;
            };
            if next > limit {
                info!("[harness] giving up at t={}: next event at t={next}", self.now);
                return false;
            }
            self.now = next.max(self.now + 1);
            self.process();
        }
    }

    /// Destroy both sessions.  Returns how many payloads were abandoned.
    pub fn shutdown(self) -> usize {
        let Self {
            nodes,
            mut network,
            now,
        } = self;

        let mut abandoned = 0;
        for (node, side) in nodes.into_iter().zip(Side::ALL) {
            let Node {
                session,
                mut timers,
                mut inbox,
                mut failures,
            } = node;
            let mut stack = NodeStack {
                side,
                now,
                timers: &mut timers,
                inbox: &mut inbox,
                failures: &mut failures,
                network: &mut network,
            };
            abandoned += session.destroy(&mut stack);
        }
        abandoned
    }

    fn next_event(&self) -> Option<u64> {
        let timers = self.nodes.iter().filter_map(|n| n.timers.next_deadline());
        self.network.next_due().into_iter().chain(timers).min()
    }

    fn process(&mut self) {
        let now = self.now;

        let mut fired = Vec::new();
        for side in Side::ALL {
            for (_, token) in self.nodes[side.index()].timers.advance(now) {
                fired.push((side, token));
            }
        }

        for (to, bytes) in self.network.due(now) {
            self.drive(to, |session, stack| session.on_network_datagram(stack, &bytes));
        }

        for (side, token) in fired {
            self.drive(side, |session, stack| session.on_timeout(stack, token));
        }
    }

    /// Run `f` against the session at `side` with a [`Stack`] wired to the
    /// rest of the harness.
    fn drive<R>(&mut self, side: Side, f: impl FnOnce(&mut Session, &mut NodeStack<'_>) -> R) -> R {
        let now = self.now;
        let Node {
            session,
            timers,
            inbox,
            failures,
        } = &mut self.nodes[side.index()];
        let mut stack = NodeStack {
            side,
            now,
            timers,
            inbox,
            failures,
            network: &mut self.network,
        };
        f(session, &mut stack)
    }
}
