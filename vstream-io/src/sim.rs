//! Virtual-time simulation
//!
//! Runs a streamer and a client against each other over a simulated link
//! with fixed latency, uniform jitter and random loss. Time only advances
//! to the next pending event, so minutes of streaming run in milliseconds
//! and a given seed always produces the same trace.

use crate::time::TimerQueue;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::SocketAddr;
use std::time::Duration;
use vstream_protocol::endpoint::{Context, Endpoint, ProtocolError, TimerHandle, TimerKind};

/// One direction of the simulated network
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConfig {
    /// One-way base delay
    pub latency: Duration,
    /// Extra delay drawn uniformly from `0..=jitter`; reorders datagrams
    pub jitter: Duration,
    /// Probability of losing each datagram (0.0 to 1.0)
    pub loss_rate: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            latency: Duration::from_millis(5),
            jitter: Duration::ZERO,
            loss_rate: 0.0,
        }
    }
}

/// Which side of the simulation an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Streamer,
    Client,
}

#[derive(Debug)]
enum Event {
    Timer { node: Node, kind: TimerKind },
    Deliver { to: Node, from: SocketAddr, datagram: Bytes },
}

/// Link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub sent: u64,
    pub lost: u64,
    pub delivered: u64,
    /// Datagrams addressed to neither endpoint
    pub misrouted: u64,
}

struct SimContext<'a> {
    now: Duration,
    node: Node,
    local: SocketAddr,
    streamer_addr: SocketAddr,
    client_addr: SocketAddr,
    events: &'a mut TimerQueue<Event>,
    link: &'a LinkConfig,
    rng: &'a mut StdRng,
    stats: &'a mut LinkStats,
}

impl Context for SimContext<'_> {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule_after(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle {
        self.events.schedule(
            self.now + delay,
            Event::Timer {
                node: self.node,
                kind,
            },
        )
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.events.cancel(handle);
    }

    fn send_datagram(&mut self, datagram: Bytes, dest: SocketAddr) {
        self.stats.sent += 1;

        let to = if dest == self.streamer_addr {
            Node::Streamer
        } else if dest == self.client_addr {
            Node::Client
        } else {
            self.stats.misrouted += 1;
            return;
        };

        if self.link.loss_rate > 0.0 && self.rng.gen::<f64>() < self.link.loss_rate {
            self.stats.lost += 1;
            return;
        }

        let jitter_us = self.link.jitter.as_micros() as u64;
        let jitter = if jitter_us > 0 {
            Duration::from_micros(self.rng.gen_range(0..=jitter_us))
        } else {
            Duration::ZERO
        };

        self.events.schedule(
            self.now + self.link.latency + jitter,
            Event::Deliver {
                to,
                from: self.local,
                datagram,
            },
        );
    }
}

/// A streamer and a client connected by a simulated link
pub struct Simulation<S, C> {
    streamer: S,
    client: C,
    streamer_addr: SocketAddr,
    client_addr: SocketAddr,
    link: LinkConfig,
    events: TimerQueue<Event>,
    rng: StdRng,
    now: Duration,
    started: bool,
    stats: LinkStats,
    errors: Vec<(Node, ProtocolError)>,
}

impl<S: Endpoint, C: Endpoint> Simulation<S, C> {
    /// Pair two endpoints
    ///
    /// Each endpoint must address the other by the address given here.
    pub fn new(
        streamer: S,
        streamer_addr: SocketAddr,
        client: C,
        client_addr: SocketAddr,
        link: LinkConfig,
        seed: u64,
    ) -> Self {
        Simulation {
            streamer,
            client,
            streamer_addr,
            client_addr,
            link,
            events: TimerQueue::new(),
            rng: StdRng::seed_from_u64(seed),
            now: Duration::ZERO,
            started: false,
            stats: LinkStats::default(),
            errors: Vec::new(),
        }
    }

    /// Start both endpoints at virtual time zero
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.with_endpoint(Node::Streamer, |ep, ctx| ep.start(ctx));
        self.with_endpoint(Node::Client, |ep, ctx| ep.start(ctx));
    }

    /// Process every event due up to and including `deadline`
    ///
    /// Stops early and returns the error if an endpoint reports a fatal
    /// one. Non-fatal errors are collected in [`Simulation::errors`].
    pub fn run_until(&mut self, deadline: Duration) -> Result<(), ProtocolError> {
        self.start();

        while let Some((at, _, event)) = self.events.pop_due(deadline) {
            self.now = at;
            let (node, result) = match event {
                Event::Timer { node, kind } => {
                    (node, self.with_endpoint(node, |ep, ctx| ep.on_tick(kind, ctx)))
                }
                Event::Deliver { to, from, datagram } => {
                    self.stats.delivered += 1;
                    let result =
                        self.with_endpoint(to, |ep, ctx| ep.on_datagram(&datagram, from, ctx));
                    (to, result)
                }
            };

            if let Err(e) = result {
                if e.is_fatal() {
                    return Err(e);
                }
                self.errors.push((node, e));
            }
        }

        self.now = self.now.max(deadline);
        Ok(())
    }

    /// Advance by `delta` from the current virtual time
    pub fn run_for(&mut self, delta: Duration) -> Result<(), ProtocolError> {
        self.run_until(self.now + delta)
    }

    /// Stop both endpoints, cancelling their timers
    pub fn stop(&mut self) {
        self.with_endpoint(Node::Streamer, |ep, ctx| ep.stop(ctx));
        self.with_endpoint(Node::Client, |ep, ctx| ep.stop(ctx));
    }

    fn with_endpoint<R, F>(&mut self, node: Node, f: F) -> R
    where
        F: FnOnce(&mut dyn Endpoint, &mut dyn Context) -> R,
    {
        let local = match node {
            Node::Streamer => self.streamer_addr,
            Node::Client => self.client_addr,
        };
        let mut ctx = SimContext {
            now: self.now,
            node,
            local,
            streamer_addr: self.streamer_addr,
            client_addr: self.client_addr,
            events: &mut self.events,
            link: &self.link,
            rng: &mut self.rng,
            stats: &mut self.stats,
        };
        match node {
            Node::Streamer => f(&mut self.streamer, &mut ctx),
            Node::Client => f(&mut self.client, &mut ctx),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn streamer(&self) -> &S {
        &self.streamer
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn streamer_mut(&mut self) -> &mut S {
        &mut self.streamer
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn link_stats(&self) -> LinkStats {
        self.stats
    }

    /// Non-fatal errors reported so far
    pub fn errors(&self) -> &[(Node, ProtocolError)] {
        &self.errors
    }

    /// Pending events, timers included
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }
}
