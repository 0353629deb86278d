//! Endpoint driver interface
//!
//! Both protocol roles are passive state machines. A driver (the real-time
//! runtime or the virtual-time simulation) owns the endpoint and feeds it
//! timer expiries and received datagrams one at a time; the endpoint reacts
//! through a [`Context`] that can schedule timers and send datagrams.
//! Callbacks for one endpoint never run concurrently.

use crate::packet::PacketError;
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Periodic activities an endpoint can schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Streamer pacing tick
    Transmit,
    /// Client prebuffer gate check
    Prebuffer,
    /// Client consumption clock
    Consume,
    /// Client frame admission scan
    Admission,
    /// Client retransmit request tick
    Request,
}

/// Identifies one scheduled timer so it can be cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn from_raw(raw: u64) -> Self {
        TimerHandle(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Side effects available to an endpoint while it handles an event
pub trait Context {
    /// Time elapsed since the driver started
    fn now(&self) -> Duration;

    /// Fire `timer` once after `delay`
    fn schedule_after(&mut self, delay: Duration, timer: TimerKind) -> TimerHandle;

    /// Cancel a pending timer; unknown or fired handles are ignored
    fn cancel(&mut self, handle: TimerHandle);

    /// Best-effort datagram send
    fn send_datagram(&mut self, datagram: Bytes, dest: SocketAddr);
}

/// A protocol role driven by timer and datagram events
pub trait Endpoint {
    /// Schedule the initial timers
    fn start(&mut self, ctx: &mut dyn Context);

    /// Cancel every outstanding timer
    fn stop(&mut self, ctx: &mut dyn Context);

    /// Handle the expiry of a timer scheduled through `ctx`
    fn on_tick(&mut self, timer: TimerKind, ctx: &mut dyn Context) -> Result<(), ProtocolError>;

    /// Handle a received datagram
    fn on_datagram(
        &mut self,
        datagram: &[u8],
        from: SocketAddr,
        ctx: &mut dyn Context,
    ) -> Result<(), ProtocolError>;
}

/// Endpoint errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Ready frame count went negative ({ready}) at frame {frame}")]
    NegativeReadyCount { frame: u32, ready: i64 },
}

impl ProtocolError {
    /// Whether the session cannot continue after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::NegativeReadyCount { .. })
    }
}

/// A timer recorded by [`ManualContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTimer {
    pub handle: TimerHandle,
    pub at: Duration,
    pub kind: TimerKind,
}

/// Context that records side effects instead of performing them
///
/// Lets endpoint logic be stepped by hand: schedule requests and sent
/// datagrams are collected for inspection and the clock only moves when
/// told to.
#[derive(Debug, Default)]
pub struct ManualContext {
    now: Duration,
    next_handle: u64,
    timers: Vec<ScheduledTimer>,
    sent: Vec<(Bytes, SocketAddr)>,
}

impl ManualContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the clock
    pub fn set_now(&mut self, now: Duration) {
        self.now = now;
    }

    /// Timers scheduled and not cancelled
    pub fn pending_timers(&self) -> &[ScheduledTimer] {
        &self.timers
    }

    /// Check if a timer of `kind` is pending
    pub fn has_pending(&self, kind: TimerKind) -> bool {
        self.timers.iter().any(|t| t.kind == kind)
    }

    /// Remove and return the pending timer of `kind` that fires first
    pub fn take_timer(&mut self, kind: TimerKind) -> Option<ScheduledTimer> {
        let idx = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.kind == kind)
            .min_by_key(|(_, t)| t.at)
            .map(|(idx, _)| idx)?;
        Some(self.timers.remove(idx))
    }

    /// Drain the datagrams sent so far
    pub fn take_sent(&mut self) -> Vec<(Bytes, SocketAddr)> {
        std::mem::take(&mut self.sent)
    }
}

impl Context for ManualContext {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule_after(&mut self, delay: Duration, timer: TimerKind) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        self.timers.push(ScheduledTimer {
            handle,
            at: self.now + delay,
            kind: timer,
        });
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.timers.retain(|t| t.handle != handle);
    }

    fn send_datagram(&mut self, datagram: Bytes, dest: SocketAddr) {
        self.sent.push((datagram, dest));
    }
}
