//! vstream I/O
//!
//! Drivers for the protocol endpoints: a non-blocking UDP socket, a
//! real-time event loop, and a deterministic virtual-time simulation with
//! a lossy link for testing.

pub mod runtime;
pub mod sim;
pub mod socket;
pub mod time;

pub use runtime::{Runtime, RuntimeError, RuntimeStats};
pub use sim::{LinkConfig, LinkStats, Node, Simulation};
pub use socket::{SocketError, StreamSocket};
pub use time::{MonotonicClock, TimerQueue};
