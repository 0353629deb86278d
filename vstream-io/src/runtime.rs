//! Real-time endpoint driver
//!
//! Runs one [`Endpoint`] on the calling thread over a non-blocking
//! [`StreamSocket`]. Each pass fires every due timer, then drains the
//! socket, then sleeps on the shutdown channel until the next deadline.
//! The endpoint sits behind `Arc<Mutex<_>>` so a reporter thread can read
//! its statistics between passes.

use crate::socket::{SocketError, StreamSocket};
use crate::time::{MonotonicClock, TimerQueue};
use bytes::Bytes;
use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use vstream_protocol::endpoint::{Context, Endpoint, ProtocolError, TimerHandle, TimerKind};

/// Largest datagram the runtime will read
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Runtime errors
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Transport counters kept by the runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    /// Sends that failed or would have blocked
    pub send_failures: u64,
    pub timers_fired: u64,
}

struct IoContext<'a> {
    now: Duration,
    timers: &'a mut TimerQueue<TimerKind>,
    socket: &'a StreamSocket,
    stats: &'a mut RuntimeStats,
}

impl Context for IoContext<'_> {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule_after(&mut self, delay: Duration, timer: TimerKind) -> TimerHandle {
        self.timers.schedule(self.now + delay, timer)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.timers.cancel(handle);
    }

    fn send_datagram(&mut self, datagram: Bytes, dest: SocketAddr) {
        match self.socket.try_send_to(&datagram, dest) {
            Ok(true) => self.stats.datagrams_sent += 1,
            Ok(false) => {
                self.stats.send_failures += 1;
                tracing::trace!(%dest, "send would block, datagram dropped");
            }
            Err(e) => {
                self.stats.send_failures += 1;
                tracing::warn!(%dest, error = %e, "send failed");
            }
        }
    }
}

/// Drives one endpoint in real time
pub struct Runtime<E> {
    endpoint: Arc<Mutex<E>>,
    socket: StreamSocket,
    timers: TimerQueue<TimerKind>,
    clock: MonotonicClock,
    shutdown: Receiver<()>,
    stats: RuntimeStats,
    max_idle: Duration,
    recv_buf: Vec<u8>,
}

impl<E: Endpoint> Runtime<E> {
    /// Create a runtime; sending on (or dropping) the other end of
    /// `shutdown` stops [`Runtime::run`]
    pub fn new(endpoint: E, socket: StreamSocket, shutdown: Receiver<()>) -> Self {
        Runtime {
            endpoint: Arc::new(Mutex::new(endpoint)),
            socket,
            timers: TimerQueue::new(),
            clock: MonotonicClock::new(),
            shutdown,
            stats: RuntimeStats::default(),
            max_idle: Duration::from_millis(1),
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Cap on how long a pass sleeps waiting for the next deadline, which
    /// also bounds receive latency
    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Shared handle to the endpoint
    pub fn endpoint(&self) -> Arc<Mutex<E>> {
        Arc::clone(&self.endpoint)
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.socket.local_addr()
    }

    /// Run until shutdown is signalled or the endpoint hits a fatal error
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        {
            let mut endpoint = self.endpoint.lock();
            let mut ctx = IoContext {
                now: self.clock.now(),
                timers: &mut self.timers,
                socket: &self.socket,
                stats: &mut self.stats,
            };
            endpoint.start(&mut ctx);
        }

        let result = self.event_loop();

        let mut endpoint = self.endpoint.lock();
        let mut ctx = IoContext {
            now: self.clock.now(),
            timers: &mut self.timers,
            socket: &self.socket,
            stats: &mut self.stats,
        };
        endpoint.stop(&mut ctx);
        result
    }

    fn event_loop(&mut self) -> Result<(), RuntimeError> {
        loop {
            match self.shutdown.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => {
                    tracing::info!("shutdown requested");
                    return Ok(());
                }
                Err(TryRecvError::Empty) => {}
            }

            self.run_once()?;

            let wait = self
                .timers
                .next_deadline()
                .map(|at| self.clock.until(at))
                .unwrap_or(self.max_idle)
                .min(self.max_idle);
            if wait.is_zero() {
                continue;
            }
            match self.shutdown.recv_timeout(wait) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!("shutdown requested");
                    return Ok(());
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    /// Fire due timers and drain the socket once
    ///
    /// Non-fatal protocol errors are dropped here; the endpoint has
    /// already logged and counted them.
    pub fn run_once(&mut self) -> Result<(), RuntimeError> {
        let mut endpoint = self.endpoint.lock();

        let now = self.clock.now();
        while let Some((_, _, kind)) = self.timers.pop_due(now) {
            self.stats.timers_fired += 1;
            let mut ctx = IoContext {
                now,
                timers: &mut self.timers,
                socket: &self.socket,
                stats: &mut self.stats,
            };
            if let Err(e) = endpoint.on_tick(kind, &mut ctx) {
                if e.is_fatal() {
                    return Err(e.into());
                }
            }
        }

        while let Some((len, from)) = self.socket.try_recv_from(&mut self.recv_buf)? {
            self.stats.datagrams_received += 1;
            let mut ctx = IoContext {
                now: self.clock.now(),
                timers: &mut self.timers,
                socket: &self.socket,
                stats: &mut self.stats,
            };
            if let Err(e) = endpoint.on_datagram(&self.recv_buf[..len], from, &mut ctx) {
                if e.is_fatal() {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::thread;
    use vstream_protocol::{Client, ClientConfig, Streamer, StreamerConfig};

    fn bind() -> StreamSocket {
        StreamSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap()
    }

    #[test]
    fn test_shutdown_stops_run() {
        let socket = bind();
        let sink = bind();
        let peer = sink.local_addr().unwrap();
        let streamer = Streamer::new(StreamerConfig::default(), peer).unwrap();
        let (tx, rx) = channel::bounded(1);

        let handle = thread::spawn(move || {
            let mut runtime = Runtime::new(streamer, socket, rx);
            runtime.run().map(|_| runtime.stats())
        });
        thread::sleep(Duration::from_millis(50));
        tx.send(()).unwrap();

        let stats = handle.join().unwrap().unwrap();
        assert!(stats.timers_fired >= 1);
        assert!(stats.datagrams_sent >= 100);
    }

    #[test]
    fn test_streamer_to_client_over_loopback() {
        let streamer_socket = bind();
        let client_socket = bind();
        let streamer_addr = streamer_socket.local_addr().unwrap();
        let client_addr = client_socket.local_addr().unwrap();

        let config = StreamerConfig {
            packets_per_frame: 10,
            ..StreamerConfig::default()
        };
        let streamer = Streamer::new(config, client_addr).unwrap();
        let client_config = ClientConfig {
            packets_per_frame: 10,
            consume_start_delay: Duration::from_millis(50),
            ..ClientConfig::default()
        };
        let client = Client::new(client_config, streamer_addr).unwrap();

        let (stop_tx, stop_rx) = channel::unbounded();
        let mut streamer_rt = Runtime::new(streamer, streamer_socket, stop_rx.clone());
        let mut client_rt = Runtime::new(client, client_socket, stop_rx);
        let client_handle = client_rt.endpoint();

        let threads = vec![
            thread::spawn(move || streamer_rt.run()),
            thread::spawn(move || client_rt.run()),
        ];
        thread::sleep(Duration::from_millis(300));
        drop(stop_tx);
        for t in threads {
            t.join().unwrap().unwrap();
        }

        let client = client_handle.lock();
        assert!(client.stats().packets_received > 0);
        assert!(client.stats().frames_admitted > 0);
    }
}
