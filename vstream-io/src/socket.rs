//! Non-blocking UDP socket
//!
//! Both endpoints share one socket per process: the streamer sends data
//! and receives control packets on it, the client the other way round.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use thiserror::Error;

/// Default kernel buffer size requested for both directions
pub const DEFAULT_SOCKET_BUFFER: usize = 4 * 1024 * 1024;

/// Socket errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Socket has no inet address")]
    InvalidAddress,
}

/// UDP socket configured for streaming
///
/// socket2 is used for setup (address reuse, buffer sizes); the bound
/// socket is then held as a std `UdpSocket` for I/O.
#[derive(Debug)]
pub struct StreamSocket {
    inner: UdpSocket,
}

impl StreamSocket {
    /// Bind a non-blocking socket to `addr`
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;

        Ok(StreamSocket {
            inner: socket.into(),
        })
    }

    /// Bind and request larger kernel buffers
    ///
    /// The OS may clamp the sizes; a refusal is logged, not fatal.
    pub fn bind_with_buffers(addr: SocketAddr, buffer_size: usize) -> Result<Self, SocketError> {
        let socket = Self::bind(addr)?;
        let raw = socket2::SockRef::from(&socket.inner);
        if let Err(e) = raw.set_send_buffer_size(buffer_size) {
            tracing::warn!(error = %e, "could not set send buffer size");
        }
        if let Err(e) = raw.set_recv_buffer_size(buffer_size) {
            tracing::warn!(error = %e, "could not set receive buffer size");
        }
        Ok(socket)
    }

    /// Local address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }

    /// Kernel send buffer size
    pub fn send_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(socket2::SockRef::from(&self.inner).send_buffer_size()?)
    }

    /// Kernel receive buffer size
    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(socket2::SockRef::from(&self.inner).recv_buffer_size()?)
    }

    /// Send one datagram
    ///
    /// Returns `Ok(false)` if the socket would block; the datagram is then
    /// lost, which the protocol tolerates.
    pub fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> Result<bool, SocketError> {
        match self.inner.send_to(buf, target) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(SocketError::Io(e)),
        }
    }

    /// Receive one datagram if any is waiting
    pub fn try_recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        match self.inner.recv_from(buf) {
            Ok((n, from)) => Ok(Some((n, from))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            // ICMP port unreachable from an earlier send surfaces here on
            // some platforms
            Err(e) if e.kind() == ErrorKind::ConnectionReset => Ok(None),
            Err(e) => Err(SocketError::Io(e)),
        }
    }

    pub fn try_clone(&self) -> Result<Self, SocketError> {
        Ok(StreamSocket {
            inner: self.inner.try_clone()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_bind_ephemeral() {
        let socket = StreamSocket::bind(localhost()).unwrap();
        assert!(socket.local_addr().unwrap().port() > 0);
    }

    #[test]
    fn test_buffer_sizes() {
        let socket = StreamSocket::bind_with_buffers(localhost(), 262_144).unwrap();
        assert!(socket.send_buffer_size().unwrap() > 0);
        assert!(socket.recv_buffer_size().unwrap() > 0);
    }

    #[test]
    fn test_empty_recv_does_not_block() {
        let socket = StreamSocket::bind(localhost()).unwrap();
        let mut buf = [0u8; 64];
        assert!(socket.try_recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_send_recv() {
        let sender = StreamSocket::bind(localhost()).unwrap();
        let receiver = StreamSocket::bind(localhost()).unwrap();
        let target = receiver.local_addr().unwrap();

        assert!(sender.try_send_to(b"frame", target).unwrap());

        let mut buf = [0u8; 64];
        for _ in 0..50 {
            if let Some((n, from)) = receiver.try_recv_from(&mut buf).unwrap() {
                assert_eq!(&buf[..n], b"frame");
                assert_eq!(from, sender.local_addr().unwrap());
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("datagram not received");
    }
}
