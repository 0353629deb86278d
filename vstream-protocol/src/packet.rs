//! Wire Headers and Packet Serialization
//!
//! Two packet kinds share one UDP socket:
//!
//! * data packets (streamer → client): a 12-byte [`DataHeader`] carrying the
//!   per-packet sequence number and a send timestamp, followed by payload;
//! * control packets (client → streamer): a fixed-size [`ControlHeader`]
//!   carrying the control state, the client's playout frame and up to
//!   [`RETRANSMIT_CAPACITY`] requested sequence numbers, followed by payload.
//!
//! Each endpoint only ever receives one of the two kinds, so there is no
//! discriminator on the wire. All fields are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Number of sequence-number slots in a control header
///
/// Both ends must agree on this value; there is no negotiation.
pub const RETRANSMIT_CAPACITY: usize = 100;

/// Size of the control header in bytes (state + frame index + slots)
pub const CONTROL_HEADER_SIZE: usize = 1 + 2 + 4 * RETRANSMIT_CAPACITY;

/// Size of the data header in bytes (sequence number + timestamp)
pub const DATA_HEADER_SIZE: usize = 4 + 8;

/// Control state carried in the first byte of a control header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlState {
    /// List of sequence numbers the client wants re-sent
    RetransmitRequest = 0,
    /// Playout buffer is full enough, stop sending
    Pause = 1,
    /// Playout buffer is draining, send again
    Resume = 2,
    /// No flow-control meaning; never emitted
    DataFlowNone = 0xFF,
}

impl ControlState {
    /// Decode a state byte. Unknown values map to [`ControlState::DataFlowNone`].
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ControlState::RetransmitRequest,
            1 => ControlState::Pause,
            2 => ControlState::Resume,
            _ => ControlState::DataFlowNone,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlState::RetransmitRequest => write!(f, "RETRANSMIT_REQUEST"),
            ControlState::Pause => write!(f, "PAUSE"),
            ControlState::Resume => write!(f, "RESUME"),
            ControlState::DataFlowNone => write!(f, "DATA_FLOW_NONE"),
        }
    }
}

/// Truncate a 32-bit frame index to its 16-bit wire form
#[inline]
pub fn wire_frame_index(frame: u32) -> u16 {
    (frame & 0xFFFF) as u16
}

/// Client → streamer control header
///
/// Layout: `state: u8 | frame_index: u16 | requests: [u32; RETRANSMIT_CAPACITY]`.
/// Unused request slots are zero.
///
/// Sequence number 0 is a legitimate request, so zero alone cannot mark the
/// end of the list. Request lists are always sent sorted ascending and
/// without duplicates, and an empty request is never sent, so a zero can
/// only be meaningful in slot 0. Decoding a retransmit request therefore
/// always keeps slot 0 and stops at the first zero after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlHeader {
    /// What this control packet asks for
    pub state: ControlState,
    /// Client playout frame at emission time (low 16 bits)
    pub frame_index: u16,
    /// Requested sequence numbers (retransmit requests only)
    pub requests: Vec<u32>,
}

impl ControlHeader {
    /// Create a pause signal
    pub fn pause(frame_index: u16) -> Self {
        ControlHeader {
            state: ControlState::Pause,
            frame_index,
            requests: Vec::new(),
        }
    }

    /// Create a resume signal
    pub fn resume(frame_index: u16) -> Self {
        ControlHeader {
            state: ControlState::Resume,
            frame_index,
            requests: Vec::new(),
        }
    }

    /// Create a retransmit request
    ///
    /// The list is sorted and de-duplicated so a zero can only sit in slot
    /// 0, then cut to the [`RETRANSMIT_CAPACITY`] lowest entries. An empty
    /// list would decode as a request for sequence 0 and is rejected.
    pub fn retransmit_request(
        frame_index: u16,
        mut requests: Vec<u32>,
    ) -> Result<Self, PacketError> {
        if requests.is_empty() {
            return Err(PacketError::EmptyRequest);
        }
        requests.sort_unstable();
        requests.dedup();
        requests.truncate(RETRANSMIT_CAPACITY);
        Ok(ControlHeader {
            state: ControlState::RetransmitRequest,
            frame_index,
            requests,
        })
    }

    /// Parse header from bytes (network byte order)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < CONTROL_HEADER_SIZE {
            return Err(PacketError::InsufficientData {
                expected: CONTROL_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..CONTROL_HEADER_SIZE];
        let state = ControlState::from_u8(buf.get_u8());
        let frame_index = buf.get_u16();

        let mut requests = Vec::new();
        if state == ControlState::RetransmitRequest {
            requests.push(buf.get_u32());
            while buf.remaining() >= 4 {
                let seq = buf.get_u32();
                if seq == 0 {
                    break;
                }
                requests.push(seq);
            }
        }

        Ok(ControlHeader {
            state,
            frame_index,
            requests,
        })
    }

    /// Serialize header to bytes (network byte order)
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u8(self.state.as_u8());
        buf.put_u16(self.frame_index);

        let used = self.requests.len().min(RETRANSMIT_CAPACITY);
        for &seq in &self.requests[..used] {
            buf.put_u32(seq);
        }
        for _ in used..RETRANSMIT_CAPACITY {
            buf.put_u32(0);
        }
    }
}

/// Streamer → client per-packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// Monotonic sequence number (reused verbatim on retransmission)
    pub seq: u32,
    /// Send time in microseconds since the streamer started
    pub timestamp_us: u64,
}

impl DataHeader {
    pub fn new(seq: u32, timestamp_us: u64) -> Self {
        DataHeader { seq, timestamp_us }
    }

    /// Frame this packet belongs to
    #[inline]
    pub fn frame_index(&self, packets_per_frame: u32) -> u32 {
        self.seq / packets_per_frame
    }

    /// Position of this packet inside its frame
    #[inline]
    pub fn frame_slot(&self, packets_per_frame: u32) -> u32 {
        self.seq % packets_per_frame
    }

    /// Parse header from bytes (network byte order)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < DATA_HEADER_SIZE {
            return Err(PacketError::InsufficientData {
                expected: DATA_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..DATA_HEADER_SIZE];
        Ok(DataHeader {
            seq: buf.get_u32(),
            timestamp_us: buf.get_u64(),
        })
    }

    /// Serialize header to bytes (network byte order)
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u32(self.seq);
        buf.put_u64(self.timestamp_us);
    }
}

/// Data packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Packet header
    pub header: DataHeader,
    /// Payload data
    pub payload: Bytes,
}

impl DataPacket {
    /// Create a new data packet
    pub fn new(seq: u32, timestamp_us: u64, payload: Bytes) -> Self {
        DataPacket {
            header: DataHeader::new(seq, timestamp_us),
            payload,
        }
    }

    /// Get the sequence number
    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    /// Total size of the packet (header + payload)
    pub fn size(&self) -> usize {
        DATA_HEADER_SIZE + self.payload.len()
    }

    /// Serialize the packet to bytes
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.to_bytes(&mut buf);
        buf.put_slice(&self.payload);
        buf
    }

    /// Parse a data packet from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let header = DataHeader::from_bytes(bytes)?;
        let payload = Bytes::copy_from_slice(&bytes[DATA_HEADER_SIZE..]);
        Ok(DataPacket { header, payload })
    }
}

/// Control packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    /// Packet header
    pub header: ControlHeader,
    /// Padding payload
    pub payload: Bytes,
}

impl ControlPacket {
    /// Create a new control packet
    pub fn new(header: ControlHeader, payload: Bytes) -> Self {
        ControlPacket { header, payload }
    }

    /// Get the control state
    pub fn state(&self) -> ControlState {
        self.header.state
    }

    /// Total size of the packet (header + payload)
    pub fn size(&self) -> usize {
        CONTROL_HEADER_SIZE + self.payload.len()
    }

    /// Serialize the packet to bytes
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.to_bytes(&mut buf);
        buf.put_slice(&self.payload);
        buf
    }

    /// Parse a control packet from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let header = ControlHeader::from_bytes(bytes)?;
        let payload = Bytes::copy_from_slice(&bytes[CONTROL_HEADER_SIZE..]);
        Ok(ControlPacket { header, payload })
    }
}

/// Packet parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Retransmit request with no sequence numbers")]
    EmptyRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_header_size() {
        let header = ControlHeader::pause(7);
        let mut buf = BytesMut::new();
        header.to_bytes(&mut buf);
        assert_eq!(buf.len(), CONTROL_HEADER_SIZE);
        assert_eq!(CONTROL_HEADER_SIZE, 403);
    }

    #[test]
    fn test_control_header_layout() {
        let header = ControlHeader::retransmit_request(0x0102, vec![0x0A0B0C0D, 5]).unwrap();
        let mut buf = BytesMut::new();
        header.to_bytes(&mut buf);

        assert_eq!(buf[0], 0);
        assert_eq!(&buf[1..3], &[0x01, 0x02]);
        assert_eq!(&buf[3..7], &[0, 0, 0, 5]);
        assert_eq!(&buf[7..11], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert!(buf[11..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pause_resume_roundtrip() {
        for header in [ControlHeader::pause(42), ControlHeader::resume(65535)] {
            let mut buf = BytesMut::new();
            header.to_bytes(&mut buf);
            assert_eq!(ControlHeader::from_bytes(&buf).unwrap(), header);
        }
    }

    #[test]
    fn test_request_with_sequence_zero() {
        let header = ControlHeader::retransmit_request(0, vec![0, 1, 2]).unwrap();
        let mut buf = BytesMut::new();
        header.to_bytes(&mut buf);

        let decoded = ControlHeader::from_bytes(&buf).unwrap();
        assert_eq!(decoded.requests, vec![0, 1, 2]);
    }

    #[test]
    fn test_request_list_normalized() {
        let header = ControlHeader::retransmit_request(4, vec![7, 0, 5, 7, 5]).unwrap();
        assert_eq!(header.requests, vec![0, 5, 7]);

        let mut buf = BytesMut::new();
        header.to_bytes(&mut buf);
        assert_eq!(ControlHeader::from_bytes(&buf).unwrap(), header);
    }

    #[test]
    fn test_empty_request_rejected() {
        assert_eq!(
            ControlHeader::retransmit_request(4, Vec::new()),
            Err(PacketError::EmptyRequest)
        );
    }

    #[test]
    fn test_request_truncated_to_capacity() {
        let requests: Vec<u32> = (1..=250).rev().collect();
        let header = ControlHeader::retransmit_request(3, requests).unwrap();
        assert_eq!(header.requests.len(), RETRANSMIT_CAPACITY);

        let mut buf = BytesMut::new();
        header.to_bytes(&mut buf);
        let decoded = ControlHeader::from_bytes(&buf).unwrap();
        assert_eq!(decoded.requests.len(), RETRANSMIT_CAPACITY);
        assert_eq!(decoded.requests[99], 100);
    }

    #[test]
    fn test_unknown_state_decodes_as_none() {
        let mut bytes = vec![0u8; CONTROL_HEADER_SIZE];
        bytes[0] = 9;
        let decoded = ControlHeader::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.state, ControlState::DataFlowNone);
        assert!(decoded.requests.is_empty());
    }

    #[test]
    fn test_short_control_header() {
        let err = ControlHeader::from_bytes(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            PacketError::InsufficientData {
                expected: CONTROL_HEADER_SIZE,
                actual: 10
            }
        );
    }

    #[test]
    fn test_data_packet_serialization() {
        let payload = Bytes::from_static(b"frame bytes");
        let packet = DataPacket::new(1234, 5_000_000, payload.clone());
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), DATA_HEADER_SIZE + payload.len());

        let decoded = DataPacket::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.seq(), 1234);
        assert_eq!(decoded.header.timestamp_us, 5_000_000);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_data_header_frame_position() {
        let header = DataHeader::new(1234, 0);
        assert_eq!(header.frame_index(100), 12);
        assert_eq!(header.frame_slot(100), 34);
    }

    #[test]
    fn test_control_packet_with_payload() {
        let packet = ControlPacket::new(ControlHeader::resume(9), Bytes::from(vec![0u8; 100]));
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), CONTROL_HEADER_SIZE + 100);

        let decoded = ControlPacket::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.state(), ControlState::Resume);
        assert_eq!(decoded.header.frame_index, 9);
        assert_eq!(decoded.payload.len(), 100);
    }

    #[test]
    fn test_wire_frame_index() {
        assert_eq!(wire_frame_index(5), 5);
        assert_eq!(wire_frame_index(65_536 + 5), 5);
    }
}
