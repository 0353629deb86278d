//! vstream protocol core
//!
//! Frame-paced streaming over an unreliable datagram transport: wire
//! headers, gap detection, frame reassembly, the playout buffer with
//! PAUSE/RESUME flow control, retransmission, and the two endpoint state
//! machines that tie them together. Nothing here touches a socket or a
//! clock; drivers implement [`Context`] and feed events to an
//! [`Endpoint`].

pub mod client;
pub mod config;
pub mod endpoint;
pub mod frame;
pub mod loss;
pub mod packet;
pub mod playout;
pub mod retransmit;
pub mod sequence;
pub mod streamer;

pub use client::{Client, ClientStats};
pub use config::{AdmissionPolicy, ClientConfig, ConfigError, LossConfig, StreamerConfig};
pub use endpoint::{Context, Endpoint, ManualContext, ProtocolError, TimerHandle, TimerKind};
pub use frame::{Admission, FrameBitmap, FrameTracker, ScanReport};
pub use loss::LossSimulator;
pub use packet::{
    ControlHeader, ControlPacket, ControlState, DataHeader, DataPacket, PacketError,
    CONTROL_HEADER_SIZE, DATA_HEADER_SIZE, RETRANSMIT_CAPACITY,
};
pub use playout::{ConsumeOutcome, FlowController, PlayoutBuffer, PlayoutPhase};
pub use retransmit::{build_request, widen_frame_index, RetransmitQueue};
pub use sequence::{Arrival, GapRange, SequenceTracker, MAX_SEQ};
pub use streamer::{Streamer, StreamerStats};
