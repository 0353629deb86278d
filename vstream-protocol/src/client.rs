//! Streaming client (receiver)
//!
//! Reassembles frames from data packets, plays them out at a fixed rate,
//! asks for missing packets and tells the streamer when to pause and
//! resume. Four timers drive it:
//!
//! | Timer       | Default period | Work                                   |
//! |-------------|----------------|----------------------------------------|
//! | `Prebuffer` | 1/60 s         | wait for enough ready frames           |
//! | `Consume`   | 1/60 s         | play one frame, emit PAUSE/RESUME      |
//! | `Admission` | 1/120 s        | promote complete frames, prune stale   |
//! | `Request`   | 1/120 s        | send the earliest pending gaps         |

use crate::config::{AdmissionPolicy, ClientConfig, ConfigError};
use crate::endpoint::{Context, Endpoint, ProtocolError, TimerHandle, TimerKind};
use crate::frame::{Admission, FrameTracker, ScanReport, SlotUpdate};
use crate::loss::LossSimulator;
use crate::packet::{wire_frame_index, ControlHeader, ControlPacket, ControlState, DataHeader};
use crate::playout::{ConsumeOutcome, FlowController, PlayoutBuffer, PlayoutPhase};
use crate::retransmit::build_request;
use crate::sequence::{Arrival, SequenceTracker};
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Client statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Data packets accepted for processing
    pub packets_received: u64,
    /// Data packets discarded by simulated loss
    pub packets_dropped_loss: u64,
    /// Data packets discarded because too many frames were open
    pub packets_dropped_overflow: u64,
    /// Datagrams too short to parse
    pub packets_malformed: u64,
    /// Sequence numbers recorded as gaps
    pub gaps_detected: u64,
    /// Gaps filled by a later arrival
    pub gaps_recovered: u64,
    /// Arrivals behind the cursor that filled no gap
    pub stale_arrivals: u64,
    /// Packets for frames already behind the playout pointer
    pub late_packets: u64,
    /// Packets whose frame slot was already filled
    pub duplicate_slots: u64,
    /// Retransmit requests sent
    pub requests_sent: u64,
    /// Frames moved into the playout buffer
    pub frames_admitted: u64,
    /// Complete frames left open because the buffer was full
    pub frames_deferred: u64,
    /// Complete frames discarded because the buffer was full
    pub frames_dropped: u64,
    /// Incomplete frames passed by the playout pointer
    pub frames_stale: u64,
    /// Frames played
    pub frames_played: u64,
    /// Ticks with no frame to play
    pub underruns: u64,
    /// Ticks with nothing due while the buffer was saturated
    pub idle_ticks: u64,
    /// PAUSE signals sent
    pub pauses_sent: u64,
    /// RESUME signals sent
    pub resumes_sent: u64,
    /// Bytes of control packets sent
    pub bytes_sent: u64,
    /// Bytes of data packets received
    pub bytes_received: u64,
}

/// Streaming client endpoint
pub struct Client {
    config: ClientConfig,
    peer: SocketAddr,
    sequence: SequenceTracker,
    frames: FrameTracker,
    playout: PlayoutBuffer,
    flow: FlowController,
    phase: PlayoutPhase,
    timers: HashMap<TimerKind, TimerHandle>,
    loss: Option<LossSimulator>,
    payload: Bytes,
    stats: ClientStats,
}

impl Client {
    /// Create a client that sends control packets to `peer`
    pub fn new(config: ClientConfig, peer: SocketAddr) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Client {
            sequence: SequenceTracker::new(),
            frames: FrameTracker::new(config.packets_per_frame),
            playout: PlayoutBuffer::new(config.buffer_size),
            flow: FlowController::new(
                config.pause_threshold,
                config.resume_threshold,
                config.repeat_flow_signals,
            ),
            phase: PlayoutPhase::Idle,
            timers: HashMap::new(),
            loss: LossSimulator::from_config(&config.loss),
            payload: Bytes::from(vec![0u8; config.payload_size]),
            stats: ClientStats::default(),
            config,
            peer,
        })
    }

    /// First sequence number still useful to playout
    fn seq_floor(&self) -> u32 {
        self.playout
            .frame_index()
            .saturating_mul(self.config.packets_per_frame)
    }

    /// Apply one data packet header to the trackers
    ///
    /// Returns false if the packet was discarded because too many frames
    /// are already open or its sequence number is out of range.
    pub fn handle_data(&mut self, header: &DataHeader) -> bool {
        let frame = header.frame_index(self.config.packets_per_frame);
        let at_limit = self.frames.open_frames() >= self.config.open_frame_limit();
        if at_limit && !self.frames.is_open(frame) {
            self.stats.packets_dropped_overflow += 1;
            tracing::warn!(
                seq = header.seq,
                open = self.frames.open_frames(),
                "too many open frames, dropping packet"
            );
            return false;
        }
        self.stats.packets_received += 1;

        match self.sequence.on_packet(header.seq, self.seq_floor()) {
            Arrival::InOrder => {}
            Arrival::Gap { missing } => {
                self.stats.gaps_detected += missing as u64;
                tracing::debug!(seq = header.seq, missing, "gap detected");
            }
            Arrival::Recovered => {
                self.stats.gaps_recovered += 1;
                tracing::debug!(seq = header.seq, "gap filled");
            }
            Arrival::Stale => self.stats.stale_arrivals += 1,
            Arrival::OutOfRange => {
                self.stats.packets_malformed += 1;
                tracing::warn!(seq = header.seq, "sequence number out of range, dropping packet");
                return false;
            }
        }

        match self.frames.record(header.seq, self.playout.frame_index()) {
            SlotUpdate::Marked => {}
            SlotUpdate::Duplicate => self.stats.duplicate_slots += 1,
            SlotUpdate::Late => self.stats.late_packets += 1,
        }
        true
    }

    /// Resolve open frames against the playout pointer
    pub fn admission_scan(&mut self) -> ScanReport {
        let playout = &mut self.playout;
        let policy = self.config.admission_policy;

        let report = self
            .frames
            .scan(playout.frame_index(), |frame| {
                if playout.admit(frame) {
                    Admission::Admitted
                } else {
                    match policy {
                        AdmissionPolicy::Drop => Admission::Dropped,
                        AdmissionPolicy::Defer => Admission::Deferred,
                    }
                }
            });

        self.stats.frames_admitted += report.admitted as u64;
        self.stats.frames_dropped += report.dropped as u64;
        self.stats.frames_deferred += report.deferred as u64;
        self.stats.frames_stale += report.stale as u64;
        if report.dropped > 0 {
            tracing::debug!(dropped = report.dropped, "playout buffer full, frames dropped");
        }
        report
    }

    /// Next retransmit request, if any gaps are pending
    pub fn retransmit_request(&mut self) -> Option<ControlHeader> {
        build_request(
            &mut self.sequence,
            self.playout.frame_index(),
            self.config.packets_per_frame,
        )
    }

    /// Run one consumption tick
    ///
    /// Returns what happened to the frame under the pointer and the flow
    /// control signal to send, if any. On a ready-count violation the client
    /// halts.
    pub fn consume(&mut self) -> Result<(ConsumeOutcome, Option<ControlHeader>), ProtocolError> {
        let outcome = match self.playout.consume(self.config.pause_threshold) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "playout invariant violated, halting consumption");
                self.phase = PlayoutPhase::Halted;
                return Err(err);
            }
        };

        match outcome {
            ConsumeOutcome::Played(_) => self.stats.frames_played += 1,
            ConsumeOutcome::Underrun(frame) => {
                self.stats.underruns += 1;
                tracing::debug!(frame, "playout underrun");
            }
            ConsumeOutcome::Idle(_) => self.stats.idle_ticks += 1,
        }

        let frame = wire_frame_index(self.playout.frame_index());
        let signal = self
            .flow
            .evaluate(self.playout.ready_count())
            .map(|state| match state {
                ControlState::Pause => ControlHeader::pause(frame),
                _ => ControlHeader::resume(frame),
            });

        Ok((outcome, signal))
    }

    fn send_control(&mut self, header: ControlHeader, ctx: &mut dyn Context) {
        match header.state {
            ControlState::Pause => self.stats.pauses_sent += 1,
            ControlState::Resume => self.stats.resumes_sent += 1,
            ControlState::RetransmitRequest => self.stats.requests_sent += 1,
            ControlState::DataFlowNone => {}
        }

        let datagram = ControlPacket::new(header, self.payload.clone())
            .to_bytes()
            .freeze();
        self.stats.bytes_sent += datagram.len() as u64;
        ctx.send_datagram(datagram, self.peer);
    }

    fn schedule(&mut self, ctx: &mut dyn Context, kind: TimerKind, delay: Duration) {
        let handle = ctx.schedule_after(delay, kind);
        self.timers.insert(kind, handle);
    }

    fn on_prebuffer(&mut self, ctx: &mut dyn Context) {
        let ready = self.playout.ready_count();
        if ready >= self.config.prebuffer_threshold as i64 {
            tracing::info!(ready, "prebuffer satisfied, starting playout");
            self.phase = PlayoutPhase::Playing;
            self.schedule(ctx, TimerKind::Consume, Duration::ZERO);
        } else {
            self.schedule(ctx, TimerKind::Prebuffer, self.config.consume_interval);
        }
    }

    fn on_consume(&mut self, ctx: &mut dyn Context) -> Result<(), ProtocolError> {
        let (_, signal) = self.consume()?;

        if let Some(header) = signal {
            tracing::trace!(state = %header.state, frame = header.frame_index, "flow signal");
            self.send_control(header, ctx);
        }
        self.schedule(ctx, TimerKind::Consume, self.config.consume_interval);
        Ok(())
    }

    /// Current playout phase
    pub fn phase(&self) -> PlayoutPhase {
        self.phase
    }

    /// Frame index the consumption pointer is on
    pub fn playout_frame(&self) -> u32 {
        self.playout.frame_index()
    }

    /// Ready frame count
    pub fn ready_count(&self) -> i64 {
        self.playout.ready_count()
    }

    /// Gap tracking state
    pub fn sequence(&self) -> &SequenceTracker {
        &self.sequence
    }

    /// Open frame trackers
    pub fn frames(&self) -> &FrameTracker {
        &self.frames
    }

    /// Playout buffer
    pub fn playout(&self) -> &PlayoutBuffer {
        &self.playout
    }

    /// Client statistics
    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// Active configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Streamer address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Endpoint for Client {
    fn start(&mut self, ctx: &mut dyn Context) {
        tracing::info!(peer = %self.peer, "client starting");
        self.phase = PlayoutPhase::Prebuffering;
        self.schedule(ctx, TimerKind::Admission, Duration::ZERO);
        self.schedule(ctx, TimerKind::Request, Duration::ZERO);
        self.schedule(ctx, TimerKind::Prebuffer, self.config.consume_start_delay);
    }

    fn stop(&mut self, ctx: &mut dyn Context) {
        for (_, handle) in self.timers.drain() {
            ctx.cancel(handle);
        }
        self.phase = PlayoutPhase::Stopped;
        tracing::info!(
            played = self.stats.frames_played,
            underruns = self.stats.underruns,
            "client stopped"
        );
    }

    fn on_tick(&mut self, timer: TimerKind, ctx: &mut dyn Context) -> Result<(), ProtocolError> {
        self.timers.remove(&timer);
        if self.phase == PlayoutPhase::Stopped {
            return Ok(());
        }

        match timer {
            TimerKind::Prebuffer => self.on_prebuffer(ctx),
            TimerKind::Consume => {
                if self.phase == PlayoutPhase::Playing {
                    self.on_consume(ctx)?;
                }
            }
            TimerKind::Admission => {
                self.admission_scan();
                self.schedule(ctx, TimerKind::Admission, self.config.admission_interval);
            }
            TimerKind::Request => {
                if let Some(header) = self.retransmit_request() {
                    tracing::debug!(
                        first = header.requests[0],
                        count = header.requests.len(),
                        "requesting retransmission"
                    );
                    self.send_control(header, ctx);
                }
                self.schedule(ctx, TimerKind::Request, self.config.request_interval);
            }
            TimerKind::Transmit => {
                tracing::debug!("client ignoring transmit timer");
            }
        }
        Ok(())
    }

    fn on_datagram(
        &mut self,
        datagram: &[u8],
        from: SocketAddr,
        _ctx: &mut dyn Context,
    ) -> Result<(), ProtocolError> {
        if self.phase == PlayoutPhase::Stopped {
            return Ok(());
        }
        if let Some(loss) = self.loss.as_mut() {
            if loss.should_drop() {
                self.stats.packets_dropped_loss += 1;
                return Ok(());
            }
        }

        let header = match DataHeader::from_bytes(datagram) {
            Ok(header) => header,
            Err(err) => {
                self.stats.packets_malformed += 1;
                tracing::warn!(%from, error = %err, "discarding malformed datagram");
                return Err(err.into());
            }
        };

        if self.handle_data(&header) {
            self.stats.bytes_received += datagram.len() as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::ManualContext;
    use crate::packet::DataPacket;
    use crate::sequence::MAX_SEQ;

    fn peer() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn small_config() -> ClientConfig {
        ClientConfig {
            buffer_size: 6,
            pause_threshold: 4,
            resume_threshold: 1,
            packets_per_frame: 4,
            consume_start_delay: Duration::from_millis(100),
            ..ClientConfig::default()
        }
    }

    fn deliver(client: &mut Client, ctx: &mut ManualContext, seq: u32) {
        let bytes = DataPacket::new(seq, 0, Bytes::from_static(b"x")).to_bytes();
        client.on_datagram(&bytes, peer(), ctx).unwrap();
    }

    fn deliver_frames(client: &mut Client, ctx: &mut ManualContext, frames: std::ops::Range<u32>) {
        for seq in frames.start * 4..frames.end * 4 {
            deliver(client, ctx, seq);
        }
    }

    fn fire(client: &mut Client, ctx: &mut ManualContext, kind: TimerKind) {
        let timer = ctx.take_timer(kind).expect("timer pending");
        ctx.set_now(timer.at);
        client.on_tick(kind, ctx).unwrap();
    }

    #[test]
    fn test_start_schedules_timers() {
        let mut client = Client::new(small_config(), peer()).unwrap();
        let mut ctx = ManualContext::new();
        client.start(&mut ctx);

        assert_eq!(client.phase(), PlayoutPhase::Prebuffering);
        assert!(ctx.has_pending(TimerKind::Admission));
        assert!(ctx.has_pending(TimerKind::Request));
        let prebuffer = ctx.take_timer(TimerKind::Prebuffer).unwrap();
        assert_eq!(prebuffer.at, Duration::from_millis(100));
        assert!(!ctx.has_pending(TimerKind::Consume));
    }

    #[test]
    fn test_gap_tracking_from_datagrams() {
        let mut client = Client::new(small_config(), peer()).unwrap();
        let mut ctx = ManualContext::new();
        client.start(&mut ctx);

        for seq in [0, 1, 3] {
            deliver(&mut client, &mut ctx, seq);
        }
        assert_eq!(client.sequence().gaps().collect::<Vec<_>>(), vec![2]);
        assert_eq!(client.sequence().expected_next(), 4);

        fire(&mut client, &mut ctx, TimerKind::Request);
        let sent = ctx.take_sent();
        assert_eq!(sent.len(), 1);
        let request = ControlPacket::from_bytes(&sent[0].0).unwrap();
        assert_eq!(request.state(), ControlState::RetransmitRequest);
        assert_eq!(request.header.requests, vec![2]);
        assert_eq!(request.payload.len(), client.config().payload_size);

        deliver(&mut client, &mut ctx, 2);
        assert!(client.sequence().is_empty());
        fire(&mut client, &mut ctx, TimerKind::Request);
        assert!(ctx.take_sent().is_empty());
    }

    #[test]
    fn test_prebuffer_gate() {
        let config = ClientConfig {
            prebuffer_threshold: 2,
            ..small_config()
        };
        let mut client = Client::new(config, peer()).unwrap();
        let mut ctx = ManualContext::new();
        client.start(&mut ctx);

        fire(&mut client, &mut ctx, TimerKind::Prebuffer);
        assert_eq!(client.phase(), PlayoutPhase::Prebuffering);
        assert!(ctx.has_pending(TimerKind::Prebuffer));

        deliver_frames(&mut client, &mut ctx, 0..2);
        fire(&mut client, &mut ctx, TimerKind::Admission);
        assert_eq!(client.ready_count(), 2);

        fire(&mut client, &mut ctx, TimerKind::Prebuffer);
        assert_eq!(client.phase(), PlayoutPhase::Playing);
        let consume = ctx.take_timer(TimerKind::Consume).unwrap();
        assert_eq!(consume.at, ctx.now());
    }

    #[test]
    fn test_consume_plays_and_signals() {
        let mut client = Client::new(small_config(), peer()).unwrap();
        let mut ctx = ManualContext::new();
        client.start(&mut ctx);

        deliver_frames(&mut client, &mut ctx, 0..5);
        fire(&mut client, &mut ctx, TimerKind::Admission);
        assert_eq!(client.ready_count(), 5);

        fire(&mut client, &mut ctx, TimerKind::Prebuffer);
        fire(&mut client, &mut ctx, TimerKind::Consume);
        assert_eq!(client.playout_frame(), 1);
        assert_eq!(client.ready_count(), 4);
        assert_eq!(client.stats().frames_played, 1);

        // 4 ready >= pause threshold 4
        let sent = ctx.take_sent();
        let signal = ControlPacket::from_bytes(&sent[0].0).unwrap();
        assert_eq!(signal.state(), ControlState::Pause);
        assert_eq!(signal.header.frame_index, 1);
        assert!(ctx.has_pending(TimerKind::Consume));
    }

    #[test]
    fn test_underrun_advances_pointer() {
        let mut client = Client::new(small_config(), peer()).unwrap();
        let mut ctx = ManualContext::new();
        client.start(&mut ctx);
        fire(&mut client, &mut ctx, TimerKind::Prebuffer);

        for expected in 1..=3 {
            fire(&mut client, &mut ctx, TimerKind::Consume);
            assert_eq!(client.playout_frame(), expected);
        }
        assert_eq!(client.stats().underruns, 3);
        assert_eq!(client.stats().resumes_sent, 3);
    }

    #[test]
    fn test_full_buffer_drops_complete_frame() {
        let mut client = Client::new(small_config(), peer()).unwrap();
        let mut ctx = ManualContext::new();
        client.start(&mut ctx);

        deliver_frames(&mut client, &mut ctx, 0..8);
        let report = client.admission_scan();
        assert_eq!(report.admitted, 6);
        assert_eq!(report.dropped, 2);
        assert_eq!(client.frames().open_frames(), 0);
    }

    #[test]
    fn test_full_buffer_defers_complete_frame() {
        let config = ClientConfig {
            admission_policy: AdmissionPolicy::Defer,
            ..small_config()
        };
        let mut client = Client::new(config, peer()).unwrap();
        let mut ctx = ManualContext::new();
        client.start(&mut ctx);

        deliver_frames(&mut client, &mut ctx, 0..8);
        let report = client.admission_scan();
        assert_eq!(report.admitted, 6);
        assert_eq!(report.deferred, 2);
        assert!(client.frames().is_open(6));

        client.consume().unwrap();
        let report = client.admission_scan();
        assert_eq!(report.admitted, 1);
        assert!(client.playout().contains(6));
    }

    #[test]
    fn test_stop_cancels_timers() {
        let mut client = Client::new(small_config(), peer()).unwrap();
        let mut ctx = ManualContext::new();
        client.start(&mut ctx);
        fire(&mut client, &mut ctx, TimerKind::Prebuffer);

        client.stop(&mut ctx);
        assert!(ctx.pending_timers().is_empty());
        assert_eq!(client.phase(), PlayoutPhase::Stopped);
    }

    #[test]
    fn test_short_datagram_rejected() {
        let mut client = Client::new(small_config(), peer()).unwrap();
        let mut ctx = ManualContext::new();
        client.start(&mut ctx);

        let err = client.on_datagram(&[1, 2, 3], peer(), &mut ctx).unwrap_err();
        assert!(matches!(err, ProtocolError::Packet(_)));
        assert_eq!(client.stats().packets_malformed, 1);
    }

    #[test]
    fn test_open_frame_cap() {
        let config = ClientConfig {
            max_open_frames: Some(2),
            ..small_config()
        };
        let mut client = Client::new(config, peer()).unwrap();
        let mut ctx = ManualContext::new();

        deliver(&mut client, &mut ctx, 0);
        deliver(&mut client, &mut ctx, 4);
        deliver(&mut client, &mut ctx, 8);
        assert_eq!(client.stats().packets_dropped_overflow, 1);
        assert_eq!(client.frames().open_frames(), 2);
        assert_eq!(client.sequence().expected_next(), 5);
    }

    #[test]
    fn test_far_sequence_jump_bounded() {
        let mut client = Client::new(small_config(), peer()).unwrap();
        let mut ctx = ManualContext::new();
        client.start(&mut ctx);

        deliver(&mut client, &mut ctx, 0);
        deliver(&mut client, &mut ctx, u32::MAX);
        assert_eq!(client.stats().packets_malformed, 1);
        assert_eq!(client.sequence().expected_next(), 1);
        assert!(client.sequence().is_empty());

        deliver(&mut client, &mut ctx, MAX_SEQ);
        assert_eq!(client.sequence().ranges().len(), 1);
        assert_eq!(client.sequence().expected_next(), u32::MAX);

        fire(&mut client, &mut ctx, TimerKind::Request);
        let sent = ctx.take_sent();
        let request = ControlPacket::from_bytes(&sent[0].0).unwrap();
        assert_eq!(request.header.requests, (1..=100).collect::<Vec<u32>>());
    }

    #[test]
    fn test_halt_on_negative_ready() {
        let mut client = Client::new(small_config(), peer()).unwrap();
        let mut ctx = ManualContext::new();
        client.start(&mut ctx);
        fire(&mut client, &mut ctx, TimerKind::Prebuffer);

        client.playout.admit(0);
        client.playout.force_ready(0);

        let timer = ctx.take_timer(TimerKind::Consume).unwrap();
        ctx.set_now(timer.at);
        let err = client.on_tick(TimerKind::Consume, &mut ctx).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(client.phase(), PlayoutPhase::Halted);
        assert!(!ctx.has_pending(TimerKind::Consume));
    }
}
