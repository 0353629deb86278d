//! Streamer (sender)
//!
//! Emits one frame's worth of sequentially numbered packets every
//! `1 / fps`, preceded by any retransmissions the client asked for. PAUSE
//! and RESUME from the client gate the pacing tick.

use crate::config::{ConfigError, StreamerConfig};
use crate::endpoint::{Context, Endpoint, ProtocolError, TimerHandle, TimerKind};
use crate::loss::LossSimulator;
use crate::packet::{ControlHeader, ControlState, DataPacket};
use crate::retransmit::{widen_frame_index, RetransmitQueue};
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;

/// Streamer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamerStats {
    pub packets_sent: u64,
    pub packets_retransmitted: u64,
    pub bytes_sent: u64,
    pub frames_sent: u64,
    pub ticks_paused: u64,
    pub requests_received: u64,
    pub pauses_received: u64,
    pub resumes_received: u64,
    /// Queued retransmissions discarded as behind the client's playout
    pub retransmits_pruned: u64,
    pub control_dropped_loss: u64,
    pub control_malformed: u64,
}

/// Streaming sender endpoint
pub struct Streamer {
    config: StreamerConfig,
    peer: SocketAddr,
    next_seq: u32,
    paused: bool,
    last_client_frame: u32,
    queue: RetransmitQueue,
    transmit_timer: Option<TimerHandle>,
    loss: Option<LossSimulator>,
    payload: Bytes,
    stats: StreamerStats,
}

impl Streamer {
    /// Create a streamer sending to `peer`
    pub fn new(config: StreamerConfig, peer: SocketAddr) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Streamer {
            next_seq: 0,
            paused: false,
            last_client_frame: 0,
            queue: RetransmitQueue::new(),
            transmit_timer: None,
            loss: LossSimulator::from_config(&config.loss),
            payload: Bytes::from(vec![0u8; config.payload_size]),
            stats: StreamerStats::default(),
            config,
            peer,
        })
    }

    /// Frame the next fresh packet belongs to
    pub fn current_frame(&self) -> u32 {
        self.next_seq / self.config.packets_per_frame
    }

    fn retransmit_floor(&self) -> u32 {
        self.last_client_frame
            .saturating_mul(self.config.packets_per_frame)
    }

    /// Build the packets for one pacing tick
    ///
    /// Nothing is produced while paused. Otherwise queued retransmissions go
    /// first, then one frame of fresh packets.
    pub fn transmit_batch(&mut self, timestamp_us: u64) -> Vec<DataPacket> {
        if self.paused {
            self.stats.ticks_paused += 1;
            return Vec::new();
        }

        let pruned = self.queue.prune_below(self.retransmit_floor());
        self.stats.retransmits_pruned += pruned as u64;

        let resend = self.queue.pop_batch(self.config.retransmit_batch);
        let ppf = self.config.packets_per_frame as usize;
        let mut packets = Vec::with_capacity(resend.len() + ppf);

        for seq in resend {
            packets.push(DataPacket::new(seq, timestamp_us, self.payload.clone()));
        }
        let retransmitted = packets.len();

        for _ in 0..ppf {
            packets.push(DataPacket::new(
                self.next_seq,
                timestamp_us,
                self.payload.clone(),
            ));
            self.next_seq = self.next_seq.wrapping_add(1);
        }

        self.stats.packets_retransmitted += retransmitted as u64;
        self.stats.packets_sent += packets.len() as u64;
        self.stats.frames_sent += 1;
        if retransmitted > 0 {
            tracing::debug!(retransmitted, frame = self.current_frame(), "retransmitting");
        }
        packets
    }

    /// Apply a control header from the client
    pub fn handle_control(&mut self, header: &ControlHeader) {
        match header.state {
            ControlState::Pause => {
                self.stats.pauses_received += 1;
                if !self.paused {
                    tracing::info!(client_frame = header.frame_index, "paused by client");
                }
                self.paused = true;
            }
            ControlState::Resume => {
                self.stats.resumes_received += 1;
                if self.paused {
                    tracing::info!(client_frame = header.frame_index, "resumed by client");
                }
                self.paused = false;
            }
            ControlState::RetransmitRequest => {
                self.stats.requests_received += 1;
                self.last_client_frame =
                    widen_frame_index(header.frame_index, self.current_frame());

                let pruned = self.queue.prune_below(self.retransmit_floor());
                self.stats.retransmits_pruned += pruned as u64;

                let floor = self.retransmit_floor();
                let added = self
                    .queue
                    .extend(header.requests.iter().copied().filter(|&seq| seq >= floor));
                tracing::debug!(
                    client_frame = self.last_client_frame,
                    requested = header.requests.len(),
                    added,
                    queued = self.queue.len(),
                    "retransmit request"
                );
            }
            ControlState::DataFlowNone => {}
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Next fresh sequence number
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Latest client playout frame learned from a retransmit request
    pub fn last_client_frame(&self) -> u32 {
        self.last_client_frame
    }

    /// Pending retransmissions
    pub fn queue(&self) -> &RetransmitQueue {
        &self.queue
    }

    pub fn stats(&self) -> &StreamerStats {
        &self.stats
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Endpoint for Streamer {
    fn start(&mut self, ctx: &mut dyn Context) {
        tracing::info!(
            peer = %self.peer,
            fps = self.config.fps,
            packets_per_frame = self.config.packets_per_frame,
            "streamer starting"
        );
        self.transmit_timer = Some(ctx.schedule_after(Duration::ZERO, TimerKind::Transmit));
    }

    fn stop(&mut self, ctx: &mut dyn Context) {
        if let Some(handle) = self.transmit_timer.take() {
            ctx.cancel(handle);
        }
        tracing::info!(
            sent = self.stats.packets_sent,
            retransmitted = self.stats.packets_retransmitted,
            "streamer stopped"
        );
    }

    fn on_tick(&mut self, timer: TimerKind, ctx: &mut dyn Context) -> Result<(), ProtocolError> {
        if timer != TimerKind::Transmit {
            return Ok(());
        }
        if self.transmit_timer.take().is_none() {
            // Stopped
            return Ok(());
        }

        let timestamp_us = ctx.now().as_micros() as u64;
        for packet in self.transmit_batch(timestamp_us) {
            let datagram = packet.to_bytes().freeze();
            self.stats.bytes_sent += datagram.len() as u64;
            ctx.send_datagram(datagram, self.peer);
        }

        let interval = self.config.frame_interval();
        self.transmit_timer = Some(ctx.schedule_after(interval, TimerKind::Transmit));
        Ok(())
    }

    fn on_datagram(
        &mut self,
        datagram: &[u8],
        from: SocketAddr,
        _ctx: &mut dyn Context,
    ) -> Result<(), ProtocolError> {
        if let Some(loss) = self.loss.as_mut() {
            if loss.should_drop() {
                self.stats.control_dropped_loss += 1;
                return Ok(());
            }
        }

        let header = match ControlHeader::from_bytes(datagram) {
            Ok(header) => header,
            Err(err) => {
                self.stats.control_malformed += 1;
                tracing::warn!(%from, error = %err, "discarding malformed control packet");
                return Err(err.into());
            }
        };
        self.handle_control(&header);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::ManualContext;
    use crate::packet::ControlPacket;

    fn peer() -> SocketAddr {
        "127.0.0.1:9001".parse().unwrap()
    }

    fn streamer(ppf: u32) -> Streamer {
        let config = StreamerConfig {
            packets_per_frame: ppf,
            ..StreamerConfig::default()
        };
        Streamer::new(config, peer()).unwrap()
    }

    fn seqs(packets: &[DataPacket]) -> Vec<u32> {
        packets.iter().map(|p| p.seq()).collect()
    }

    #[test]
    fn test_fresh_frame_per_tick() {
        let mut streamer = streamer(4);
        assert_eq!(seqs(&streamer.transmit_batch(0)), vec![0, 1, 2, 3]);
        assert_eq!(seqs(&streamer.transmit_batch(0)), vec![4, 5, 6, 7]);
        assert_eq!(streamer.current_frame(), 2);
        assert_eq!(streamer.stats().frames_sent, 2);
    }

    #[test]
    fn test_pause_gates_transmission() {
        let mut streamer = streamer(4);
        streamer.handle_control(&ControlHeader::pause(0));
        assert!(streamer.is_paused());
        assert!(streamer.transmit_batch(0).is_empty());
        assert_eq!(streamer.next_seq(), 0);
        assert_eq!(streamer.stats().ticks_paused, 1);

        streamer.handle_control(&ControlHeader::resume(0));
        assert_eq!(seqs(&streamer.transmit_batch(0)), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_retransmissions_precede_fresh_packets() {
        let mut streamer = streamer(4);
        for _ in 0..3 {
            streamer.transmit_batch(0);
        }
        streamer.handle_control(&ControlHeader::retransmit_request(1, vec![5, 7]).unwrap());
        assert_eq!(streamer.last_client_frame(), 1);

        let packets = streamer.transmit_batch(0);
        assert_eq!(seqs(&packets), vec![5, 7, 12, 13, 14, 15]);
        assert_eq!(streamer.stats().packets_retransmitted, 2);
        assert!(streamer.queue().is_empty());
    }

    #[test]
    fn test_requests_below_client_frame_are_pruned() {
        let mut streamer = streamer(4);
        for _ in 0..5 {
            streamer.transmit_batch(0);
        }
        streamer.handle_control(&ControlHeader::retransmit_request(0, vec![1, 2, 9]).unwrap());
        assert_eq!(streamer.queue().len(), 3);

        // Client moved on to frame 2: everything below seq 8 is obsolete
        streamer.handle_control(&ControlHeader::retransmit_request(2, vec![9, 10]).unwrap());
        assert_eq!(streamer.queue().iter().collect::<Vec<_>>(), vec![9, 10]);
        assert_eq!(streamer.stats().retransmits_pruned, 2);
    }

    #[test]
    fn test_retransmit_batch_limit() {
        let config = StreamerConfig {
            packets_per_frame: 2,
            retransmit_batch: 3,
            ..StreamerConfig::default()
        };
        let mut streamer = Streamer::new(config, peer()).unwrap();
        for _ in 0..10 {
            streamer.transmit_batch(0);
        }
        let request = ControlHeader::retransmit_request(0, vec![0, 1, 2, 3, 4]).unwrap();
        streamer.handle_control(&request);

        assert_eq!(seqs(&streamer.transmit_batch(0)), vec![0, 1, 2, 20, 21]);
        assert_eq!(seqs(&streamer.transmit_batch(0)), vec![3, 4, 22, 23]);
    }

    #[test]
    fn test_endpoint_tick_sends_and_reschedules() {
        let mut streamer = streamer(4);
        let mut ctx = ManualContext::new();
        streamer.start(&mut ctx);

        let timer = ctx.take_timer(TimerKind::Transmit).unwrap();
        assert_eq!(timer.at, Duration::ZERO);
        streamer.on_tick(TimerKind::Transmit, &mut ctx).unwrap();

        let sent = ctx.take_sent();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|(_, dest)| *dest == peer()));
        let first = DataPacket::from_bytes(&sent[0].0).unwrap();
        assert_eq!(first.seq(), 0);
        assert_eq!(first.payload.len(), streamer.config().payload_size);

        let next = ctx.take_timer(TimerKind::Transmit).unwrap();
        assert_eq!(next.at, streamer.config().frame_interval());
    }

    #[test]
    fn test_control_datagram() {
        let mut streamer = streamer(4);
        let mut ctx = ManualContext::new();
        streamer.start(&mut ctx);

        let packet = ControlPacket::new(ControlHeader::pause(0), Bytes::new());
        streamer
            .on_datagram(&packet.to_bytes(), peer(), &mut ctx)
            .unwrap();
        assert!(streamer.is_paused());

        assert!(streamer.on_datagram(&[0; 10], peer(), &mut ctx).is_err());
        assert_eq!(streamer.stats().control_malformed, 1);
    }

    #[test]
    fn test_stop_cancels_transmit() {
        let mut streamer = streamer(4);
        let mut ctx = ManualContext::new();
        streamer.start(&mut ctx);
        streamer.stop(&mut ctx);
        assert!(ctx.pending_timers().is_empty());

        streamer.on_tick(TimerKind::Transmit, &mut ctx).unwrap();
        assert!(ctx.take_sent().is_empty());
    }
}
