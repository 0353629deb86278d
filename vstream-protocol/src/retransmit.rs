//! Retransmission request and servicing
//!
//! Client side: periodically turn the pending gap list into a bounded
//! retransmit request. Streamer side: keep a FIFO of sequence numbers owed
//! to the client, pruned against the client's reported playout frame. The
//! control header only carries the low 16 bits of that frame index, so the
//! streamer widens it back with [`widen_frame_index`].

use crate::packet::{wire_frame_index, ControlHeader, RETRANSMIT_CAPACITY};
use crate::sequence::SequenceTracker;
use std::collections::{HashSet, VecDeque};

/// Build the next retransmit request, or `None` when nothing is missing
///
/// Gaps below the playout pointer's first sequence number are pruned first
/// since they can no longer be played. At most [`RETRANSMIT_CAPACITY`] of
/// the earliest remaining gaps are requested.
pub fn build_request(
    tracker: &mut SequenceTracker,
    playout_frame: u32,
    packets_per_frame: u32,
) -> Option<ControlHeader> {
    let floor = playout_frame.saturating_mul(packets_per_frame);
    let batch = tracker.request_batch(floor, RETRANSMIT_CAPACITY);
    if batch.is_empty() {
        return None;
    }
    ControlHeader::retransmit_request(wire_frame_index(playout_frame), batch).ok()
}

/// Widen a 16-bit wire frame index back to 32 bits
///
/// Picks the value congruent to `wire` modulo 65536 that lies closest to
/// `reference` (within ±32768 frames), clamped at zero. The streamer uses
/// its own current frame as the reference.
pub fn widen_frame_index(wire: u16, reference: u32) -> u32 {
    let distance = wire.wrapping_sub(wire_frame_index(reference)) as i16;
    (reference as i64 + distance as i64).clamp(0, u32::MAX as i64) as u32
}

/// Sequence numbers owed to the client, oldest request first
///
/// A sequence number already waiting is not queued twice; the client
/// repeats its requests every tick until the gap is filled.
#[derive(Debug, Clone, Default)]
pub struct RetransmitQueue {
    queue: VecDeque<u32>,
    queued: HashSet<u32>,
}

impl RetransmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one sequence number, returning false if already queued
    pub fn push(&mut self, seq: u32) -> bool {
        if !self.queued.insert(seq) {
            return false;
        }
        self.queue.push_back(seq);
        true
    }

    /// Queue several sequence numbers in order, returning how many were new
    pub fn extend<I: IntoIterator<Item = u32>>(&mut self, seqs: I) -> usize {
        seqs.into_iter().filter(|&seq| self.push(seq)).count()
    }

    /// Remove every entry below `floor`, returning how many were removed
    pub fn prune_below(&mut self, floor: u32) -> usize {
        let before = self.queue.len();
        let queued = &mut self.queued;
        self.queue.retain(|&seq| {
            if seq < floor {
                queued.remove(&seq);
                false
            } else {
                true
            }
        });
        before - self.queue.len()
    }

    /// Dequeue up to `max` entries from the front
    pub fn pop_batch(&mut self, max: usize) -> Vec<u32> {
        let count = max.min(self.queue.len());
        let batch: Vec<u32> = self.queue.drain(..count).collect();
        for seq in &batch {
            self.queued.remove(seq);
        }
        batch
    }

    /// Check if a sequence number is queued
    pub fn contains(&self, seq: u32) -> bool {
        self.queued.contains(&seq)
    }

    /// Queued entries in FIFO order
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.queue.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
