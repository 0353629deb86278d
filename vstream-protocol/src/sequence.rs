//! Sequence Number Tracking
//!
//! The client keeps a cursor on the next contiguous sequence number it
//! expects and the ranges of sequence numbers it skipped over. The gap list
//! is a sliding, best-effort view: entries that fall behind the playout
//! pointer are pruned rather than retried, so this is not a complete
//! acknowledgement scheme.

/// Highest sequence number the cursor can move past
///
/// `u32::MAX` itself is rejected so `expected_next` never wraps.
pub const MAX_SEQ: u32 = u32::MAX - 1;

/// Outcome of feeding one sequence number into the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Exactly the expected sequence number
    InOrder,
    /// Jumped ahead; `missing` sequence numbers were recorded as gaps
    Gap { missing: u32 },
    /// Filled a previously recorded gap
    Recovered,
    /// Behind the cursor and not a known gap (duplicate or already pruned)
    Stale,
    /// Beyond [`MAX_SEQ`]; nothing recorded
    OutOfRange,
}

/// Gap sequence range (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapRange {
    /// First missing sequence number
    pub start: u32,
    /// Last missing sequence number (inclusive)
    pub end: u32,
}

impl GapRange {
    pub fn new(start: u32, end: u32) -> Self {
        GapRange { start, end }
    }

    pub fn single(seq: u32) -> Self {
        GapRange { start: seq, end: seq }
    }

    /// Check if this range contains a sequence number
    pub fn contains(&self, seq: u32) -> bool {
        self.start <= seq && seq <= self.end
    }

    /// Number of sequence numbers in the range
    pub fn len(&self) -> u64 {
        (self.end - self.start) as u64 + 1
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    /// Sequence numbers in ascending order
    pub fn iter(&self) -> std::ops::RangeInclusive<u32> {
        self.start..=self.end
    }
}

/// Expected-next cursor plus pending gap ranges
///
/// Invariant: `gaps` is sorted ascending, ranges are disjoint, and every
/// range ends below `expected_next`. A range is only ever appended right
/// before the cursor moves past it, which keeps the list sorted in
/// detection order. Memory is bounded by the number of jumps, not by their
/// size.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    expected_next: u32,
    gaps: Vec<GapRange>,
}

impl SequenceTracker {
    /// Create a tracker expecting sequence number 0 first
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the arrival of `seq`
    ///
    /// `floor` is the first sequence number still useful to the client
    /// (`playout_frame * packets_per_frame`). A jump ahead records gaps from
    /// `max(expected_next, floor)` only; a late arrival prunes everything
    /// below it.
    pub fn on_packet(&mut self, seq: u32, floor: u32) -> Arrival {
        if seq > MAX_SEQ {
            return Arrival::OutOfRange;
        }

        if seq == self.expected_next {
            self.expected_next = seq + 1;
            Arrival::InOrder
        } else if seq > self.expected_next {
            let start = self.expected_next.max(floor);
            self.expected_next = seq + 1;
            if start >= seq {
                // Everything skipped is already behind the playout pointer
                return Arrival::InOrder;
            }
            self.gaps.push(GapRange::new(start, seq - 1));
            Arrival::Gap {
                missing: seq - start,
            }
        } else {
            let arrival = if self.remove(seq) {
                Arrival::Recovered
            } else {
                Arrival::Stale
            };
            self.prune_below(floor);
            arrival
        }
    }

    /// Remove one sequence number from the gap list, splitting its range
    fn remove(&mut self, seq: u32) -> bool {
        let idx = self.gaps.partition_point(|range| range.end < seq);
        let Some(range) = self.gaps.get_mut(idx) else {
            return false;
        };
        if !range.contains(seq) {
            return false;
        }

        if range.is_single() {
            self.gaps.remove(idx);
        } else if seq == range.start {
            range.start += 1;
        } else if seq == range.end {
            range.end -= 1;
        } else {
            let upper = GapRange::new(seq + 1, range.end);
            range.end = seq - 1;
            self.gaps.insert(idx + 1, upper);
        }
        true
    }

    /// Drop every gap below `floor`, returning how many were dropped
    pub fn prune_below(&mut self, floor: u32) -> u64 {
        let cut = self.gaps.partition_point(|range| range.end < floor);
        let mut dropped: u64 = self.gaps.drain(..cut).map(|range| range.len()).sum();
        if let Some(first) = self.gaps.first_mut() {
            if first.start < floor {
                dropped += (floor - first.start) as u64;
                first.start = floor;
            }
        }
        dropped
    }

    /// Select the earliest gaps still worth requesting
    ///
    /// Prunes below `floor` first, then returns at most `max` entries in
    /// ascending order. The selected gaps stay pending until they arrive or
    /// age out, so they are requested again on the next tick.
    pub fn request_batch(&mut self, floor: u32, max: usize) -> Vec<u32> {
        self.prune_below(floor);
        self.gaps().take(max).collect()
    }

    /// Next contiguous sequence number expected
    pub fn expected_next(&self) -> u32 {
        self.expected_next
    }

    /// Pending gap ranges, ascending
    pub fn ranges(&self) -> &[GapRange] {
        &self.gaps
    }

    /// Sequence numbers currently believed missing, ascending
    pub fn gaps(&self) -> impl Iterator<Item = u32> + '_ {
        self.gaps.iter().flat_map(GapRange::iter)
    }

    /// Lowest pending gap
    pub fn first_gap(&self) -> Option<u32> {
        self.gaps.first().map(|range| range.start)
    }

    /// Check if a sequence number is a pending gap
    pub fn is_pending(&self, seq: u32) -> bool {
        let idx = self.gaps.partition_point(|range| range.end < seq);
        self.gaps.get(idx).map_or(false, |range| range.contains(seq))
    }

    /// Number of pending gaps
    pub fn len(&self) -> u64 {
        self.gaps.iter().map(GapRange::len).sum()
    }

    /// Check if no gaps are pending
    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }
}
