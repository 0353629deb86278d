//! Frame completion tracking
//!
//! A frame is `packets_per_frame` consecutive sequence numbers. The client
//! keeps one bitmap per frame it has seen packets for, and a periodic scan
//! resolves each open frame as stale, complete, or still in progress.

use std::collections::BTreeMap;

/// Received-slot bitmap for a single frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBitmap {
    words: Vec<u64>,
    slots: u32,
    received: u32,
}

impl FrameBitmap {
    /// Create an empty bitmap with `slots` packets
    pub fn new(slots: u32) -> Self {
        FrameBitmap {
            words: vec![0; (slots as usize + 63) / 64],
            slots,
            received: 0,
        }
    }

    /// Mark a slot as received, returning false if it already was
    pub fn mark(&mut self, slot: u32) -> bool {
        debug_assert!(slot < self.slots);
        let word = &mut self.words[(slot / 64) as usize];
        let bit = 1u64 << (slot % 64);
        if *word & bit != 0 {
            return false;
        }
        *word |= bit;
        self.received += 1;
        true
    }

    /// Check if a slot has been received
    pub fn is_marked(&self, slot: u32) -> bool {
        slot < self.slots && self.words[(slot / 64) as usize] & (1u64 << (slot % 64)) != 0
    }

    /// Number of distinct slots received
    pub fn received(&self) -> u32 {
        self.received
    }

    /// Check if every slot has been received
    pub fn is_complete(&self) -> bool {
        self.received == self.slots
    }
}

/// Decision taken by the caller for a complete frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Moved into the playout buffer
    Admitted,
    /// Discarded because the playout buffer was full
    Dropped,
    /// Left open to be offered again on the next scan
    Deferred,
}

/// Tally of one admission scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub admitted: u32,
    pub dropped: u32,
    pub deferred: u32,
    pub stale: u32,
}

/// Result of recording a packet against its frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotUpdate {
    /// Slot newly marked
    Marked,
    /// Slot was already marked
    Duplicate,
    /// Frame is behind the playout pointer; nothing recorded
    Late,
}

/// Open frames keyed by frame index
#[derive(Debug, Clone)]
pub struct FrameTracker {
    packets_per_frame: u32,
    open: BTreeMap<u32, FrameBitmap>,
}

impl FrameTracker {
    /// Create a tracker for frames of `packets_per_frame` packets
    pub fn new(packets_per_frame: u32) -> Self {
        assert!(packets_per_frame > 0, "packets_per_frame must be non-zero");
        FrameTracker {
            packets_per_frame,
            open: BTreeMap::new(),
        }
    }

    /// Mark the slot of `seq` in its frame's bitmap
    ///
    /// Frames already behind `playout_frame` are resolved as lost and do not
    /// get a bitmap.
    pub fn record(&mut self, seq: u32, playout_frame: u32) -> SlotUpdate {
        let frame = seq / self.packets_per_frame;
        if frame < playout_frame {
            return SlotUpdate::Late;
        }

        let slots = self.packets_per_frame;
        let bitmap = self
            .open
            .entry(frame)
            .or_insert_with(|| FrameBitmap::new(slots));

        if bitmap.mark(seq % slots) {
            SlotUpdate::Marked
        } else {
            SlotUpdate::Duplicate
        }
    }

    /// Resolve open frames in ascending order
    ///
    /// Frames below `playout_frame` are discarded as stale. Each complete
    /// frame is offered to `admit`; its bitmap is discarded unless `admit`
    /// answers [`Admission::Deferred`]. Incomplete frames stay open.
    pub fn scan<F>(&mut self, playout_frame: u32, mut admit: F) -> ScanReport
    where
        F: FnMut(u32) -> Admission,
    {
        let mut report = ScanReport::default();

        // Everything below the pointer is stale
        let live = self.open.split_off(&playout_frame);
        report.stale = self.open.len() as u32;
        self.open = live;

        self.open.retain(|&frame, bitmap| {
            if !bitmap.is_complete() {
                return true;
            }
            match admit(frame) {
                Admission::Admitted => {
                    report.admitted += 1;
                    false
                }
                Admission::Dropped => {
                    report.dropped += 1;
                    false
                }
                Admission::Deferred => {
                    report.deferred += 1;
                    true
                }
            }
        });

        report
    }

    /// Bitmap for a frame, if open
    pub fn get(&self, frame: u32) -> Option<&FrameBitmap> {
        self.open.get(&frame)
    }

    /// Check if a frame is open
    pub fn is_open(&self, frame: u32) -> bool {
        self.open.contains_key(&frame)
    }

    /// Number of open frames
    pub fn open_frames(&self) -> usize {
        self.open.len()
    }

    /// Packets per frame
    pub fn packets_per_frame(&self) -> u32 {
        self.packets_per_frame
    }
}
