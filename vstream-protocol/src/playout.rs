//! Playout buffer and flow control
//!
//! The client consumes one frame per clock tick. Complete frames wait in
//! the playout buffer until the consumption pointer reaches them; the
//! number of ready frames drives PAUSE/RESUME signalling back to the
//! streamer.

use crate::endpoint::ProtocolError;
use crate::packet::ControlState;
use std::collections::BTreeSet;

/// Client playout state machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayoutPhase {
    /// Not started
    Idle,
    /// Waiting for enough ready frames before the first consumption tick
    Prebuffering,
    /// Consumption clock running
    Playing,
    /// Consumption stopped after a ready-count invariant violation
    Halted,
    /// Endpoint stopped
    Stopped,
}

/// Result of one consumption tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The frame was in the buffer and has been played
    Played(u32),
    /// The frame was missing while the buffer was below the pause threshold
    Underrun(u32),
    /// The frame was missing but the buffer is saturated; nothing was due
    Idle(u32),
}

impl ConsumeOutcome {
    /// Frame index the tick was for
    pub fn frame(&self) -> u32 {
        match *self {
            ConsumeOutcome::Played(f) | ConsumeOutcome::Underrun(f) | ConsumeOutcome::Idle(f) => f,
        }
    }
}

/// Complete frames awaiting consumption plus the consumption pointer
///
/// `ready` is tracked separately from the frame set and is signed so an
/// accounting error surfaces as a negative count instead of wrapping.
#[derive(Debug, Clone)]
pub struct PlayoutBuffer {
    frames: BTreeSet<u32>,
    ready: i64,
    capacity: u32,
    frame_index: u32,
}

impl PlayoutBuffer {
    /// Create an empty buffer holding at most `capacity` frames
    pub fn new(capacity: u32) -> Self {
        PlayoutBuffer {
            frames: BTreeSet::new(),
            ready: 0,
            capacity,
            frame_index: 0,
        }
    }

    /// Check if another frame can be admitted
    pub fn has_room(&self) -> bool {
        self.ready < self.capacity as i64
    }

    /// Insert a complete frame, returning false if the buffer is full or the
    /// frame is already buffered
    pub fn admit(&mut self, frame: u32) -> bool {
        if !self.has_room() || !self.frames.insert(frame) {
            return false;
        }
        self.ready += 1;
        true
    }

    /// Run one consumption tick
    ///
    /// Plays the frame under the pointer if it is buffered, then advances
    /// the pointer by exactly one whether or not anything was played. A
    /// negative ready count halts consumption without advancing.
    pub fn consume(&mut self, pause_threshold: u32) -> Result<ConsumeOutcome, ProtocolError> {
        let frame = self.frame_index;

        let outcome = if self.frames.remove(&frame) {
            self.ready -= 1;
            ConsumeOutcome::Played(frame)
        } else if self.ready >= pause_threshold as i64 {
            ConsumeOutcome::Idle(frame)
        } else {
            ConsumeOutcome::Underrun(frame)
        };

        if self.ready < 0 {
            return Err(ProtocolError::NegativeReadyCount {
                frame,
                ready: self.ready,
            });
        }

        self.frame_index = self.frame_index.wrapping_add(1);
        Ok(outcome)
    }

    /// Frame the consumption pointer is on
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Ready frame count
    pub fn ready_count(&self) -> i64 {
        self.ready
    }

    /// Check if a frame is buffered
    pub fn contains(&self, frame: u32) -> bool {
        self.frames.contains(&frame)
    }

    /// Buffered frame indices in ascending order
    pub fn frames(&self) -> impl Iterator<Item = u32> + '_ {
        self.frames.iter().copied()
    }

    /// Maximum number of ready frames
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[cfg(test)]
    pub(crate) fn force_ready(&mut self, ready: i64) {
        self.ready = ready;
    }
}

/// PAUSE/RESUME decision with hysteresis
///
/// At or above the pause threshold the streamer should stop; at or below
/// the resume threshold it should send again; in between the previous
/// signal stands.
#[derive(Debug, Clone)]
pub struct FlowController {
    pause_threshold: u32,
    resume_threshold: u32,
    repeat: bool,
    last: Option<ControlState>,
}

impl FlowController {
    /// Create a controller
    ///
    /// With `repeat` set, the current signal is produced on every
    /// evaluation that satisfies its condition; otherwise only changes are
    /// produced.
    pub fn new(pause_threshold: u32, resume_threshold: u32, repeat: bool) -> Self {
        debug_assert!(resume_threshold < pause_threshold);
        FlowController {
            pause_threshold,
            resume_threshold,
            repeat,
            last: None,
        }
    }

    /// Signal to send for the given ready count, if any
    pub fn evaluate(&mut self, ready: i64) -> Option<ControlState> {
        let signal = if ready >= self.pause_threshold as i64 {
            ControlState::Pause
        } else if ready <= self.resume_threshold as i64 {
            ControlState::Resume
        } else {
            return None;
        };

        if !self.repeat && self.last == Some(signal) {
            return None;
        }
        self.last = Some(signal);
        Some(signal)
    }

    /// Most recent signal produced
    pub fn last_signal(&self) -> Option<ControlState> {
        self.last
    }
}
