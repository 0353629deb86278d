//! Clocks and timer queues
//!
//! Endpoints only see time as a [`Duration`] since their driver started.
//! [`MonotonicClock`] provides that for real time; [`TimerQueue`] orders
//! pending deadlines for both the real-time runtime and the simulation.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};
use vstream_protocol::endpoint::TimerHandle;

/// Wall-clock time since construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            start: Instant::now(),
        }
    }

    /// Elapsed time since the clock was created
    #[inline]
    pub fn now(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left until `deadline`, zero if it has passed
    pub fn until(&self, deadline: Duration) -> Duration {
        deadline.saturating_sub(self.now())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadline-ordered queue of cancellable entries
///
/// Entries due at the same instant come out in insertion order.
/// Cancellation is lazy: the payload is dropped at once and the heap slot
/// is discarded when it reaches the top.
#[derive(Debug)]
pub struct TimerQueue<T> {
    heap: BinaryHeap<Reverse<(Duration, u64)>>,
    entries: HashMap<u64, T>,
    next_id: u64,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        TimerQueue {
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
            next_id: 0,
        }
    }

    /// Add an entry due at `at`
    pub fn schedule(&mut self, at: Duration, item: T) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse((at, id)));
        self.entries.insert(id, item);
        TimerHandle::from_raw(id)
    }

    /// Cancel an entry, returning its payload if it was still pending
    pub fn cancel(&mut self, handle: TimerHandle) -> Option<T> {
        self.entries.remove(&handle.as_raw())
    }

    /// Deadline of the earliest live entry
    pub fn next_deadline(&mut self) -> Option<Duration> {
        self.discard_cancelled();
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Remove and return the earliest entry if it is due at or before `now`
    pub fn pop_due(&mut self, now: Duration) -> Option<(Duration, TimerHandle, T)> {
        self.discard_cancelled();
        let Reverse((at, id)) = *self.heap.peek()?;
        if at > now {
            return None;
        }
        self.heap.pop();
        let item = self.entries.remove(&id)?;
        Some((at, TimerHandle::from_raw(id), item))
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse((_, id))) = self.heap.peek() {
            if self.entries.contains_key(id) {
                break;
            }
            self.heap.pop();
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_clock_advances() {
        let clock = MonotonicClock::new();
        let before = clock.now();
        thread::sleep(ms(5));
        assert!(clock.now() >= before + ms(5));
        assert_eq!(clock.until(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_pop_due_order() {
        let mut queue = TimerQueue::new();
        queue.schedule(ms(20), "late");
        queue.schedule(ms(10), "early");
        queue.schedule(ms(10), "early-second");

        assert!(queue.pop_due(ms(5)).is_none());
        assert_eq!(queue.next_deadline(), Some(ms(10)));
        assert_eq!(queue.pop_due(ms(15)).unwrap().2, "early");
        assert_eq!(queue.pop_due(ms(15)).unwrap().2, "early-second");
        assert!(queue.pop_due(ms(15)).is_none());
        assert_eq!(queue.pop_due(ms(20)).unwrap().2, "late");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_cancel() {
        let mut queue = TimerQueue::new();
        let first = queue.schedule(ms(1), 1);
        queue.schedule(ms(2), 2);

        assert_eq!(queue.cancel(first), Some(1));
        assert_eq!(queue.cancel(first), None);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_deadline(), Some(ms(2)));
        assert_eq!(queue.pop_due(ms(5)).unwrap().2, 2);
    }

    proptest! {
        #[test]
        fn prop_pops_in_deadline_order(deadlines in prop::collection::vec(0u64..1_000, 1..100)) {
            let mut queue = TimerQueue::new();
            for (i, &at) in deadlines.iter().enumerate() {
                queue.schedule(Duration::from_micros(at), i);
            }

            let mut last = Duration::ZERO;
            let mut popped = 0;
            while let Some((at, _, _)) = queue.pop_due(Duration::MAX) {
                prop_assert!(at >= last);
                last = at;
                popped += 1;
            }
            prop_assert_eq!(popped, deadlines.len());
        }
    }
}
