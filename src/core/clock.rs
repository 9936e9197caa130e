//! Deterministic simulated clock with a scheduled-callback queue
//!
//! All engine semantics are defined against this clock; wall-clock time never
//! enters the simulation. Scheduled callbacks fire only while the clock is
//! advancing, in `(due time, insertion order)` order, and always with the
//! clock's internal lock released so a callback may schedule further work or
//! advance the clock again.

use crate::core::types::{Duration, Timestamp};
use crate::error::{EngineError, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use tracing::error;

type Callback = Box<dyn FnOnce() + Send>;

/// A callback waiting on the clock's heap
struct ScheduledEvent {
    due: Timestamp,
    seq: u64,
    callback: Callback,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the earliest (due, seq) first
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

struct ClockState {
    now: Timestamp,
    heap: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
}

/// Monotonic simulation clock
pub struct SimClock {
    state: Mutex<ClockState>,
}

impl SimClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            state: Mutex::new(ClockState {
                now: start,
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Current simulated time
    pub fn now(&self) -> Timestamp {
        self.state.lock().unwrap().now
    }

    /// Advance to `target`, firing every scheduled callback with `due <= target`.
    ///
    /// Fails with [`EngineError::ClockRewind`] when `target` is in the past.
    /// Callbacks run one at a time with the lock released; a panicking
    /// callback is logged and the remainder still fire.
    pub fn advance_to(&self, target: Timestamp) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if target < state.now {
                return Err(EngineError::ClockRewind {
                    current: state.now,
                    target,
                });
            }
            state.now = target;
        }

        loop {
            let callback = {
                let mut state = self.state.lock().unwrap();
                match state.heap.peek() {
                    Some(ev) if ev.due <= state.now => state.heap.pop().map(|ev| ev.callback),
                    _ => None,
                }
            };
            let Some(callback) = callback else { break };
            if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                error!("scheduled callback panicked; continuing");
            }
        }
        Ok(())
    }

    /// Advance by a relative duration
    pub fn advance_by(&self, duration: Duration) -> Result<()> {
        let target = self.now() + duration;
        self.advance_to(target)
    }

    /// Schedule `callback` to fire once the clock reaches `at`.
    ///
    /// A time in the past is allowed; the callback fires on the next advance.
    pub fn schedule(&self, at: Timestamp, callback: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock().unwrap();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(ScheduledEvent {
            due: at,
            seq,
            callback: Box::new(callback),
        });
    }

    /// Schedule relative to the current time
    pub fn schedule_after(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) {
        let at = self.now() + delay;
        self.schedule(at, callback);
    }

    /// Drop all scheduled callbacks and jump to `start`
    pub fn reset(&self, start: Timestamp) {
        let mut state = self.state.lock().unwrap();
        state.now = start;
        state.heap.clear();
        state.next_seq = 0;
    }

    /// Earliest due time on the heap, if any
    pub fn next_event_time(&self) -> Option<Timestamp> {
        self.state.lock().unwrap().heap.peek().map(|ev| ev.due)
    }

    pub fn has_pending(&self) -> bool {
        !self.state.lock().unwrap().heap.is_empty()
    }
}
