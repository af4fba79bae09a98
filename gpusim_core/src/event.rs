//! The event simulator (C2): a priority queue of `(fire_cycle, payload)`
//! pairs, drained in non-decreasing `fire_cycle` order with FIFO tie-break.
//!
//! Rather than storing function pointers, `drain` hands fired payloads back
//! to the caller to interpret — this is the "capability set, not
//! callback-invocation" shape `spec.md` §9 asks for, so a handler firing
//! mid-cycle can't re-enter the simulator through a raw pointer.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::FxHashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventToken(u64);

struct Entry<E> {
    fire_cycle: u64,
    sequence: u64,
    token: EventToken,
    payload: E,
}

/// A priority queue of pending events keyed by `(fire_cycle, sequence)`.
pub struct EventSimulator<E> {
    heap: BinaryHeap<Reverse<(u64, u64)>>,
    pending: std::collections::HashMap<u64, Entry<E>>,
    cancelled: FxHashSet<u64>,
    next_sequence: u64,
}

impl<E> Default for EventSimulator<E> {
    fn default() -> Self {
        EventSimulator {
            heap: BinaryHeap::new(),
            pending: std::collections::HashMap::new(),
            cancelled: FxHashSet::default(),
            next_sequence: 0,
        }
    }
}

impl<E> EventSimulator<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `payload` to fire at `now + delay`. `delay` must be at
    /// least 1 — `spec.md` §4.2 commits to rejecting `delay = 0` to remove
    /// the same-cycle-reentrance ambiguity.
    ///
    /// # Panics
    /// Panics if `delay == 0`.
    pub fn schedule(&mut self, now: u64, delay: u64, payload: E) -> EventToken {
        assert!(delay >= 1, "event delay must be at least 1 cycle");
        let fire_cycle = now + delay;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let token = EventToken(sequence);
        self.heap.push(Reverse((fire_cycle, sequence)));
        self.pending.insert(
            sequence,
            Entry {
                fire_cycle,
                sequence,
                token,
                payload,
            },
        );
        token
    }

    /// Cancels a previously scheduled event. No-op if it already fired or
    /// was already cancelled.
    pub fn cancel(&mut self, token: EventToken) {
        self.pending.remove(&token.0);
        self.cancelled.insert(token.0);
    }

    /// Removes and returns every event with `fire_cycle <= now`, in
    /// non-decreasing `fire_cycle` order, FIFO among equal cycles. Events
    /// scheduled by the caller while iterating the result are not included
    /// here — they land in a later `drain` call, since the minimum delay is
    /// 1 and `now` does not advance mid-call.
    pub fn drain(&mut self, now: u64) -> Vec<(EventToken, E)> {
        let mut fired = Vec::new();
        while let Some(&Reverse((fire_cycle, sequence))) = self.heap.peek() {
            if fire_cycle > now {
                break;
            }
            self.heap.pop();
            if self.cancelled.remove(&sequence) {
                continue;
            }
            if let Some(entry) = self.pending.remove(&sequence) {
                fired.push((entry.token, entry.payload));
            }
        }
        fired
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_cycle_then_fifo_order() {
        let mut sim = EventSimulator::new();
        sim.schedule(0, 3, "third");
        sim.schedule(0, 1, "first");
        sim.schedule(0, 1, "second");
        assert!(sim.drain(0).is_empty());
        let fired: Vec<_> = sim.drain(1).into_iter().map(|(_, p)| p).collect();
        assert_eq!(fired, vec!["first", "second"]);
        let fired: Vec<_> = sim.drain(3).into_iter().map(|(_, p)| p).collect();
        assert_eq!(fired, vec!["third"]);
    }

    #[test]
    fn cancel_suppresses_firing() {
        let mut sim = EventSimulator::new();
        let token = sim.schedule(0, 1, "gone");
        sim.cancel(token);
        assert!(sim.drain(10).is_empty());
    }

    #[test]
    fn drain_is_reentrant_for_future_schedules() {
        let mut sim = EventSimulator::new();
        sim.schedule(0, 1, 1u32);
        let fired = sim.drain(1);
        assert_eq!(fired.len(), 1);
        // A handler reacting to `fired` schedules more work for later.
        sim.schedule(1, 1, 2u32);
        assert!(sim.drain(1).is_empty());
        assert_eq!(sim.drain(2), vec![(EventToken(1), 2u32)]);
    }

    #[test]
    #[should_panic(expected = "at least 1 cycle")]
    fn zero_delay_panics() {
        let mut sim: EventSimulator<()> = EventSimulator::new();
        sim.schedule(0, 0, ());
    }
}
