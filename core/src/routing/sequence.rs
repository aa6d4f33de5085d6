//! Sequence number arithmetic and the per-node counters.
//!
//! AODV decides between two pieces of routing information by comparing
//! destination sequence numbers and, on a tie, hop counts. Counters wrap
//! around, so numbers further apart than [`SEQUENCE_NUMBER_INTERVAL`] are
//! compared modulo the interval instead of numerically.

use crate::constants::{
    BroadcastId, SequenceNumber, FIRST_BROADCAST_ID, FIRST_SEQUENCE_NUMBER, MAX_BROADCAST_ID,
    MAX_SEQUENCE_NUMBER, SEQUENCE_NUMBER_INTERVAL, UNKNOWN_SEQUENCE_NUMBER,
};
use parking_lot::Mutex;
use std::cmp::Ordering;

/// Returns true when `(incoming_seq, incoming_hops)` should replace
/// `(current_seq, current_hops)`.
///
/// Equal sequence numbers with equal hop counts are never "better", which
/// keeps the relation asymmetric. [`UNKNOWN_SEQUENCE_NUMBER`] loses to any
/// known number regardless of hop counts.
pub fn is_better(
    incoming_seq: SequenceNumber,
    incoming_hops: u32,
    current_seq: SequenceNumber,
    current_hops: u32,
) -> bool {
    match (
        incoming_seq == UNKNOWN_SEQUENCE_NUMBER,
        current_seq == UNKNOWN_SEQUENCE_NUMBER,
    ) {
        (true, false) => return false,
        (false, true) => return true,
        _ => {}
    }
    let distance = (i64::from(incoming_seq) - i64::from(current_seq)).abs();
    if distance > i64::from(SEQUENCE_NUMBER_INTERVAL) {
        let incoming_mod = incoming_seq % SEQUENCE_NUMBER_INTERVAL;
        let current_mod = current_seq % SEQUENCE_NUMBER_INTERVAL;
        match incoming_mod.cmp(&current_mod) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match incoming_hops.cmp(&current_hops) {
                Ordering::Less => true,
                Ordering::Greater => false,
                // The smaller raw value is the one that already wrapped.
                Ordering::Equal => incoming_seq < current_seq,
            },
        }
    } else {
        match incoming_seq.cmp(&current_seq) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => incoming_hops < current_hops,
        }
    }
}

/// `incoming` carries the same or newer freshness than `current`.
pub fn is_at_least_as_fresh(incoming: SequenceNumber, current: SequenceNumber) -> bool {
    incoming == current || is_better(incoming, 0, current, 0)
}

/// The fresher of two sequence numbers, wrap-aware and commutative.
pub fn max_sequence_number(a: SequenceNumber, b: SequenceNumber) -> SequenceNumber {
    if is_better(a, 0, b, 0) {
        a
    } else {
        b
    }
}

#[derive(Debug)]
struct CounterState {
    sequence_number: SequenceNumber,
    broadcast_id: BroadcastId,
}

/// Own sequence number and broadcast id of a node.
///
/// Shared by the sender, receiver, hello loop and expiry loop; every read
/// and update goes through one short lock.
#[derive(Debug)]
pub struct NodeCounters {
    state: Mutex<CounterState>,
}

impl Default for NodeCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeCounters {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CounterState {
                sequence_number: FIRST_SEQUENCE_NUMBER,
                broadcast_id: FIRST_BROADCAST_ID,
            }),
        }
    }

    pub fn current_sequence_number(&self) -> SequenceNumber {
        self.state.lock().sequence_number
    }

    /// Increments the own sequence number and returns the new value.
    pub fn next_sequence_number(&self) -> SequenceNumber {
        let mut state = self.state.lock();
        state.sequence_number = advance_sequence_number(state.sequence_number);
        state.sequence_number
    }

    /// Increments the own sequence number only when `expected` equals the
    /// current value, then returns whatever the current value is.
    pub fn bump_if_current(&self, expected: SequenceNumber) -> SequenceNumber {
        let mut state = self.state.lock();
        if state.sequence_number == expected {
            state.sequence_number = advance_sequence_number(state.sequence_number);
        }
        state.sequence_number
    }

    /// Hands out the current broadcast id and advances the counter.
    pub fn next_broadcast_id(&self) -> BroadcastId {
        let mut state = self.state.lock();
        let id = state.broadcast_id;
        state.broadcast_id = if id >= MAX_BROADCAST_ID {
            FIRST_BROADCAST_ID
        } else {
            id + 1
        };
        id
    }
}

fn advance_sequence_number(current: SequenceNumber) -> SequenceNumber {
    if current >= MAX_SEQUENCE_NUMBER || current == UNKNOWN_SEQUENCE_NUMBER {
        FIRST_SEQUENCE_NUMBER
    } else {
        current + 1
    }
}
