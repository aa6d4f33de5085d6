//! Route entries: forward routes and route request records.
//!
//! Both kinds carry a soft deadline that is pushed out whenever the entry is
//! used. Entries are shared as `Arc` handles, so the mutable parts (validity,
//! sequence number, precursors, deadline) sit behind atomics or short locks.

use crate::constants::{
    is_valid_broadcast_id, is_valid_node_address, is_valid_sequence_number, BroadcastId,
    NodeAddress, SequenceNumber,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntryError {
    #[error("invalid {field}: {value}")]
    ConstructionRejected { field: &'static str, value: u32 },
}

/// Common view over forward routes and route requests.
pub trait RouteEntry {
    fn destination_address(&self) -> NodeAddress;
    fn destination_sequence_number(&self) -> SequenceNumber;
    fn hop_count(&self) -> u32;
    /// Instant after which the entry counts as expired.
    fn alive_until(&self) -> Instant;
    /// Pushes the deadline out by the entry's lifetime.
    fn refresh(&self);

    fn is_expired_at(&self, now: Instant) -> bool {
        self.alive_until() <= now
    }
}

#[derive(Debug)]
struct AliveTimer {
    lifetime: Duration,
    deadline: Mutex<Instant>,
}

impl AliveTimer {
    fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            deadline: Mutex::new(Instant::now() + lifetime),
        }
    }

    fn reset(&self) {
        *self.deadline.lock() = Instant::now() + self.lifetime;
    }

    fn deadline(&self) -> Instant {
        *self.deadline.lock()
    }
}

fn check_address(field: &'static str, value: NodeAddress) -> Result<(), EntryError> {
    if is_valid_node_address(value) {
        Ok(())
    } else {
        Err(EntryError::ConstructionRejected { field, value })
    }
}

fn check_sequence_number(field: &'static str, value: SequenceNumber) -> Result<(), EntryError> {
    if is_valid_sequence_number(value) {
        Ok(())
    } else {
        Err(EntryError::ConstructionRejected { field, value })
    }
}

/// A known path towards `destination` through `next_hop`.
#[derive(Debug)]
pub struct ForwardRouteEntry {
    destination: NodeAddress,
    next_hop: NodeAddress,
    hop_count: u32,
    sequence_number: AtomicU32,
    valid: AtomicBool,
    precursors: Mutex<BTreeSet<NodeAddress>>,
    timer: AliveTimer,
}

impl ForwardRouteEntry {
    pub fn new(
        destination: NodeAddress,
        next_hop: NodeAddress,
        hop_count: u32,
        sequence_number: SequenceNumber,
        precursors: impl IntoIterator<Item = NodeAddress>,
        lifetime: Duration,
    ) -> Result<Self, EntryError> {
        check_address("destination address", destination)?;
        check_address("next hop", next_hop)?;
        check_sequence_number("sequence number", sequence_number)?;

        let precursors: BTreeSet<NodeAddress> = precursors.into_iter().collect();
        for &precursor in &precursors {
            check_address("precursor", precursor)?;
        }

        Ok(Self {
            destination,
            next_hop,
            hop_count,
            sequence_number: AtomicU32::new(sequence_number),
            valid: AtomicBool::new(true),
            precursors: Mutex::new(precursors),
            timer: AliveTimer::new(lifetime),
        })
    }

    pub fn next_hop(&self) -> NodeAddress {
        self.next_hop
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Returns the previous validity.
    pub(crate) fn set_valid(&self, valid: bool) -> bool {
        self.valid.swap(valid, Ordering::AcqRel)
    }

    pub(crate) fn set_sequence_number(&self, sequence_number: SequenceNumber) {
        self.sequence_number.store(sequence_number, Ordering::Release);
    }

    /// Adds a neighbor that routes through this node towards `destination`.
    pub fn add_precursor(&self, precursor: NodeAddress) -> bool {
        if !is_valid_node_address(precursor) {
            return false;
        }
        self.precursors.lock().insert(precursor)
    }

    pub fn precursors(&self) -> Vec<NodeAddress> {
        self.precursors.lock().iter().copied().collect()
    }
}

impl RouteEntry for ForwardRouteEntry {
    fn destination_address(&self) -> NodeAddress {
        self.destination
    }

    fn destination_sequence_number(&self) -> SequenceNumber {
        self.sequence_number.load(Ordering::Acquire)
    }

    fn hop_count(&self) -> u32 {
        self.hop_count
    }

    fn alive_until(&self) -> Instant {
        self.timer.deadline()
    }

    fn refresh(&self) {
        self.timer.reset();
    }
}

/// Identifies one route discovery flood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub source: NodeAddress,
    pub broadcast_id: BroadcastId,
}

/// A route request this node has seen or originated.
#[derive(Debug)]
pub struct RouteRequestEntry {
    source: NodeAddress,
    broadcast_id: BroadcastId,
    destination: NodeAddress,
    destination_sequence_number: SequenceNumber,
    hop_count: u32,
    retries_remaining: u32,
    timer: AliveTimer,
}

impl RouteRequestEntry {
    pub fn new(
        source: NodeAddress,
        broadcast_id: BroadcastId,
        destination: NodeAddress,
        destination_sequence_number: SequenceNumber,
        hop_count: u32,
        retries_remaining: u32,
        lifetime: Duration,
    ) -> Result<Self, EntryError> {
        check_address("source address", source)?;
        check_address("destination address", destination)?;
        check_sequence_number("destination sequence number", destination_sequence_number)?;
        if !is_valid_broadcast_id(broadcast_id) {
            return Err(EntryError::ConstructionRejected {
                field: "broadcast id",
                value: broadcast_id,
            });
        }

        Ok(Self {
            source,
            broadcast_id,
            destination,
            destination_sequence_number,
            hop_count,
            retries_remaining,
            timer: AliveTimer::new(lifetime),
        })
    }

    pub fn key(&self) -> RequestKey {
        RequestKey {
            source: self.source,
            broadcast_id: self.broadcast_id,
        }
    }

    pub fn source_address(&self) -> NodeAddress {
        self.source
    }

    pub fn broadcast_id(&self) -> BroadcastId {
        self.broadcast_id
    }

    /// Broadcasts still allowed for this discovery, the current one included.
    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining
    }

    /// The same discovery under a new broadcast id with one attempt fewer.
    ///
    /// Returns `Ok(None)` once the attempts are used up.
    pub fn reissue(
        &self,
        broadcast_id: BroadcastId,
        lifetime: Duration,
    ) -> Result<Option<Self>, EntryError> {
        let remaining = self.retries_remaining.saturating_sub(1);
        if remaining == 0 {
            return Ok(None);
        }
        Self::new(
            self.source,
            broadcast_id,
            self.destination,
            self.destination_sequence_number,
            self.hop_count,
            remaining,
            lifetime,
        )
        .map(Some)
    }
}

impl RouteEntry for RouteRequestEntry {
    fn destination_address(&self) -> NodeAddress {
        self.destination
    }

    fn destination_sequence_number(&self) -> SequenceNumber {
        self.destination_sequence_number
    }

    fn hop_count(&self) -> u32 {
        self.hop_count
    }

    fn alive_until(&self) -> Instant {
        self.timer.deadline()
    }

    fn refresh(&self) {
        self.timer.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{BROADCAST_ADDRESS, MAX_SEQUENCE_NUMBER};

    const LIFETIME: Duration = Duration::from_millis(3000);

    #[test]
    fn test_forward_route_rejects_bad_fields() {
        assert!(ForwardRouteEntry::new(BROADCAST_ADDRESS, 1, 1, 0, [], LIFETIME).is_err());
        assert!(ForwardRouteEntry::new(1, 300, 1, 0, [], LIFETIME).is_err());
        assert!(ForwardRouteEntry::new(1, 2, 1, MAX_SEQUENCE_NUMBER + 1, [], LIFETIME).is_err());
        assert_eq!(
            ForwardRouteEntry::new(1, 2, 1, 0, [BROADCAST_ADDRESS], LIFETIME).unwrap_err(),
            EntryError::ConstructionRejected {
                field: "precursor",
                value: BROADCAST_ADDRESS
            }
        );
    }

    #[test]
    fn test_precursors_are_deduplicated() {
        let route = ForwardRouteEntry::new(5, 2, 2, 4, [3, 3, 1], LIFETIME).unwrap();
        assert_eq!(route.precursors(), vec![1, 3]);
        assert!(route.add_precursor(7));
        assert!(!route.add_precursor(7));
        assert!(!route.add_precursor(BROADCAST_ADDRESS));
        assert_eq!(route.precursors(), vec![1, 3, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_pushes_deadline() {
        let route = ForwardRouteEntry::new(5, 2, 2, 4, [], LIFETIME).unwrap();
        let first = route.alive_until();

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(!route.is_expired_at(Instant::now()));
        route.refresh();
        assert_eq!(route.alive_until(), first + Duration::from_millis(1000));

        tokio::time::advance(LIFETIME).await;
        assert!(route.is_expired_at(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reissue_consumes_one_attempt() {
        let request = RouteRequestEntry::new(1, 0, 9, 0, 0, 2, LIFETIME).unwrap();

        let second = request.reissue(1, LIFETIME).unwrap().unwrap();
        assert_eq!(second.broadcast_id(), 1);
        assert_eq!(second.retries_remaining(), 1);
        assert_eq!(second.destination_address(), 9);

        assert!(second.reissue(2, LIFETIME).unwrap().is_none());
    }
}
