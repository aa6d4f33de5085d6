//! Forward route table: destination → next hop.
//!
//! Lookups that succeed count as use of the route and push its expiry out.
//! Every route has the same lifetime, so the least recently refreshed entry
//! of the LRU order is also the next one to expire.

use super::entry::{ForwardRouteEntry, RouteEntry};
use super::sequence::{is_better, max_sequence_number};
use crate::constants::{NodeAddress, SequenceNumber};
use lru::LruCache;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a forward route lookup.
#[derive(Debug, Clone)]
pub enum RouteLookup {
    Found(Arc<ForwardRouteEntry>),
    /// Entry exists but was invalidated; kept for its sequence number and precursors.
    Invalid(Arc<ForwardRouteEntry>),
    NotFound,
}

impl RouteLookup {
    pub fn is_found(&self) -> bool {
        matches!(self, RouteLookup::Found(_))
    }
}

/// Point-in-time copy of a forward route for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSnapshot {
    pub destination: NodeAddress,
    pub next_hop: NodeAddress,
    pub hop_count: u32,
    pub sequence_number: SequenceNumber,
    pub valid: bool,
    pub precursors: Vec<NodeAddress>,
    pub expires_in: Duration,
}

#[derive(Debug)]
struct Inner {
    /// Least recently refreshed first.
    entries: LruCache<NodeAddress, Arc<ForwardRouteEntry>>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            entries: LruCache::unbounded(),
        }
    }
}

impl Inner {
    fn insert(&mut self, entry: ForwardRouteEntry) {
        self.entries.put(entry.destination_address(), Arc::new(entry));
    }

    fn set_valid(
        &mut self,
        destination: NodeAddress,
        sequence_number: SequenceNumber,
        valid: bool,
    ) -> Option<bool> {
        // `get` promotes the entry along with the refresh below.
        let entry = self.entries.get(&destination)?;
        let was_valid = entry.set_valid(valid);
        entry.set_sequence_number(max_sequence_number(
            entry.destination_sequence_number(),
            sequence_number,
        ));
        entry.refresh();
        Some(was_valid)
    }
}

#[derive(Debug, Default)]
pub struct ForwardRouteTable {
    inner: Mutex<Inner>,
}

impl ForwardRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new route. Fails when one already exists for the destination.
    pub fn add(&self, entry: ForwardRouteEntry) -> bool {
        let mut inner = self.inner.lock();
        if inner.entries.contains(&entry.destination_address()) {
            return false;
        }
        inner.insert(entry);
        true
    }

    /// Looks up a route and counts the lookup as use of it.
    pub fn get(&self, destination: NodeAddress) -> RouteLookup {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.peek(&destination).cloned() else {
            return RouteLookup::NotFound;
        };
        if !entry.is_valid() {
            return RouteLookup::Invalid(entry);
        }
        entry.refresh();
        inner.entries.promote(&destination);
        RouteLookup::Found(entry)
    }

    /// Looks up a route without refreshing it.
    pub fn peek(&self, destination: NodeAddress) -> Option<Arc<ForwardRouteEntry>> {
        self.inner.lock().entries.peek(&destination).cloned()
    }

    /// Replaces `old` with `new` when `new` carries better information.
    ///
    /// Fails when `old` is no longer the stored route for its destination.
    pub fn update(&self, old: &ForwardRouteEntry, new: ForwardRouteEntry) -> bool {
        let mut inner = self.inner.lock();
        let Some(current) = inner.entries.peek(&new.destination_address()) else {
            return false;
        };
        if !std::ptr::eq(current.as_ref(), old)
            || !is_better(
                new.destination_sequence_number(),
                new.hop_count(),
                current.destination_sequence_number(),
                current.hop_count(),
            )
        {
            return false;
        }
        inner.insert(new);
        true
    }

    /// Replaces the route for `new`'s destination unconditionally.
    pub fn replace(&self, new: ForwardRouteEntry) -> bool {
        let mut inner = self.inner.lock();
        if !inner.entries.contains(&new.destination_address()) {
            return false;
        }
        inner.insert(new);
        true
    }

    /// Sets validity and refreshes the route. The sequence number only moves forward.
    ///
    /// Returns the previous validity, or `None` for an unknown destination.
    pub fn set_valid(
        &self,
        destination: NodeAddress,
        sequence_number: SequenceNumber,
        valid: bool,
    ) -> Option<bool> {
        self.inner
            .lock()
            .set_valid(destination, sequence_number, valid)
    }

    pub fn remove(&self, destination: NodeAddress) -> bool {
        self.inner.lock().entries.pop(&destination).is_some()
    }

    pub fn next_to_expire(&self) -> Option<Arc<ForwardRouteEntry>> {
        self.inner
            .lock()
            .entries
            .peek_lru()
            .map(|(_, entry)| entry.clone())
    }

    /// Marks every route whose next hop is `next_hop` invalid.
    ///
    /// Returns each affected route with its validity before the change.
    pub fn find_routes_via(&self, next_hop: NodeAddress) -> Vec<(Arc<ForwardRouteEntry>, bool)> {
        let mut inner = self.inner.lock();
        let matches: Vec<Arc<ForwardRouteEntry>> = inner
            .entries
            .iter()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.next_hop() == next_hop)
            .cloned()
            .collect();
        matches
            .into_iter()
            .map(|entry| {
                let was_valid = inner
                    .set_valid(
                        entry.destination_address(),
                        entry.destination_sequence_number(),
                        false,
                    )
                    .unwrap_or(false);
                (entry, was_valid)
            })
            .collect()
    }

    pub fn last_known_sequence_number(&self, destination: NodeAddress) -> Option<SequenceNumber> {
        self.peek(destination)
            .map(|entry| entry.destination_sequence_number())
    }

    pub fn precursors(&self, destination: NodeAddress) -> Vec<NodeAddress> {
        self.peek(destination)
            .map(|entry| entry.precursors())
            .unwrap_or_default()
    }

    pub fn contains(&self, destination: NodeAddress) -> bool {
        self.inner.lock().entries.contains(&destination)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<RouteSnapshot> {
        let now = Instant::now();
        let inner = self.inner.lock();
        let mut routes: Vec<RouteSnapshot> = inner
            .entries
            .iter()
            .map(|(_, entry)| RouteSnapshot {
                destination: entry.destination_address(),
                next_hop: entry.next_hop(),
                hop_count: entry.hop_count(),
                sequence_number: entry.destination_sequence_number(),
                valid: entry.is_valid(),
                precursors: entry.precursors(),
                expires_in: entry.alive_until().saturating_duration_since(now),
            })
            .collect();
        routes.sort_by_key(|route| route.destination);
        routes
    }
}
