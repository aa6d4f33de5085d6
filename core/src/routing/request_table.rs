//! Route request table keyed by (originator, broadcast id).
//!
//! Serves two purposes: suppressing duplicate RREQs during the discovery
//! window, and driving retries of this node's own discoveries. An entry
//! only takes part in expiry once its timer is armed; own requests are armed
//! when the RREQ actually leaves the node. Unarmed entries wait in a side map
//! and move into the LRU order when armed.

use super::entry::{RequestKey, RouteEntry, RouteRequestEntry};
use crate::constants::{BroadcastId, NodeAddress, SequenceNumber};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Point-in-time copy of a route request for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSnapshot {
    pub source: NodeAddress,
    pub broadcast_id: BroadcastId,
    pub destination: NodeAddress,
    pub destination_sequence_number: SequenceNumber,
    pub hop_count: u32,
    pub retries_remaining: u32,
    pub armed: bool,
    pub expires_in: Option<Duration>,
}

#[derive(Debug)]
struct Inner {
    unarmed: HashMap<RequestKey, Arc<RouteRequestEntry>>,
    /// Least recently armed first.
    armed: LruCache<RequestKey, Arc<RouteRequestEntry>>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            unarmed: HashMap::new(),
            armed: LruCache::unbounded(),
        }
    }
}

impl Inner {
    fn contains(&self, key: &RequestKey) -> bool {
        self.unarmed.contains_key(key) || self.armed.contains(key)
    }
}

#[derive(Debug, Default)]
pub struct RouteRequestTable {
    inner: Mutex<Inner>,
}

impl RouteRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request. Fails when the key is already known.
    pub fn add(&self, entry: RouteRequestEntry, arm: bool) -> bool {
        let mut inner = self.inner.lock();
        let key = entry.key();
        if inner.contains(&key) {
            return false;
        }
        if arm {
            inner.armed.put(key, Arc::new(entry));
        } else {
            inner.unarmed.insert(key, Arc::new(entry));
        }
        true
    }

    /// Starts (or restarts) the expiry timer of a recorded request.
    pub fn arm_timer(&self, source: NodeAddress, broadcast_id: BroadcastId) -> bool {
        let key = RequestKey {
            source,
            broadcast_id,
        };
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.armed.get(&key) {
            entry.refresh();
            return true;
        }
        let Some(entry) = inner.unarmed.remove(&key) else {
            return false;
        };
        entry.refresh();
        inner.armed.put(key, entry);
        true
    }

    pub fn contains(&self, source: NodeAddress, broadcast_id: BroadcastId) -> bool {
        self.inner.lock().contains(&RequestKey {
            source,
            broadcast_id,
        })
    }

    pub fn get(&self, key: &RequestKey) -> Option<Arc<RouteRequestEntry>> {
        let inner = self.inner.lock();
        inner
            .armed
            .peek(key)
            .or_else(|| inner.unarmed.get(key))
            .cloned()
    }

    pub fn remove(&self, key: &RequestKey) -> Option<Arc<RouteRequestEntry>> {
        let mut inner = self.inner.lock();
        inner.armed.pop(key).or_else(|| inner.unarmed.remove(key))
    }

    /// Head of the armed entries; unarmed requests never expire.
    pub fn next_to_expire(&self) -> Option<Arc<RouteRequestEntry>> {
        self.inner
            .lock()
            .armed
            .peek_lru()
            .map(|(_, entry)| entry.clone())
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.armed.len() + inner.unarmed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<RequestSnapshot> {
        let now = Instant::now();
        let inner = self.inner.lock();
        let armed = inner.armed.iter().map(|(key, entry)| (key, entry, true));
        let unarmed = inner.unarmed.iter().map(|(key, entry)| (key, entry, false));
        let mut requests: Vec<RequestSnapshot> = armed
            .chain(unarmed)
            .map(|(key, entry, armed)| RequestSnapshot {
                source: key.source,
                broadcast_id: key.broadcast_id,
                destination: entry.destination_address(),
                destination_sequence_number: entry.destination_sequence_number(),
                hop_count: entry.hop_count(),
                retries_remaining: entry.retries_remaining(),
                armed,
                expires_in: armed.then(|| entry.alive_until().saturating_duration_since(now)),
            })
            .collect();
        requests.sort_by_key(|request| (request.source, request.broadcast_id));
        requests
    }
}
