//! Route table manager: owns both tables and runs the expiry loop.
//!
//! Every route change that matters to another task goes out from here:
//! application notifications to the notifier queue, and control messages
//! (RREQ retries, RERRs, route-available signals) to the sender.

use super::entry::{ForwardRouteEntry, RouteEntry, RouteRequestEntry};
use super::forward_table::{ForwardRouteTable, RouteLookup, RouteSnapshot};
use super::request_table::{RequestSnapshot, RouteRequestTable};
use super::sequence::{is_at_least_as_fresh, NodeCounters};
use crate::config::ProtocolConfig;
use crate::constants::{BroadcastId, NodeAddress, SequenceNumber};
use crate::notify::Notification;
use crate::pdu::{RouteError, RouteRequest};
use crate::queue::WakeQueue;
use crate::sender::{ControlMessage, OutboundQueues};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

pub(crate) struct RouteTableManager {
    node_address: NodeAddress,
    config: ProtocolConfig,
    forward: ForwardRouteTable,
    requests: RouteRequestTable,
    counters: Arc<NodeCounters>,
    outbound: Arc<OutboundQueues>,
    notifications: Arc<WakeQueue<Notification>>,
    /// Wakes the expiry loop when an earlier deadline may exist.
    timer_wake: Notify,
}

impl RouteTableManager {
    pub(crate) fn new(
        node_address: NodeAddress,
        config: ProtocolConfig,
        counters: Arc<NodeCounters>,
        outbound: Arc<OutboundQueues>,
        notifications: Arc<WakeQueue<Notification>>,
    ) -> Self {
        Self {
            node_address,
            config,
            forward: ForwardRouteTable::new(),
            requests: RouteRequestTable::new(),
            counters,
            outbound,
            notifications,
            timer_wake: Notify::new(),
        }
    }

    // ---- forward routes -------------------------------------------------

    pub(crate) fn create_forward_route(
        &self,
        destination: NodeAddress,
        next_hop: NodeAddress,
        sequence_number: SequenceNumber,
        hop_count: u32,
        precursors: Vec<NodeAddress>,
    ) -> bool {
        let Some(entry) = self.build_route(destination, next_hop, sequence_number, hop_count, precursors)
        else {
            return false;
        };
        if !self.forward.add(entry) {
            return false;
        }
        tracing::debug!(
            "Node {}: route to {} via {} ({} hops, seq {})",
            self.node_address,
            destination,
            next_hop,
            hop_count,
            sequence_number
        );
        self.timer_wake.notify_one();
        self.route_available(destination);
        true
    }

    /// Replaces `old` when the new information is better.
    pub(crate) fn update_forward_route(
        &self,
        old: &ForwardRouteEntry,
        next_hop: NodeAddress,
        sequence_number: SequenceNumber,
        hop_count: u32,
        precursors: Vec<NodeAddress>,
    ) -> bool {
        let destination = old.destination_address();
        let Some(entry) = self.build_route(destination, next_hop, sequence_number, hop_count, precursors)
        else {
            return false;
        };
        if !self.forward.update(old, entry) {
            return false;
        }
        self.timer_wake.notify_one();
        self.outbound
            .push_control(ControlMessage::RouteCreated(destination));
        true
    }

    /// Swaps an invalidated route for a fresh path.
    pub(crate) fn replace_invalid_route(
        &self,
        destination: NodeAddress,
        next_hop: NodeAddress,
        sequence_number: SequenceNumber,
        hop_count: u32,
        precursors: Vec<NodeAddress>,
    ) -> bool {
        let Some(entry) = self.build_route(destination, next_hop, sequence_number, hop_count, precursors)
        else {
            return false;
        };
        if !self.forward.replace(entry) {
            return false;
        }
        self.timer_wake.notify_one();
        self.route_available(destination);
        true
    }

    fn build_route(
        &self,
        destination: NodeAddress,
        next_hop: NodeAddress,
        sequence_number: SequenceNumber,
        hop_count: u32,
        precursors: Vec<NodeAddress>,
    ) -> Option<ForwardRouteEntry> {
        match ForwardRouteEntry::new(
            destination,
            next_hop,
            hop_count,
            sequence_number,
            precursors,
            self.config.route_alive_time(),
        ) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!("Rejected route to {}: {}", destination, err);
                None
            }
        }
    }

    pub(crate) fn forward_route(&self, destination: NodeAddress) -> RouteLookup {
        self.forward.get(destination)
    }

    /// Marks a route valid; a route coming back from invalid counts as new.
    pub(crate) fn set_valid(&self, destination: NodeAddress, sequence_number: SequenceNumber) -> bool {
        match self.forward.set_valid(destination, sequence_number, true) {
            Some(was_valid) => {
                if !was_valid {
                    self.timer_wake.notify_one();
                    self.route_available(destination);
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_invalid(&self, destination: NodeAddress, sequence_number: SequenceNumber) -> bool {
        match self.forward.set_valid(destination, sequence_number, false) {
            Some(was_valid) => {
                if was_valid {
                    self.route_lost(destination);
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn last_known_sequence_number(&self, destination: NodeAddress) -> Option<SequenceNumber> {
        self.forward.last_known_sequence_number(destination)
    }

    /// A valid route exists whose sequence number is at least `sequence_number`.
    pub(crate) fn valid_forward_route_exists(
        &self,
        destination: NodeAddress,
        sequence_number: SequenceNumber,
    ) -> bool {
        self.forward.peek(destination).is_some_and(|route| {
            route.is_valid()
                && is_at_least_as_fresh(route.destination_sequence_number(), sequence_number)
        })
    }

    pub(crate) fn forward_routes(&self) -> Vec<RouteSnapshot> {
        self.forward.snapshot()
    }

    fn route_available(&self, destination: NodeAddress) {
        self.notifications
            .push(Notification::RouteEstablished { destination });
        self.outbound
            .push_control(ControlMessage::RouteCreated(destination));
    }

    fn route_lost(&self, destination: NodeAddress) {
        tracing::debug!("Node {}: route to {} invalidated", self.node_address, destination);
        self.notifications
            .push(Notification::RouteInvalidated { destination });
    }

    // ---- route requests -------------------------------------------------

    /// Records a request; `arm` starts its expiry timer right away.
    pub(crate) fn create_route_request(&self, rreq: &RouteRequest, arm: bool) -> bool {
        let entry = match RouteRequestEntry::new(
            rreq.source_address,
            rreq.broadcast_id,
            rreq.destination_address,
            rreq.destination_sequence_number,
            rreq.hop_count,
            self.config.max_rreq_retries,
            self.config.path_discovery_time(),
        ) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!("Rejected route request from {}: {}", rreq.source_address, err);
                return false;
            }
        };
        if !self.requests.add(entry, arm) {
            return false;
        }
        if arm {
            self.timer_wake.notify_one();
        }
        true
    }

    pub(crate) fn arm_route_request(&self, source: NodeAddress, broadcast_id: BroadcastId) -> bool {
        let armed = self.requests.arm_timer(source, broadcast_id);
        if armed {
            self.timer_wake.notify_one();
        }
        armed
    }

    pub(crate) fn route_request_exists(&self, source: NodeAddress, broadcast_id: BroadcastId) -> bool {
        self.requests.contains(source, broadcast_id)
    }

    pub(crate) fn route_requests(&self) -> Vec<RequestSnapshot> {
        self.requests.snapshot()
    }

    pub(crate) fn discovery_failed(&self, destination: NodeAddress) {
        tracing::info!(
            "Node {}: no route to {} after {} attempts",
            self.node_address,
            destination,
            self.config.max_rreq_retries
        );
        self.outbound
            .push_control(ControlMessage::DiscoveryFailed(destination));
        self.notifications
            .push(Notification::RouteEstablishmentFailed { destination });
    }

    // ---- expiry ---------------------------------------------------------

    fn next_deadline(&self) -> Option<Instant> {
        let request = self.requests.next_to_expire().map(|e| e.alive_until());
        let route = self.forward.next_to_expire().map(|e| e.alive_until());
        request.into_iter().chain(route).min()
    }

    pub(crate) async fn run_expiry_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                _ = crate::node::stopped(&mut shutdown) => break,
                _ = self.timer_wake.notified() => {}
                _ = sleep_until(deadline) => {}
            }

            let now = Instant::now();
            self.expire_route_requests(now);
            self.expire_forward_routes(now);
        }
    }

    fn expire_route_requests(&self, now: Instant) {
        while let Some(entry) = self.requests.next_to_expire() {
            if entry.alive_until() > now {
                break;
            }
            self.requests.remove(&entry.key());
            if entry.source_address() != self.node_address {
                continue;
            }

            let destination = entry.destination_address();
            if self.valid_forward_route_exists(destination, entry.destination_sequence_number()) {
                // The reply arrived; make sure the sender is not still waiting.
                self.outbound
                    .push_control(ControlMessage::RouteCreated(destination));
                continue;
            }
            self.retry_discovery(&entry);
        }
    }

    fn retry_discovery(&self, expired: &RouteRequestEntry) {
        let destination = expired.destination_address();
        if expired.retries_remaining() <= 1 {
            self.discovery_failed(destination);
            return;
        }

        let broadcast_id = self.counters.next_broadcast_id();
        let next = match expired.reissue(broadcast_id, self.config.path_discovery_time()) {
            Ok(Some(next)) => next,
            Ok(None) => {
                self.discovery_failed(destination);
                return;
            }
            Err(err) => {
                tracing::warn!("Cannot reissue request for {}: {}", destination, err);
                self.discovery_failed(destination);
                return;
            }
        };

        let rreq = RouteRequest::new(
            self.node_address,
            destination,
            self.counters.current_sequence_number(),
            next.destination_sequence_number(),
            broadcast_id,
        );
        if self.requests.add(next, false) {
            tracing::debug!(
                "Node {}: retrying discovery for {} (broadcast id {})",
                self.node_address,
                destination,
                broadcast_id
            );
            self.outbound.push_control(ControlMessage::RouteRequest(rreq));
        } else {
            self.discovery_failed(destination);
        }
    }

    fn expire_forward_routes(&self, now: Instant) {
        while let Some(route) = self.forward.next_to_expire() {
            if route.alive_until() > now {
                break;
            }
            let destination = route.destination_address();
            if route.is_valid() {
                self.set_invalid(destination, route.destination_sequence_number());
                if route.hop_count() == 1 {
                    self.report_broken_link(destination);
                }
            } else {
                self.forward.remove(destination);
                tracing::debug!("Node {}: removed stale route to {}", self.node_address, destination);
            }
        }
    }

    /// Invalidates everything routed through `neighbor` and warns the precursors.
    fn report_broken_link(&self, neighbor: NodeAddress) {
        for (route, was_valid) in self.forward.find_routes_via(neighbor) {
            let destination = route.destination_address();
            if was_valid {
                self.route_lost(destination);
            }
            let recipients = route.precursors();
            if recipients.is_empty() {
                continue;
            }
            self.outbound.push_control(ControlMessage::RouteError {
                rerr: RouteError {
                    unreachable_address: destination,
                    unreachable_sequence_number: route.destination_sequence_number(),
                },
                recipients,
            });
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Harness {
        manager: Arc<RouteTableManager>,
        outbound: Arc<OutboundQueues>,
        notifications: Arc<WakeQueue<Notification>>,
    }

    fn harness() -> Harness {
        let outbound = Arc::new(OutboundQueues::new());
        let notifications = Arc::new(WakeQueue::new());
        let manager = Arc::new(RouteTableManager::new(
            1,
            ProtocolConfig::default(),
            Arc::new(NodeCounters::new()),
            outbound.clone(),
            notifications.clone(),
        ));
        Harness {
            manager,
            outbound,
            notifications,
        }
    }

    fn drain_control(outbound: &OutboundQueues) -> Vec<ControlMessage> {
        std::iter::from_fn(|| outbound.pop_control()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_route_signals_sender_and_app() {
        let h = harness();
        assert!(h.manager.create_forward_route(2, 2, 0, 1, vec![]));
        assert!(!h.manager.create_forward_route(2, 3, 5, 1, vec![]));

        assert_eq!(
            h.notifications.try_pop(),
            Some(Notification::RouteEstablished { destination: 2 })
        );
        assert_eq!(drain_control(&h.outbound), vec![ControlMessage::RouteCreated(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_route_rejected_quietly() {
        let h = harness();
        assert!(!h.manager.create_forward_route(255, 2, 0, 1, vec![]));
        assert!(h.notifications.try_pop().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidation_counts_as_new_route() {
        let h = harness();
        h.manager.create_forward_route(2, 2, 0, 1, vec![]);
        drain_control(&h.outbound);
        h.notifications.try_pop();

        assert!(h.manager.set_invalid(2, 4));
        assert_eq!(
            h.notifications.try_pop(),
            Some(Notification::RouteInvalidated { destination: 2 })
        );
        assert!(h.manager.set_valid(2, 5));
        assert_eq!(drain_control(&h.outbound), vec![ControlMessage::RouteCreated(2)]);
        assert!(h.manager.valid_forward_route_exists(2, 5));
        assert!(!h.manager.valid_forward_route_exists(2, 6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_neighbor_sends_rerr_to_precursors() {
        let h = harness();
        let config = ProtocolConfig::default();
        h.manager.create_forward_route(2, 2, 3, 1, vec![]);
        h.manager.create_forward_route(7, 2, 9, 3, vec![4]);
        drain_control(&h.outbound);

        tokio::time::advance(config.route_alive_time()).await;
        h.manager.expire_forward_routes(Instant::now());

        let control = drain_control(&h.outbound);
        assert_eq!(
            control,
            vec![ControlMessage::RouteError {
                rerr: RouteError {
                    unreachable_address: 7,
                    unreachable_sequence_number: 9,
                },
                recipients: vec![4],
            }]
        );
        assert!(!h.manager.valid_forward_route_exists(7, 0));

        // Second lifetime: invalid routes are removed.
        tokio::time::advance(config.route_alive_time()).await;
        h.manager.expire_forward_routes(Instant::now());
        assert!(h.manager.forward_routes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_request_retries_then_fails_once() {
        let h = harness();
        let config = ProtocolConfig::default();
        let rreq = RouteRequest::new(1, 9, 2, 0, 0);
        assert!(h.manager.create_route_request(&rreq, false));

        // Unarmed: nothing happens however long we wait.
        tokio::time::advance(config.path_discovery_time() * 2).await;
        h.manager.expire_route_requests(Instant::now());
        assert!(drain_control(&h.outbound).is_empty());

        h.manager.arm_route_request(1, 0);
        tokio::time::advance(config.path_discovery_time()).await;
        h.manager.expire_route_requests(Instant::now());
        let control = drain_control(&h.outbound);
        let ControlMessage::RouteRequest(retry) = &control[0] else {
            panic!("expected a reissued RREQ, got {:?}", control);
        };
        assert_eq!(retry.destination_address, 9);
        assert_eq!(h.manager.route_requests().len(), 1);
        assert!(!h.manager.route_requests()[0].armed);

        h.manager.arm_route_request(1, retry.broadcast_id);
        tokio::time::advance(config.path_discovery_time()).await;
        h.manager.expire_route_requests(Instant::now());
        assert_eq!(drain_control(&h.outbound), vec![ControlMessage::DiscoveryFailed(9)]);
        assert_eq!(
            h.notifications.try_pop(),
            Some(Notification::RouteEstablishmentFailed { destination: 9 })
        );
        assert!(h.manager.route_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_request_just_expires() {
        let h = harness();
        let rreq = RouteRequest::new(5, 9, 2, 0, 3);
        assert!(h.manager.create_route_request(&rreq, true));
        assert!(h.manager.route_request_exists(5, 3));

        tokio::time::advance(Duration::from_millis(3000)).await;
        h.manager.expire_route_requests(Instant::now());
        assert!(!h.manager.route_request_exists(5, 3));
        assert!(drain_control(&h.outbound).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_loop_runs_until_stopped() {
        let h = harness();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(h.manager.clone().run_expiry_loop(stop_rx));

        h.manager.create_forward_route(2, 2, 0, 1, vec![]);
        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert!(!h.manager.valid_forward_route_exists(2, 0));

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
