//! Sender task: drains the outbound queues onto the transport.
//!
//! Three queues feed the sender:
//! - application packets originated here, held back while a route discovery
//!   for the head packet is in flight
//! - user data being relayed for other nodes
//! - control messages (hello, RREQ, RREP, RERR) plus two internal signals
//!   that release the application queue
//!
//! Each round drains them in that order.

use crate::constants::{
    is_valid_node_address, NodeAddress, PacketId, SequenceNumber, BROADCAST_ADDRESS,
    UNKNOWN_SEQUENCE_NUMBER,
};
use crate::notify::Notification;
use crate::pdu::{Hello, RouteError, RouteReply, RouteRequest, UserData};
use crate::queue::WakeQueue;
use crate::routing::manager::RouteTableManager;
use crate::routing::{NodeCounters, RouteLookup};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::{Instant, MissedTickBehavior};

/// Work items for the control queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ControlMessage {
    Hello(Hello),
    RouteRequest(RouteRequest),
    RouteReply(RouteReply),
    RouteError {
        rerr: RouteError,
        recipients: Vec<NodeAddress>,
    },
    /// Discovery for this destination gave up; drop its waiting packets.
    DiscoveryFailed(NodeAddress),
    /// A usable route to this destination appeared.
    RouteCreated(NodeAddress),
}

#[derive(Debug, Clone)]
pub(crate) struct ApplicationPacket {
    pub packet_id: PacketId,
    pub data: UserData,
}

#[derive(Debug, Default)]
struct QueueState {
    from_node: VecDeque<ApplicationPacket>,
    to_forward: VecDeque<UserData>,
    control: VecDeque<ControlMessage>,
}

/// Queue depths for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepths {
    pub inbound: usize,
    pub application: usize,
    pub forward: usize,
    pub control: usize,
}

#[derive(Debug, Default)]
pub(crate) struct OutboundQueues {
    state: Mutex<QueueState>,
    wake: Notify,
}

impl OutboundQueues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_application(&self, packet: ApplicationPacket) {
        self.state.lock().from_node.push_back(packet);
        self.wake.notify_one();
    }

    pub(crate) fn push_forward(&self, data: UserData) {
        self.state.lock().to_forward.push_back(data);
        self.wake.notify_one();
    }

    pub(crate) fn push_control(&self, message: ControlMessage) {
        self.state.lock().control.push_back(message);
        self.wake.notify_one();
    }

    pub(crate) fn depths(&self) -> QueueDepths {
        let state = self.state.lock();
        QueueDepths {
            inbound: 0,
            application: state.from_node.len(),
            forward: state.to_forward.len(),
            control: state.control.len(),
        }
    }

    fn pop_application(&self) -> Option<ApplicationPacket> {
        self.state.lock().from_node.pop_front()
    }

    /// Puts a packet back at the head; only the sender task pops this queue.
    fn restore_application(&self, packet: ApplicationPacket) {
        self.state.lock().from_node.push_front(packet);
    }

    fn pop_forward(&self) -> Option<UserData> {
        self.state.lock().to_forward.pop_front()
    }

    pub(crate) fn pop_control(&self) -> Option<ControlMessage> {
        self.state.lock().control.pop_front()
    }

    fn purge_application(&self, destination: NodeAddress) -> usize {
        let mut state = self.state.lock();
        let before = state.from_node.len();
        state
            .from_node
            .retain(|packet| packet.data.destination_address != destination);
        before - state.from_node.len()
    }

    fn purge_forward(&self, destination: NodeAddress) -> usize {
        let mut state = self.state.lock();
        let before = state.to_forward.len();
        state
            .to_forward
            .retain(|data| data.destination_address != destination);
        before - state.to_forward.len()
    }

    fn has_work(&self, application_gated: bool) -> bool {
        let state = self.state.lock();
        !state.control.is_empty()
            || !state.to_forward.is_empty()
            || (!application_gated && !state.from_node.is_empty())
    }

    async fn ready(&self, application_gated: bool) {
        loop {
            if self.has_work(application_gated) {
                return;
            }
            self.wake.notified().await;
        }
    }
}

enum DataOutcome {
    Sent,
    Dropped,
    AwaitingRoute,
    InvalidDestination,
    TooLarge,
}

pub(crate) struct Sender {
    node_address: NodeAddress,
    max_payload_size: usize,
    queues: Arc<OutboundQueues>,
    routes: Arc<RouteTableManager>,
    counters: Arc<NodeCounters>,
    notifications: Arc<WakeQueue<Notification>>,
    transport: Arc<dyn Transport>,
    /// Destination whose discovery currently blocks the application queue.
    awaiting_route: Option<NodeAddress>,
}

impl Sender {
    pub(crate) fn new(
        node_address: NodeAddress,
        max_payload_size: usize,
        queues: Arc<OutboundQueues>,
        routes: Arc<RouteTableManager>,
        counters: Arc<NodeCounters>,
        notifications: Arc<WakeQueue<Notification>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            node_address,
            max_payload_size,
            queues,
            routes,
            counters,
            notifications,
            transport,
            awaiting_route: None,
        }
    }

    pub(crate) async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Sender of node {} started", self.node_address);
        loop {
            tokio::select! {
                _ = crate::node::stopped(&mut shutdown) => break,
                _ = self.queues.ready(self.awaiting_route.is_some()) => {}
            }

            if self.awaiting_route.is_none() {
                self.drain_application().await;
            }
            self.drain_forward().await;
            self.drain_control().await;
        }
        tracing::debug!("Sender of node {} stopped", self.node_address);
    }

    async fn drain_application(&mut self) {
        while self.awaiting_route.is_none() {
            let Some(packet) = self.queues.pop_application() else {
                break;
            };
            let packet_id = packet.packet_id;
            match self.send_user_data(&packet.data).await {
                DataOutcome::Sent => {
                    self.notifications
                        .push(Notification::SendSucceeded { packet_id });
                }
                DataOutcome::InvalidDestination => {
                    self.notifications
                        .push(Notification::InvalidDestination { packet_id });
                }
                DataOutcome::TooLarge => {
                    self.notifications
                        .push(Notification::PayloadTooLarge { packet_id });
                }
                DataOutcome::Dropped => {}
                DataOutcome::AwaitingRoute => self.queues.restore_application(packet),
            }
        }
    }

    async fn drain_forward(&mut self) {
        while let Some(data) = self.queues.pop_forward() {
            match self.send_user_data(&data).await {
                DataOutcome::Sent => {}
                DataOutcome::AwaitingRoute => tracing::debug!(
                    "No route to {}, dropping packet from {}",
                    data.destination_address,
                    data.source_address
                ),
                _ => tracing::debug!(
                    "Dropping undeliverable packet {} -> {}",
                    data.source_address,
                    data.destination_address
                ),
            }
        }
    }

    async fn drain_control(&mut self) {
        while let Some(message) = self.queues.pop_control() {
            match message {
                ControlMessage::Hello(hello) => {
                    self.transmit(BROADCAST_ADDRESS, hello.to_bytes()).await;
                }
                ControlMessage::RouteRequest(rreq) => {
                    self.transmit(BROADCAST_ADDRESS, rreq.to_bytes()).await;
                    if rreq.source_address == self.node_address {
                        // Retry timing starts when the request actually leaves.
                        self.routes
                            .arm_route_request(rreq.source_address, rreq.broadcast_id);
                    }
                }
                ControlMessage::RouteReply(rrep) => {
                    self.send_via_route(rrep.source_address, rrep.to_bytes(), "RREP")
                        .await;
                }
                ControlMessage::RouteError { rerr, recipients } => {
                    let frame = rerr.to_bytes();
                    for recipient in recipients {
                        self.send_via_route(recipient, frame.clone(), "RERR").await;
                    }
                }
                ControlMessage::DiscoveryFailed(destination) => {
                    let purged = self.queues.purge_application(destination);
                    tracing::info!(
                        "Discovery for {} failed, dropped {} queued packets",
                        destination,
                        purged
                    );
                    self.release(destination);
                }
                ControlMessage::RouteCreated(destination) => self.release(destination),
            }
        }
    }

    fn release(&mut self, destination: NodeAddress) {
        if self.awaiting_route == Some(destination) {
            self.awaiting_route = None;
        }
    }

    async fn send_user_data(&mut self, data: &UserData) -> DataOutcome {
        if data.payload.len() > self.max_payload_size {
            return DataOutcome::TooLarge;
        }

        let destination = data.destination_address;
        if destination == BROADCAST_ADDRESS {
            return self.outcome(self.transmit(BROADCAST_ADDRESS, data.to_bytes()).await);
        }
        if !is_valid_node_address(destination) || destination == self.node_address {
            return DataOutcome::InvalidDestination;
        }

        match self.routes.forward_route(destination) {
            RouteLookup::Found(route) => {
                let sent = self.transmit(route.next_hop(), data.to_bytes()).await;
                self.outcome(sent)
            }
            RouteLookup::Invalid(_) | RouteLookup::NotFound => {
                let last_known = self
                    .routes
                    .last_known_sequence_number(destination)
                    .unwrap_or(UNKNOWN_SEQUENCE_NUMBER);
                if data.source_address == self.node_address {
                    self.start_discovery(destination, last_known);
                } else {
                    self.report_unroutable(data.source_address, destination, last_known);
                }
                DataOutcome::AwaitingRoute
            }
        }
    }

    fn outcome(&self, sent: bool) -> DataOutcome {
        if sent {
            DataOutcome::Sent
        } else {
            DataOutcome::Dropped
        }
    }

    fn start_discovery(&mut self, destination: NodeAddress, last_known: SequenceNumber) {
        let rreq = RouteRequest::new(
            self.node_address,
            destination,
            self.counters.next_sequence_number(),
            last_known,
            self.counters.next_broadcast_id(),
        );
        self.awaiting_route = Some(destination);

        if self.routes.create_route_request(&rreq, false) {
            tracing::debug!(
                "Node {} starting discovery for {} (broadcast id {})",
                self.node_address,
                destination,
                rreq.broadcast_id
            );
            self.queues.push_control(ControlMessage::RouteRequest(rreq));
        } else {
            tracing::warn!("Could not record route request for {}", destination);
            self.routes.discovery_failed(destination);
        }
    }

    /// Tells the originator of a relayed packet that its destination is gone.
    fn report_unroutable(
        &self,
        source: NodeAddress,
        destination: NodeAddress,
        last_known: SequenceNumber,
    ) {
        self.queues.push_control(ControlMessage::RouteError {
            rerr: RouteError {
                unreachable_address: destination,
                unreachable_sequence_number: last_known,
            },
            recipients: vec![source],
        });
        let purged = self.queues.purge_forward(destination);
        if purged > 0 {
            tracing::debug!("Purged {} relayed packets towards {}", purged, destination);
        }
    }

    async fn send_via_route(&self, destination: NodeAddress, frame: Vec<u8>, kind: &str) -> bool {
        if !is_valid_node_address(destination) {
            tracing::warn!("Not sending {} to invalid address {}", kind, destination);
            return false;
        }
        match self.routes.forward_route(destination) {
            RouteLookup::Found(route) => self.transmit(route.next_hop(), frame).await,
            _ => {
                tracing::debug!("No valid route to {} for {}", destination, kind);
                false
            }
        }
    }

    async fn transmit(&self, next_hop: NodeAddress, frame: Vec<u8>) -> bool {
        match self.transport.send(next_hop, frame).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("Transport send to {} failed: {}", next_hop, err);
                false
            }
        }
    }
}

/// Queues a hello beacon every `interval`, first one after one interval.
pub(crate) async fn run_hello_loop(
    node_address: NodeAddress,
    interval: Duration,
    counters: Arc<NodeCounters>,
    queues: Arc<OutboundQueues>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = crate::node::stopped(&mut shutdown) => break,
            _ = ticker.tick() => {
                queues.push_control(ControlMessage::Hello(Hello {
                    source_address: node_address,
                    source_sequence_number: counters.current_sequence_number(),
                }));
            }
        }
    }
}
