//! Receiver task: decodes inbound frames and applies the AODV rules.
//!
//! Transports push raw frames through an [`InboundHandle`]; the receiver
//! updates the route tables and queues whatever has to go back out.

use crate::constants::{NodeAddress, SequenceNumber, BROADCAST_ADDRESS, UNKNOWN_SEQUENCE_NUMBER};
use crate::notify::Notification;
use crate::pdu::{Hello, Pdu, RouteError, RouteReply, RouteRequest, UserData};
use crate::queue::WakeQueue;
use crate::routing::manager::RouteTableManager;
use crate::routing::{
    is_at_least_as_fresh, is_better, max_sequence_number, NodeCounters, RouteEntry, RouteLookup,
};
use crate::sender::{ControlMessage, OutboundQueues};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug)]
pub(crate) struct InboundFrame {
    pub(crate) sender: NodeAddress,
    pub(crate) bytes: Vec<u8>,
}

/// Entry point for transports to hand frames to a node.
#[derive(Debug, Clone)]
pub struct InboundHandle {
    queue: Arc<WakeQueue<InboundFrame>>,
}

impl InboundHandle {
    pub(crate) fn new(queue: Arc<WakeQueue<InboundFrame>>) -> Self {
        Self { queue }
    }

    /// Queues a frame received from the neighbor `sender`.
    pub fn deliver(&self, sender: NodeAddress, bytes: Vec<u8>) {
        self.queue.push(InboundFrame { sender, bytes });
    }
}

pub(crate) struct Receiver {
    node_address: NodeAddress,
    inbound: Arc<WakeQueue<InboundFrame>>,
    routes: Arc<RouteTableManager>,
    outbound: Arc<OutboundQueues>,
    counters: Arc<NodeCounters>,
    notifications: Arc<WakeQueue<Notification>>,
}

impl Receiver {
    pub(crate) fn new(
        node_address: NodeAddress,
        inbound: Arc<WakeQueue<InboundFrame>>,
        routes: Arc<RouteTableManager>,
        outbound: Arc<OutboundQueues>,
        counters: Arc<NodeCounters>,
        notifications: Arc<WakeQueue<Notification>>,
    ) -> Self {
        Self {
            node_address,
            inbound,
            routes,
            outbound,
            counters,
            notifications,
        }
    }

    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = crate::node::stopped(&mut shutdown) => break,
                frame = self.inbound.pop() => self.handle_frame(frame),
            }
        }
    }

    fn handle_frame(&self, frame: InboundFrame) {
        if frame.sender == self.node_address {
            // Own broadcasts looped back by the medium.
            return;
        }
        let pdu = match Pdu::from_bytes(&frame.bytes) {
            Ok(pdu) => pdu,
            Err(err) => {
                tracing::debug!("Discarding malformed frame from {}: {}", frame.sender, err);
                return;
            }
        };
        tracing::trace!(
            "Node {} received {} from {}",
            self.node_address,
            pdu.kind(),
            frame.sender
        );

        match pdu {
            Pdu::Hello(hello) => self.handle_hello(hello),
            Pdu::RouteRequest(rreq) => self.handle_route_request(rreq, frame.sender),
            Pdu::RouteReply(rrep) => self.handle_route_reply(rrep, frame.sender),
            Pdu::RouteError(rerr) => self.handle_route_error(rerr),
            Pdu::UserData(data) => self.handle_user_data(data),
        }
    }

    fn handle_hello(&self, hello: Hello) {
        let neighbor = hello.source_address;
        if !self.routes.set_valid(neighbor, hello.source_sequence_number) {
            self.routes.create_forward_route(
                neighbor,
                neighbor,
                hello.source_sequence_number,
                1,
                Vec::new(),
            );
        }
    }

    fn handle_route_request(&self, mut rreq: RouteRequest, sender: NodeAddress) {
        if rreq.source_address == self.node_address
            || self
                .routes
                .route_request_exists(rreq.source_address, rreq.broadcast_id)
        {
            tracing::trace!(
                "Dropping duplicate RREQ {}/{}",
                rreq.source_address,
                rreq.broadcast_id
            );
            return;
        }

        rreq.increment_hop_count();
        if !self.routes.create_route_request(&rreq, true) {
            // Unrecordable floods cannot be suppressed later; never relay them.
            tracing::debug!(
                "Skipping RREQ {}/{} that cannot be recorded",
                rreq.source_address,
                rreq.broadcast_id
            );
            return;
        }
        self.ensure_neighbor_route(sender);

        // Reverse route towards the originator.
        self.learn_route(
            rreq.source_address,
            sender,
            rreq.source_sequence_number,
            rreq.hop_count,
            None,
        );

        let reply = if rreq.destination_address == self.node_address {
            let own_sequence_number = self
                .counters
                .bump_if_current(rreq.destination_sequence_number);
            Some(RouteReply {
                source_address: rreq.source_address,
                destination_address: self.node_address,
                destination_sequence_number: own_sequence_number,
                source_sequence_number: rreq.source_sequence_number,
                hop_count: 0,
            })
        } else {
            self.reply_from_cache(&mut rreq)
        };

        match reply {
            Some(rrep) => self.outbound.push_control(ControlMessage::RouteReply(rrep)),
            None => self
                .outbound
                .push_control(ControlMessage::RouteRequest(rreq)),
        }
    }

    /// Answers for the destination when a fresh enough route is cached.
    ///
    /// Also sends a gratuitous RREP so the destination learns the way back.
    fn reply_from_cache(&self, rreq: &mut RouteRequest) -> Option<RouteReply> {
        match self.routes.forward_route(rreq.destination_address) {
            RouteLookup::Found(route)
                if is_at_least_as_fresh(
                    route.destination_sequence_number(),
                    rreq.destination_sequence_number,
                ) =>
            {
                let gratuitous = RouteReply {
                    source_address: route.destination_address(),
                    destination_address: rreq.source_address,
                    destination_sequence_number: rreq.source_sequence_number,
                    source_sequence_number: route.destination_sequence_number(),
                    hop_count: rreq.hop_count,
                };
                self.outbound
                    .push_control(ControlMessage::RouteReply(gratuitous));

                Some(RouteReply {
                    source_address: rreq.source_address,
                    destination_address: route.destination_address(),
                    destination_sequence_number: route.destination_sequence_number(),
                    source_sequence_number: rreq.source_sequence_number,
                    hop_count: route.hop_count(),
                })
            }
            RouteLookup::Invalid(route) => {
                rreq.destination_sequence_number = max_sequence_number(
                    route.destination_sequence_number(),
                    rreq.destination_sequence_number,
                );
                None
            }
            RouteLookup::Found(_) | RouteLookup::NotFound => None,
        }
    }

    fn handle_route_reply(&self, mut rrep: RouteReply, sender: NodeAddress) {
        self.ensure_neighbor_route(sender);
        rrep.increment_hop_count();

        let mut precursor = None;
        if rrep.source_address != self.node_address {
            self.outbound
                .push_control(ControlMessage::RouteReply(rrep.clone()));
            if let RouteLookup::Found(reverse) = self.routes.forward_route(rrep.source_address) {
                reverse.add_precursor(sender);
                precursor = Some(reverse.next_hop());
            }
        }

        if rrep.destination_address == self.node_address {
            return;
        }
        self.learn_route(
            rrep.destination_address,
            sender,
            rrep.destination_sequence_number,
            rrep.hop_count,
            precursor,
        );
    }

    fn handle_route_error(&self, rerr: RouteError) {
        let RouteLookup::Found(route) = self.routes.forward_route(rerr.unreachable_address) else {
            return;
        };
        if !is_at_least_as_fresh(
            rerr.unreachable_sequence_number,
            route.destination_sequence_number(),
        ) {
            return;
        }

        let recipients = route.precursors();
        if !recipients.is_empty() {
            self.outbound.push_control(ControlMessage::RouteError {
                rerr: rerr.clone(),
                recipients,
            });
        }
        self.routes
            .set_invalid(rerr.unreachable_address, rerr.unreachable_sequence_number);
    }

    fn handle_user_data(&self, data: UserData) {
        if data.destination_address == self.node_address
            || data.destination_address == BROADCAST_ADDRESS
        {
            self.notifications.push(Notification::DataReceived {
                sender: data.source_address,
                payload: data.payload,
            });
        } else {
            self.outbound.push_forward(data);
        }
    }

    /// Makes sure a one-hop route to the neighbor that sent a frame exists.
    fn ensure_neighbor_route(&self, neighbor: NodeAddress) {
        match self.routes.forward_route(neighbor) {
            RouteLookup::Found(_) => {}
            RouteLookup::Invalid(stale) => {
                self.routes.replace_invalid_route(
                    neighbor,
                    neighbor,
                    stale.destination_sequence_number(),
                    1,
                    stale.precursors(),
                );
            }
            RouteLookup::NotFound => {
                self.routes.create_forward_route(
                    neighbor,
                    neighbor,
                    UNKNOWN_SEQUENCE_NUMBER,
                    1,
                    Vec::new(),
                );
            }
        }
    }

    /// Creates, improves or revives the route to `destination` via `next_hop`.
    fn learn_route(
        &self,
        destination: NodeAddress,
        next_hop: NodeAddress,
        sequence_number: SequenceNumber,
        hop_count: u32,
        precursor: Option<NodeAddress>,
    ) {
        match self.routes.forward_route(destination) {
            RouteLookup::Found(current) => {
                if let Some(precursor) = precursor {
                    current.add_precursor(precursor);
                }
                if is_better(
                    sequence_number,
                    hop_count,
                    current.destination_sequence_number(),
                    current.hop_count(),
                ) {
                    self.routes.update_forward_route(
                        &current,
                        next_hop,
                        sequence_number,
                        hop_count,
                        current.precursors(),
                    );
                }
            }
            RouteLookup::Invalid(stale) => {
                let mut precursors = stale.precursors();
                precursors.extend(precursor);
                let revived = self.routes.replace_invalid_route(
                    destination,
                    next_hop,
                    sequence_number,
                    hop_count,
                    precursors.clone(),
                );
                if !revived {
                    self.routes.create_forward_route(
                        destination,
                        next_hop,
                        sequence_number,
                        hop_count,
                        precursors,
                    );
                }
            }
            RouteLookup::NotFound => {
                self.routes.create_forward_route(
                    destination,
                    next_hop,
                    sequence_number,
                    hop_count,
                    precursor.into_iter().collect(),
                );
            }
        }
    }
}
