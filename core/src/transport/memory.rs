// In-memory radio medium - links, optional loss, and a frame log for tests

use super::abstraction::{check_outgoing, Transport, TransportError};
use crate::constants::{NodeAddress, BROADCAST_ADDRESS};
use crate::pdu::Pdu;
use crate::receiver::InboundHandle;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One frame handed to the medium, whether or not anyone heard it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub from: NodeAddress,
    pub to: NodeAddress,
    pub frame: Vec<u8>,
}

impl FrameRecord {
    pub fn decode(&self) -> Option<Pdu> {
        Pdu::from_bytes(&self.frame).ok()
    }
}

struct NetworkState {
    nodes: HashMap<NodeAddress, InboundHandle>,
    links: HashSet<(NodeAddress, NodeAddress)>,
    loss_rate: f64,
    rng: StdRng,
    log: Vec<FrameRecord>,
}

fn link(a: NodeAddress, b: NodeAddress) -> (NodeAddress, NodeAddress) {
    (a.min(b), a.max(b))
}

/// Shared medium connecting any number of [`MemoryTransport`]s.
///
/// Links are symmetric. Unicast frames to a node without a link are lost
/// silently, like a radio transmission nobody hears.
#[derive(Clone)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::with_loss(0.0, 0)
    }

    /// Medium dropping each delivery with probability `loss_rate`.
    pub fn with_loss(loss_rate: f64, seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                nodes: HashMap::new(),
                links: HashSet::new(),
                loss_rate: loss_rate.clamp(0.0, 1.0),
                rng: StdRng::seed_from_u64(seed),
                log: Vec::new(),
            })),
        }
    }

    pub fn transport(&self, address: NodeAddress) -> MemoryTransport {
        MemoryTransport {
            address,
            network: self.clone(),
        }
    }

    /// Registers where frames for `address` are delivered.
    pub fn attach(&self, address: NodeAddress, inbound: InboundHandle) {
        self.state.lock().nodes.insert(address, inbound);
    }

    pub fn detach(&self, address: NodeAddress) {
        self.state.lock().nodes.remove(&address);
    }

    pub fn connect(&self, a: NodeAddress, b: NodeAddress) {
        self.state.lock().links.insert(link(a, b));
    }

    pub fn disconnect(&self, a: NodeAddress, b: NodeAddress) {
        self.state.lock().links.remove(&link(a, b));
    }

    pub fn are_connected(&self, a: NodeAddress, b: NodeAddress) -> bool {
        self.state.lock().links.contains(&link(a, b))
    }

    /// Links consecutive addresses: `[1, 2, 3]` gives 1-2 and 2-3.
    pub fn connect_chain(&self, addresses: &[NodeAddress]) {
        for pair in addresses.windows(2) {
            self.connect(pair[0], pair[1]);
        }
    }

    pub fn frames(&self) -> Vec<FrameRecord> {
        self.state.lock().log.clone()
    }

    pub fn frames_from(&self, address: NodeAddress) -> Vec<FrameRecord> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|record| record.from == address)
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    fn transmit(&self, from: NodeAddress, to: NodeAddress, frame: Vec<u8>) {
        let recipients: Vec<(NodeAddress, InboundHandle)> = {
            let mut state = self.state.lock();
            state.log.push(FrameRecord {
                from,
                to,
                frame: frame.clone(),
            });

            let candidates: Vec<(NodeAddress, InboundHandle)> = state
                .nodes
                .iter()
                .filter(|(&address, _)| {
                    address != from
                        && (to == BROADCAST_ADDRESS || address == to)
                        && state.links.contains(&link(from, address))
                })
                .map(|(&address, handle)| (address, handle.clone()))
                .collect();

            let loss_rate = state.loss_rate;
            candidates
                .into_iter()
                .filter(|_| loss_rate <= 0.0 || !state.rng.gen_bool(loss_rate))
                .collect()
        };

        for (address, handle) in recipients {
            tracing::trace!("medium: {} -> {} ({} bytes)", from, address, frame.len());
            handle.deliver(from, frame.clone());
        }
    }
}

/// A node's attachment point to a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    address: NodeAddress,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn address(&self) -> NodeAddress {
        self.address
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, destination: NodeAddress, frame: Vec<u8>) -> Result<(), TransportError> {
        check_outgoing(destination, &frame)?;
        self.network.transmit(self.address, destination, frame);
        Ok(())
    }
}
