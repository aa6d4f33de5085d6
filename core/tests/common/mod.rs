//! Shared harness: a set of nodes on one in-memory medium.
#![allow(dead_code)]

use aodv_mesh_core::pdu::{Pdu, RouteError, RouteReply, RouteRequest};
use aodv_mesh_core::transport::FrameRecord;
use aodv_mesh_core::{ChannelDelegate, MemoryNetwork, Node, NodeAddress, Notification, ProtocolConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(30);

/// Hellos effectively off, so tests control every route that appears.
pub fn quiet_config() -> ProtocolConfig {
    ProtocolConfig {
        hello_interval_ms: 600_000,
        ..Default::default()
    }
}

/// Log output for failing tests; `RUST_LOG=debug` shows protocol decisions.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .try_init();
}

pub struct Mesh {
    pub network: MemoryNetwork,
    nodes: HashMap<NodeAddress, Node>,
    events: HashMap<NodeAddress, UnboundedReceiver<Notification>>,
}

impl Mesh {
    /// Starts one node per address; links are added separately.
    pub fn start(addresses: &[NodeAddress], config: ProtocolConfig) -> Self {
        init_tracing();
        let network = MemoryNetwork::new();
        let mut nodes = HashMap::new();
        let mut events = HashMap::new();
        for &address in addresses {
            let node = Node::new(address, config.clone(), Arc::new(network.transport(address)))
                .expect("valid node");
            network.attach(address, node.inbound());
            let (delegate, rx) = ChannelDelegate::new();
            node.start(Arc::new(delegate)).expect("node starts");
            nodes.insert(address, node);
            events.insert(address, rx);
        }
        Self {
            network,
            nodes,
            events,
        }
    }

    pub fn chain(addresses: &[NodeAddress], config: ProtocolConfig) -> Self {
        let mesh = Self::start(addresses, config);
        mesh.network.connect_chain(addresses);
        mesh
    }

    pub fn node(&self, address: NodeAddress) -> &Node {
        &self.nodes[&address]
    }

    /// Waits for the first notification at `address` matching `predicate`.
    pub async fn wait_for<F>(&mut self, address: NodeAddress, predicate: F) -> Notification
    where
        F: Fn(&Notification) -> bool,
    {
        let rx = self.events.get_mut(&address).expect("known node");
        tokio::time::timeout(WAIT, async {
            loop {
                let notification = rx.recv().await.expect("node still running");
                if predicate(&notification) {
                    return notification;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("node {} never saw the expected notification", address))
    }

    pub async fn expect(&mut self, address: NodeAddress, expected: Notification) {
        let wanted = expected.clone();
        self.wait_for(address, move |n| *n == wanted).await;
    }

    /// Notifications already delivered to `address` and not consumed yet.
    pub fn drain(&mut self, address: NodeAddress) -> Vec<Notification> {
        let rx = self.events.get_mut(&address).expect("known node");
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    pub async fn stop(&self) {
        for node in self.nodes.values() {
            node.stop().await;
        }
    }
}

fn decoded(frames: Vec<FrameRecord>) -> Vec<(NodeAddress, Pdu)> {
    frames
        .into_iter()
        .filter_map(|record| record.decode().map(|pdu| (record.to, pdu)))
        .collect()
}

pub fn rreqs_from(network: &MemoryNetwork, address: NodeAddress) -> Vec<RouteRequest> {
    decoded(network.frames_from(address))
        .into_iter()
        .filter_map(|(_, pdu)| match pdu {
            Pdu::RouteRequest(rreq) => Some(rreq),
            _ => None,
        })
        .collect()
}

/// RREPs sent by `address`, each with the neighbor it was handed to.
pub fn rreps_from(network: &MemoryNetwork, address: NodeAddress) -> Vec<(NodeAddress, RouteReply)> {
    decoded(network.frames_from(address))
        .into_iter()
        .filter_map(|(to, pdu)| match pdu {
            Pdu::RouteReply(rrep) => Some((to, rrep)),
            _ => None,
        })
        .collect()
}

pub fn rerrs_from(network: &MemoryNetwork, address: NodeAddress) -> Vec<(NodeAddress, RouteError)> {
    decoded(network.frames_from(address))
        .into_iter()
        .filter_map(|(to, pdu)| match pdu {
            Pdu::RouteError(rerr) => Some((to, rerr)),
            _ => None,
        })
        .collect()
}

/// Lets the node tasks run without moving the clock much.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
