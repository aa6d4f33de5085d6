// AODV Mesh Core - on-demand distance vector routing for ad-hoc networks
//
// Nodes discover routes only when they have data to send, keep them alive
// while they are used, and tell their upstream neighbors when a link breaks.

pub mod config;
pub mod constants;
pub mod node;
pub mod notify;
pub mod pdu;
mod queue;
pub mod receiver;
pub mod routing;
pub mod sender;
pub mod transport;

use thiserror::Error;

pub use config::{ConfigError, ProtocolConfig};
pub use constants::{
    BroadcastId, NodeAddress, PacketId, SequenceNumber, BROADCAST_ADDRESS, MAX_USER_DATA_SIZE,
};
pub use node::Node;
pub use notify::{ChannelDelegate, NodeDelegate, Notification};
pub use receiver::InboundHandle;
pub use routing::{RequestSnapshot, RouteSnapshot};
pub use sender::QueueDepths;
pub use transport::{MemoryNetwork, MemoryTransport, Transport, TransportError, UdpConfig, UdpTransport};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AodvError {
    #[error("invalid node address {0}")]
    InvalidAddress(NodeAddress),
    #[error("node already running")]
    AlreadyRunning,
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}
