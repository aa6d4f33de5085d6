//! Frame transports: the trait the sender talks to, plus two implementations.
//!
//! - `memory`: shared in-process medium for tests and simulations
//! - `udp`: UDP sockets on an ad-hoc IPv4 subnet

pub mod abstraction;
pub mod memory;
pub mod udp;

pub use abstraction::{check_outgoing, Transport, TransportError};
pub use memory::{FrameRecord, MemoryNetwork, MemoryTransport};
pub use udp::{UdpConfig, UdpReceivers, UdpTransport};
