//! Transport abstraction for AODV frames
//!
//! A transport moves opaque frames to a one-hop neighbor or to every
//! neighbor at once (`BROADCAST_ADDRESS`). Receiving is push based: the
//! transport hands frames to the node's `InboundHandle`.

use crate::constants::{is_valid_node_address, NodeAddress, BROADCAST_ADDRESS, MAX_PACKAGE_SIZE};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("invalid destination address {0}")]
    InvalidDestination(NodeAddress),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport closed")]
    Closed,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one frame to a neighbor, or to all neighbors for `BROADCAST_ADDRESS`.
    async fn send(&self, destination: NodeAddress, frame: Vec<u8>) -> Result<(), TransportError>;
}

/// Checks shared by every transport before a frame goes out.
pub fn check_outgoing(destination: NodeAddress, frame: &[u8]) -> Result<(), TransportError> {
    if destination != BROADCAST_ADDRESS && !is_valid_node_address(destination) {
        return Err(TransportError::InvalidDestination(destination));
    }
    if frame.len() > MAX_PACKAGE_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: frame.len(),
            max: MAX_PACKAGE_SIZE,
        });
    }
    Ok(())
}
