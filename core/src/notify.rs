//! Notifications delivered to the application.
//!
//! Protocol tasks never call the application directly. They enqueue a
//! [`Notification`] and a dedicated notifier task hands it to the
//! [`NodeDelegate`], so a slow delegate cannot stall routing.

use crate::constants::{NodeAddress, PacketId};
use crate::queue::WakeQueue;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// User data addressed to this node (or broadcast) arrived.
    DataReceived {
        sender: NodeAddress,
        payload: Vec<u8>,
    },
    /// The packet left this node towards its next hop.
    SendSucceeded { packet_id: PacketId },
    /// Destination was out of range or this node itself.
    InvalidDestination { packet_id: PacketId },
    PayloadTooLarge { packet_id: PacketId },
    RouteEstablished { destination: NodeAddress },
    RouteInvalidated { destination: NodeAddress },
    /// Discovery gave up after the last retry.
    RouteEstablishmentFailed { destination: NodeAddress },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::DataReceived { sender, payload } => write!(
                f,
                "data from {}: {}",
                sender,
                String::from_utf8_lossy(payload)
            ),
            Notification::SendSucceeded { packet_id } => write!(f, "packet {} sent", packet_id),
            Notification::InvalidDestination { packet_id } => {
                write!(f, "packet {} has an invalid destination", packet_id)
            }
            Notification::PayloadTooLarge { packet_id } => {
                write!(f, "packet {} payload too large", packet_id)
            }
            Notification::RouteEstablished { destination } => {
                write!(f, "route to {} established", destination)
            }
            Notification::RouteInvalidated { destination } => {
                write!(f, "route to {} invalidated", destination)
            }
            Notification::RouteEstablishmentFailed { destination } => {
                write!(f, "no route to {} could be found", destination)
            }
        }
    }
}

/// Receives protocol events on the notifier task.
pub trait NodeDelegate: Send + Sync {
    fn on_notification(&self, notification: Notification);
}

impl<F> NodeDelegate for F
where
    F: Fn(Notification) + Send + Sync,
{
    fn on_notification(&self, notification: Notification) {
        self(notification)
    }
}

/// Delegate that forwards every notification into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelDelegate {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelDelegate {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NodeDelegate for ChannelDelegate {
    fn on_notification(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            trace!("notification receiver dropped");
        }
    }
}

pub(crate) async fn run_notifier(
    queue: Arc<WakeQueue<Notification>>,
    delegate: Arc<dyn NodeDelegate>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            notification = queue.pop() => {
                trace!(%notification, "delivering notification");
                delegate.on_notification(notification);
            }
            _ = crate::node::stopped(&mut shutdown) => break,
        }
    }
}
