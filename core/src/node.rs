//! Node: one AODV participant and its task set.
//!
//! `start` spawns five tasks sharing the node's state:
//! notifier, sender, hello broadcaster, receiver and expiry loop.
//! `stop` signals all of them through one watch channel and waits for
//! them to finish. Tables and queues survive a restart.

use crate::config::ProtocolConfig;
use crate::constants::{is_valid_node_address, NodeAddress, PacketId, SequenceNumber};
use crate::notify::{run_notifier, Notification, NodeDelegate};
use crate::pdu::UserData;
use crate::queue::WakeQueue;
use crate::receiver::{InboundFrame, InboundHandle, Receiver};
use crate::routing::manager::RouteTableManager;
use crate::routing::{NodeCounters, RequestSnapshot, RouteSnapshot};
use crate::sender::{run_hello_loop, ApplicationPacket, OutboundQueues, QueueDepths, Sender};
use crate::transport::Transport;
use crate::AodvError;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Resolves once the node is asked to stop (or the signal is gone).
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

struct RunningTasks {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Node {
    address: NodeAddress,
    config: ProtocolConfig,
    counters: Arc<NodeCounters>,
    routes: Arc<RouteTableManager>,
    outbound: Arc<OutboundQueues>,
    inbound: Arc<WakeQueue<InboundFrame>>,
    notifications: Arc<WakeQueue<Notification>>,
    transport: Arc<dyn Transport>,
    running: Mutex<Option<RunningTasks>>,
}

impl Node {
    pub fn new(
        address: NodeAddress,
        config: ProtocolConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, AodvError> {
        if !is_valid_node_address(address) {
            return Err(AodvError::InvalidAddress(address));
        }
        config.validate()?;

        let counters = Arc::new(NodeCounters::new());
        let outbound = Arc::new(OutboundQueues::new());
        let notifications = Arc::new(WakeQueue::new());
        let routes = Arc::new(RouteTableManager::new(
            address,
            config.clone(),
            counters.clone(),
            outbound.clone(),
            notifications.clone(),
        ));

        Ok(Self {
            address,
            config,
            counters,
            routes,
            outbound,
            inbound: Arc::new(WakeQueue::new()),
            notifications,
            transport,
            running: Mutex::new(None),
        })
    }

    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Handle transports use to deliver received frames.
    pub fn inbound(&self) -> InboundHandle {
        InboundHandle::new(self.inbound.clone())
    }

    /// Spawns the node's tasks on the current tokio runtime.
    pub fn start(&self, delegate: Arc<dyn NodeDelegate>) -> Result<(), AodvError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(AodvError::AlreadyRunning);
        }

        let (shutdown, signal) = watch::channel(false);
        let sender = Sender::new(
            self.address,
            self.config.max_payload_size,
            self.outbound.clone(),
            self.routes.clone(),
            self.counters.clone(),
            self.notifications.clone(),
            self.transport.clone(),
        );
        let receiver = Receiver::new(
            self.address,
            self.inbound.clone(),
            self.routes.clone(),
            self.outbound.clone(),
            self.counters.clone(),
            self.notifications.clone(),
        );

        let tasks = vec![
            tokio::spawn(run_notifier(
                self.notifications.clone(),
                delegate,
                signal.clone(),
            )),
            tokio::spawn(sender.run(signal.clone())),
            tokio::spawn(run_hello_loop(
                self.address,
                self.config.hello_interval(),
                self.counters.clone(),
                self.outbound.clone(),
                signal.clone(),
            )),
            tokio::spawn(receiver.run(signal.clone())),
            tokio::spawn(self.routes.clone().run_expiry_loop(signal)),
        ];

        *running = Some(RunningTasks { shutdown, tasks });
        tracing::info!("Node {} started", self.address);
        Ok(())
    }

    /// Stops every task and waits for them. Calling it twice is harmless.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        for task in running.tasks {
            if let Err(err) = task.await {
                tracing::warn!("Node {} task ended abnormally: {}", self.address, err);
            }
        }
        tracing::info!("Node {} stopped", self.address);
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Queues application data; the outcome arrives as a notification.
    pub fn send_data(&self, packet_id: PacketId, destination: NodeAddress, payload: Vec<u8>) {
        self.outbound.push_application(ApplicationPacket {
            packet_id,
            data: UserData {
                source_address: self.address,
                destination_address: destination,
                payload,
            },
        });
    }

    pub fn current_sequence_number(&self) -> SequenceNumber {
        self.counters.current_sequence_number()
    }

    pub fn forward_routes(&self) -> Vec<RouteSnapshot> {
        self.routes.forward_routes()
    }

    pub fn route_requests(&self) -> Vec<RequestSnapshot> {
        self.routes.route_requests()
    }

    pub fn queue_depths(&self) -> QueueDepths {
        QueueDepths {
            inbound: self.inbound.len(),
            ..self.outbound.depths()
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelDelegate;
    use crate::transport::MemoryNetwork;

    fn node(address: NodeAddress) -> Node {
        let network = MemoryNetwork::new();
        Node::new(
            address,
            ProtocolConfig::default(),
            Arc::new(network.transport(address)),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_invalid_address_and_config() {
        let network = MemoryNetwork::new();
        assert!(matches!(
            Node::new(255, ProtocolConfig::default(), Arc::new(network.transport(255))),
            Err(AodvError::InvalidAddress(255))
        ));
        let config = ProtocolConfig {
            max_rreq_retries: 0,
            ..Default::default()
        };
        assert!(matches!(
            Node::new(1, config, Arc::new(network.transport(1))),
            Err(AodvError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_start_twice_fails_and_stop_is_idempotent() {
        let node = node(1);
        let (delegate, _rx) = ChannelDelegate::new();
        let delegate = Arc::new(delegate);

        node.start(delegate.clone()).unwrap();
        assert!(node.is_running());
        assert!(matches!(
            node.start(delegate.clone()),
            Err(AodvError::AlreadyRunning)
        ));

        node.stop().await;
        node.stop().await;
        assert!(!node.is_running());

        node.start(delegate).unwrap();
        node.stop().await;
    }

    #[tokio::test]
    async fn test_send_to_self_is_invalid() {
        let node = node(4);
        let (delegate, mut rx) = ChannelDelegate::new();
        node.start(Arc::new(delegate)).unwrap();

        node.send_data(11, 4, b"loop".to_vec());
        assert_eq!(
            rx.recv().await,
            Some(Notification::InvalidDestination { packet_id: 11 })
        );
        node.stop().await;
    }
}
