//! UDP transport for a real ad-hoc subnet.
//!
//! Node `n` lives at `<subnet>.n`. Unicast frames go to the unicast port of
//! that host; broadcasts go to `<subnet>.255` on the broadcast port. Inbound
//! datagrams are attributed to the node address in the last octet of the
//! source IP.

use super::abstraction::{check_outgoing, Transport, TransportError};
use crate::constants::{
    is_valid_node_address, NodeAddress, BROADCAST_ADDRESS, MAX_PACKAGE_SIZE, RECEIVE_BUFFER_SIZE,
};
use crate::receiver::InboundHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// First three octets of the mesh subnet.
    pub subnet: [u8; 3],
    pub unicast_port: u16,
    pub broadcast_port: u16,
    /// Local port frames are sent from.
    pub send_port: u16,
    pub bind_address: Ipv4Addr,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            subnet: [192, 168, 2],
            unicast_port: 8888,
            broadcast_port: 8889,
            send_port: 8881,
            bind_address: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl UdpConfig {
    /// Socket address frames for `destination` are sent to.
    pub fn socket_address(&self, destination: NodeAddress) -> Result<SocketAddr, TransportError> {
        let port = if destination == BROADCAST_ADDRESS {
            self.broadcast_port
        } else if is_valid_node_address(destination) {
            self.unicast_port
        } else {
            return Err(TransportError::InvalidDestination(destination));
        };
        let [a, b, c] = self.subnet;
        let host = u8::try_from(destination)
            .map_err(|_| TransportError::InvalidDestination(destination))?;
        Ok(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::new(a, b, c, host),
            port,
        )))
    }

    /// Node address of a datagram's sender, if it belongs to the subnet.
    pub fn node_address_of(&self, source: &SocketAddr) -> Option<NodeAddress> {
        let IpAddr::V4(ip) = source.ip() else {
            return None;
        };
        let [a, b, c, host] = ip.octets();
        if [a, b, c] != self.subnet {
            return None;
        }
        let address = NodeAddress::from(host);
        is_valid_node_address(address).then_some(address)
    }
}

pub struct UdpTransport {
    config: UdpConfig,
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(config: UdpConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind((config.bind_address, config.send_port)).await?;
        socket.set_broadcast(true)?;
        Ok(Self { config, socket })
    }

    pub fn config(&self) -> &UdpConfig {
        &self.config
    }

    /// Binds the unicast and broadcast ports and feeds their datagrams to `inbound`.
    pub async fn spawn_receivers(
        &self,
        inbound: InboundHandle,
    ) -> Result<UdpReceivers, TransportError> {
        let unicast =
            UdpSocket::bind((self.config.bind_address, self.config.unicast_port)).await?;
        let broadcast =
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.config.broadcast_port)).await?;

        let config = Arc::new(self.config.clone());
        let tasks = [unicast, broadcast]
            .into_iter()
            .map(|socket| {
                tokio::spawn(receive_loop(socket, config.clone(), inbound.clone()))
            })
            .collect();
        Ok(UdpReceivers { tasks })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, destination: NodeAddress, frame: Vec<u8>) -> Result<(), TransportError> {
        check_outgoing(destination, &frame)?;
        let target = self.config.socket_address(destination)?;
        self.socket.send_to(&frame, target).await?;
        Ok(())
    }
}

/// Running receive loops; aborted on drop.
pub struct UdpReceivers {
    tasks: Vec<JoinHandle<()>>,
}

impl UdpReceivers {
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for UdpReceivers {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn receive_loop(socket: UdpSocket, config: Arc<UdpConfig>, inbound: InboundHandle) {
    let mut buffer = vec![0u8; RECEIVE_BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((len, source)) if len > MAX_PACKAGE_SIZE => {
                tracing::debug!("Dropping oversized datagram from {}", source);
            }
            Ok((len, source)) => match config.node_address_of(&source) {
                Some(sender) => inbound.deliver(sender, buffer[..len].to_vec()),
                None => tracing::debug!("Ignoring datagram from {} outside the mesh", source),
            },
            Err(err) => {
                tracing::warn!("UDP receive failed: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_mapping() {
        let config = UdpConfig::default();
        assert_eq!(
            config.socket_address(7).unwrap(),
            "192.168.2.7:8888".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            config.socket_address(BROADCAST_ADDRESS).unwrap(),
            "192.168.2.255:8889".parse::<SocketAddr>().unwrap()
        );
        assert!(config.socket_address(256).is_err());
    }

    #[test]
    fn test_sender_attribution() {
        let config = UdpConfig::default();
        let inside: SocketAddr = "192.168.2.14:8881".parse().unwrap();
        let outside: SocketAddr = "10.0.0.14:8881".parse().unwrap();
        let broadcast: SocketAddr = "192.168.2.255:8881".parse().unwrap();
        assert_eq!(config.node_address_of(&inside), Some(14));
        assert_eq!(config.node_address_of(&outside), None);
        assert_eq!(config.node_address_of(&broadcast), None);
    }

    #[tokio::test]
    async fn test_loopback_round_trip() {
        use crate::queue::WakeQueue;

        let config = UdpConfig {
            subnet: [127, 0, 0],
            unicast_port: 47_888,
            broadcast_port: 47_889,
            send_port: 47_881,
            bind_address: Ipv4Addr::LOCALHOST,
        };
        let transport = UdpTransport::bind(config).await.unwrap();
        let queue = Arc::new(WakeQueue::new());
        let receivers = transport
            .spawn_receivers(InboundHandle::new(queue.clone()))
            .await
            .unwrap();

        transport.send(1, b"6;1;1".to_vec()).await.unwrap();
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), queue.pop())
            .await
            .unwrap();
        assert_eq!(frame.sender, 1);
        assert_eq!(frame.bytes, b"6;1;1".to_vec());
        receivers.stop();
    }

    fn loopback_config(base_port: u16) -> UdpConfig {
        UdpConfig {
            subnet: [127, 0, 0],
            unicast_port: base_port,
            broadcast_port: base_port + 1,
            send_port: base_port + 2,
            bind_address: Ipv4Addr::LOCALHOST,
        }
    }

    #[tokio::test]
    async fn test_largest_payload_arrives_whole() {
        use crate::config::ProtocolConfig;
        use crate::pdu::{Pdu, UserData};
        use crate::queue::WakeQueue;

        let transport = UdpTransport::bind(loopback_config(47_890)).await.unwrap();
        let queue = Arc::new(WakeQueue::new());
        let receivers = transport
            .spawn_receivers(InboundHandle::new(queue.clone()))
            .await
            .unwrap();

        let payload: Vec<u8> = (0..ProtocolConfig::default().max_payload_size)
            .map(|i| if i % 97 == 0 { b';' } else { b'a' + (i % 26) as u8 })
            .collect();
        let data = UserData {
            source_address: 1,
            destination_address: 1,
            payload,
        };
        transport.send(1, data.to_bytes()).await.unwrap();

        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), queue.pop())
            .await
            .unwrap();
        assert_eq!(Pdu::from_bytes(&frame.bytes).unwrap(), Pdu::UserData(data));
        receivers.stop();
    }

    #[tokio::test]
    async fn test_oversized_datagram_is_dropped() {
        use crate::queue::WakeQueue;

        let config = loopback_config(47_893);
        let unicast = SocketAddr::from((Ipv4Addr::LOCALHOST, config.unicast_port));
        let transport = UdpTransport::bind(config).await.unwrap();
        let queue = Arc::new(WakeQueue::new());
        let receivers = transport
            .spawn_receivers(InboundHandle::new(queue.clone()))
            .await
            .unwrap();

        // Bypasses the transport's own size check.
        let raw = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let mut oversized = b"0;1;1;".to_vec();
        oversized.resize(MAX_PACKAGE_SIZE + 10, b'x');
        raw.send_to(&oversized, unicast).await.unwrap();
        raw.send_to(b"6;1;1", unicast).await.unwrap();

        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), queue.pop())
            .await
            .unwrap();
        assert_eq!(frame.bytes, b"6;1;1".to_vec());
        assert_eq!(queue.len(), 0);
        receivers.stop();
    }
}
