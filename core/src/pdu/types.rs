// PDU types - the five frames exchanged between nodes

use crate::constants::{BroadcastId, NodeAddress, SequenceNumber};

pub const USER_DATA_PDU: u8 = 0;
pub const RERR_PDU: u8 = 1;
pub const RREP_PDU: u8 = 2;
pub const RREQ_PDU: u8 = 3;
pub const HELLO_PDU: u8 = 6;

/// Periodic liveness beacon carrying the sender's own sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub source_address: NodeAddress,
    pub source_sequence_number: SequenceNumber,
}

/// Route request (RREQ), flooded by the originator of a discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    pub source_address: NodeAddress,
    pub destination_address: NodeAddress,
    pub destination_sequence_number: SequenceNumber,
    pub source_sequence_number: SequenceNumber,
    pub hop_count: u32,
    pub broadcast_id: BroadcastId,
}

impl RouteRequest {
    pub fn new(
        source_address: NodeAddress,
        destination_address: NodeAddress,
        source_sequence_number: SequenceNumber,
        destination_sequence_number: SequenceNumber,
        broadcast_id: BroadcastId,
    ) -> Self {
        Self {
            source_address,
            destination_address,
            destination_sequence_number,
            source_sequence_number,
            hop_count: 0,
            broadcast_id,
        }
    }

    pub fn increment_hop_count(&mut self) {
        self.hop_count = self.hop_count.saturating_add(1);
    }
}

/// Route reply (RREP), unicast back along the reverse path.
///
/// `source_address` is the node that asked for the route and
/// `destination_address` the node the route leads to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReply {
    pub source_address: NodeAddress,
    pub destination_address: NodeAddress,
    pub destination_sequence_number: SequenceNumber,
    pub source_sequence_number: SequenceNumber,
    pub hop_count: u32,
}

impl RouteReply {
    pub fn increment_hop_count(&mut self) {
        self.hop_count = self.hop_count.saturating_add(1);
    }
}

/// Route error (RERR): `unreachable_address` can no longer be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteError {
    pub unreachable_address: NodeAddress,
    pub unreachable_sequence_number: SequenceNumber,
}

/// Application payload travelling hop by hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserData {
    pub source_address: NodeAddress,
    pub destination_address: NodeAddress,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    Hello(Hello),
    RouteRequest(RouteRequest),
    RouteReply(RouteReply),
    RouteError(RouteError),
    UserData(UserData),
}

impl Pdu {
    pub fn type_code(&self) -> u8 {
        match self {
            Pdu::Hello(_) => HELLO_PDU,
            Pdu::RouteRequest(_) => RREQ_PDU,
            Pdu::RouteReply(_) => RREP_PDU,
            Pdu::RouteError(_) => RERR_PDU,
            Pdu::UserData(_) => USER_DATA_PDU,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Pdu::Hello(_) => "HELLO",
            Pdu::RouteRequest(_) => "RREQ",
            Pdu::RouteReply(_) => "RREP",
            Pdu::RouteError(_) => "RERR",
            Pdu::UserData(_) => "DATA",
        }
    }
}
