//! Protocol data units and their text wire format.

pub mod codec;
pub mod types;

pub use codec::{peek_type, PduError};
pub use types::{
    Hello, Pdu, RouteError, RouteReply, RouteRequest, UserData, HELLO_PDU, RERR_PDU, RREP_PDU,
    RREQ_PDU, USER_DATA_PDU,
};
