//! Protocol-wide constants and address helpers.
//!
//! Node addresses map onto the last octet of an IPv4 subnet, so the valid
//! range is `0..=254` and `255` doubles as the broadcast address.

/// Address of a node in the mesh.
pub type NodeAddress = u32;
/// Destination sequence number (AODV freshness counter).
pub type SequenceNumber = u32;
/// Per-originator route request identifier.
pub type BroadcastId = u32;
/// Application-chosen identifier echoed back in send notifications.
pub type PacketId = u32;

pub const MIN_VALID_NODE_ADDRESS: NodeAddress = 0;
pub const MAX_VALID_NODE_ADDRESS: NodeAddress = 254;
pub const BROADCAST_ADDRESS: NodeAddress = 255;

pub const FIRST_BROADCAST_ID: BroadcastId = 0;
pub const MAX_BROADCAST_ID: BroadcastId = i32::MAX as u32;

/// Marks "no sequence number known yet".
pub const UNKNOWN_SEQUENCE_NUMBER: SequenceNumber = 0;
pub const FIRST_SEQUENCE_NUMBER: SequenceNumber = 1;
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = i32::MAX as u32;
/// Distance beyond which two sequence numbers are treated as wrapped.
pub const SEQUENCE_NUMBER_INTERVAL: SequenceNumber = MAX_SEQUENCE_NUMBER / 2;

/// Largest frame the transports accept.
pub const MAX_PACKAGE_SIZE: usize = 54_000;
/// Room reserved for the `type;src;dest;` prefix of a user data frame.
pub const USER_DATA_HEADER_RESERVE: usize = 16;
/// Largest application payload that still fits in one frame.
pub const MAX_USER_DATA_SIZE: usize = MAX_PACKAGE_SIZE - USER_DATA_HEADER_RESERVE;
/// Datagram receive buffer used by the UDP transport: one byte past the
/// largest frame, so a datagram that fills it is known to be oversized.
pub const RECEIVE_BUFFER_SIZE: usize = MAX_PACKAGE_SIZE + 1;

pub const ROUTE_ALIVE_TIME_MS: u64 = 3_000;
pub const BROADCAST_INTERVAL_MS: u64 = 1_000;
pub const PATH_DISCOVERY_TIME_MS: u64 = 3_000;
/// Total number of RREQ broadcasts per discovery, the first included.
pub const MAX_NUMBER_OF_RREQ_RETRIES: u32 = 2;

/// True for unicast-capable node addresses (`0..=254`).
pub fn is_valid_node_address(address: NodeAddress) -> bool {
    (MIN_VALID_NODE_ADDRESS..=MAX_VALID_NODE_ADDRESS).contains(&address)
}

/// True for `UNKNOWN` or anything in `FIRST..=MAX`.
pub fn is_valid_sequence_number(sequence_number: SequenceNumber) -> bool {
    sequence_number == UNKNOWN_SEQUENCE_NUMBER
        || (FIRST_SEQUENCE_NUMBER..=MAX_SEQUENCE_NUMBER).contains(&sequence_number)
}

pub fn is_valid_broadcast_id(broadcast_id: BroadcastId) -> bool {
    (FIRST_BROADCAST_ID..=MAX_BROADCAST_ID).contains(&broadcast_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_range() {
        assert!(is_valid_node_address(0));
        assert!(is_valid_node_address(254));
        assert!(!is_valid_node_address(BROADCAST_ADDRESS));
        assert!(!is_valid_node_address(1000));
    }

    #[test]
    fn test_sequence_number_range() {
        assert!(is_valid_sequence_number(UNKNOWN_SEQUENCE_NUMBER));
        assert!(is_valid_sequence_number(FIRST_SEQUENCE_NUMBER));
        assert!(is_valid_sequence_number(MAX_SEQUENCE_NUMBER));
        assert!(!is_valid_sequence_number(MAX_SEQUENCE_NUMBER + 1));
        assert_eq!(SEQUENCE_NUMBER_INTERVAL, 1_073_741_823);
    }

    #[test]
    fn test_user_data_fits_in_frame() {
        assert!(MAX_USER_DATA_SIZE < MAX_PACKAGE_SIZE);
        // "0;254;255;" is the longest possible header
        assert!("0;254;255;".len() <= USER_DATA_HEADER_RESERVE);
    }
}
