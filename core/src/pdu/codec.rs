// PDU codec - ';'-separated ASCII decimal fields
//
// Every frame starts with the decimal type code. User data frames end with
// the raw payload, which may itself contain separators.

use super::types::{
    Hello, Pdu, RouteError, RouteReply, RouteRequest, UserData, HELLO_PDU, RERR_PDU, RREP_PDU,
    RREQ_PDU, USER_DATA_PDU,
};
use std::str::FromStr;
use thiserror::Error;

const FIELD_SEPARATOR: u8 = b';';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PduError {
    #[error("{kind} frame has {found} fields, expected {expected}")]
    FieldCount {
        kind: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: u8, found: u8 },
    #[error("unknown PDU type {0}")]
    UnknownType(u8),
    #[error("invalid {0} field")]
    InvalidField(&'static str),
}

fn split_fields<'a>(
    frame: &'a [u8],
    kind: &'static str,
    expected: usize,
) -> Result<Vec<&'a [u8]>, PduError> {
    let fields: Vec<&[u8]> = frame.splitn(expected, |b| *b == FIELD_SEPARATOR).collect();
    if fields.len() != expected {
        return Err(PduError::FieldCount {
            kind,
            expected,
            found: fields.len(),
        });
    }
    Ok(fields)
}

fn parse_number<T: FromStr>(field: &[u8], name: &'static str) -> Result<T, PduError> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(PduError::InvalidField(name))
}

fn expect_type(field: &[u8], expected: u8) -> Result<(), PduError> {
    let found: u8 = parse_number(field, "type")?;
    if found != expected {
        return Err(PduError::TypeMismatch { expected, found });
    }
    Ok(())
}

/// Reads the type code without decoding the rest of the frame.
pub fn peek_type(frame: &[u8]) -> Result<u8, PduError> {
    let head = frame
        .split(|b| *b == FIELD_SEPARATOR)
        .next()
        .unwrap_or_default();
    parse_number(head, "type")
}

impl Hello {
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "{};{};{}",
            HELLO_PDU, self.source_address, self.source_sequence_number
        )
        .into_bytes()
    }

    pub fn from_bytes(frame: &[u8]) -> Result<Self, PduError> {
        let fields = split_fields(frame, "HELLO", 3)?;
        expect_type(fields[0], HELLO_PDU)?;
        Ok(Self {
            source_address: parse_number(fields[1], "source address")?,
            source_sequence_number: parse_number(fields[2], "source sequence number")?,
        })
    }
}

impl RouteRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "{};{};{};{};{};{};{}",
            RREQ_PDU,
            self.source_address,
            self.destination_address,
            self.destination_sequence_number,
            self.source_sequence_number,
            self.hop_count,
            self.broadcast_id
        )
        .into_bytes()
    }

    pub fn from_bytes(frame: &[u8]) -> Result<Self, PduError> {
        let fields = split_fields(frame, "RREQ", 7)?;
        expect_type(fields[0], RREQ_PDU)?;
        Ok(Self {
            source_address: parse_number(fields[1], "source address")?,
            destination_address: parse_number(fields[2], "destination address")?,
            destination_sequence_number: parse_number(fields[3], "destination sequence number")?,
            source_sequence_number: parse_number(fields[4], "source sequence number")?,
            hop_count: parse_number(fields[5], "hop count")?,
            broadcast_id: parse_number(fields[6], "broadcast id")?,
        })
    }
}

impl RouteReply {
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "{};{};{};{};{};{}",
            RREP_PDU,
            self.source_address,
            self.destination_address,
            self.destination_sequence_number,
            self.source_sequence_number,
            self.hop_count
        )
        .into_bytes()
    }

    pub fn from_bytes(frame: &[u8]) -> Result<Self, PduError> {
        let fields = split_fields(frame, "RREP", 6)?;
        expect_type(fields[0], RREP_PDU)?;
        Ok(Self {
            source_address: parse_number(fields[1], "source address")?,
            destination_address: parse_number(fields[2], "destination address")?,
            destination_sequence_number: parse_number(fields[3], "destination sequence number")?,
            source_sequence_number: parse_number(fields[4], "source sequence number")?,
            hop_count: parse_number(fields[5], "hop count")?,
        })
    }
}

impl RouteError {
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "{};{};{}",
            RERR_PDU, self.unreachable_address, self.unreachable_sequence_number
        )
        .into_bytes()
    }

    pub fn from_bytes(frame: &[u8]) -> Result<Self, PduError> {
        let fields = split_fields(frame, "RERR", 3)?;
        expect_type(fields[0], RERR_PDU)?;
        Ok(Self {
            unreachable_address: parse_number(fields[1], "unreachable address")?,
            unreachable_sequence_number: parse_number(fields[2], "unreachable sequence number")?,
        })
    }
}

impl UserData {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = format!(
            "{};{};{};",
            USER_DATA_PDU, self.source_address, self.destination_address
        )
        .into_bytes();
        frame.extend_from_slice(&self.payload);
        frame
    }

    pub fn from_bytes(frame: &[u8]) -> Result<Self, PduError> {
        let fields = split_fields(frame, "DATA", 4)?;
        expect_type(fields[0], USER_DATA_PDU)?;
        Ok(Self {
            source_address: parse_number(fields[1], "source address")?,
            destination_address: parse_number(fields[2], "destination address")?,
            payload: fields[3].to_vec(),
        })
    }
}

impl Pdu {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Pdu::Hello(hello) => hello.to_bytes(),
            Pdu::RouteRequest(rreq) => rreq.to_bytes(),
            Pdu::RouteReply(rrep) => rrep.to_bytes(),
            Pdu::RouteError(rerr) => rerr.to_bytes(),
            Pdu::UserData(data) => data.to_bytes(),
        }
    }

    pub fn from_bytes(frame: &[u8]) -> Result<Self, PduError> {
        match peek_type(frame)? {
            HELLO_PDU => Hello::from_bytes(frame).map(Pdu::Hello),
            RREQ_PDU => RouteRequest::from_bytes(frame).map(Pdu::RouteRequest),
            RREP_PDU => RouteReply::from_bytes(frame).map(Pdu::RouteReply),
            RERR_PDU => RouteError::from_bytes(frame).map(Pdu::RouteError),
            USER_DATA_PDU => UserData::from_bytes(frame).map(Pdu::UserData),
            other => Err(PduError::UnknownType(other)),
        }
    }
}
