//! ICMP echo wire format.
//!
//! Requests are built and replies are parsed through `pnet` packet views.
//! Every decode path correlates the identifier/sequence pair before the
//! checksum so that only traffic belonging to the outstanding probe can
//! surface as a checksum failure.

use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::{EchoRequestPacket, MutableEchoRequestPacket};
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::Packet;

use crate::error::DecodeError;

/// ICMP echo header: type, code, checksum, identifier, sequence
pub const ICMP_HEADER_SIZE: usize = 8;

/// Minimum IPv4 header size
pub const IPV4_HEADER_SIZE: usize = 20;

/// Largest echo payload that fits in one IPv4 datagram
pub const MAX_PAYLOAD_SIZE: usize = 65_535 - IPV4_HEADER_SIZE - ICMP_HEADER_SIZE;

/// Echo reply that passed type, correlation and checksum validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedEcho {
    pub identifier: u16,
    pub sequence: u16,
    pub payload_len: usize,
}

/// Any ICMP message that answers the outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpResponse {
    EchoReply(ParsedEcho),
    /// Error message quoting our request (unreachable, time exceeded, ...)
    Error { icmp_type: u8, code: u8 },
}

/// Internet checksum over an ICMP message, skipping its checksum field
pub fn checksum(message: &[u8]) -> u16 {
    pnet::util::checksum(message, 1)
}

/// Build an echo request with a valid checksum
pub fn encode_echo_request(identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + payload.len()];
    if let Some(mut request) = MutableEchoRequestPacket::new(&mut buffer) {
        request.set_icmp_type(IcmpTypes::EchoRequest);
        request.set_icmp_code(IcmpCode::new(0));
        request.set_identifier(identifier);
        request.set_sequence_number(sequence);
        request.set_payload(payload);
    }
    let sum = checksum(&buffer);
    buffer[2..4].copy_from_slice(&sum.to_be_bytes());
    buffer
}

/// Validate an echo reply against the outstanding request
pub fn decode_echo_reply(
    bytes: &[u8],
    expected_identifier: u16,
    expected_sequence: u16,
) -> Result<ParsedEcho, DecodeError> {
    let reply = EchoReplyPacket::new(bytes).ok_or(DecodeError::Truncated(bytes.len()))?;

    if reply.get_icmp_type() != IcmpTypes::EchoReply || reply.get_icmp_code().0 != 0 {
        return Err(DecodeError::UnexpectedType {
            icmp_type: reply.get_icmp_type().0,
            code: reply.get_icmp_code().0,
        });
    }

    let identifier = reply.get_identifier();
    let sequence = reply.get_sequence_number();
    if identifier != expected_identifier || sequence != expected_sequence {
        return Err(DecodeError::Mismatch { identifier, sequence });
    }

    verify_checksum(bytes, reply.get_checksum())?;

    Ok(ParsedEcho {
        identifier,
        sequence,
        payload_len: reply.payload().len(),
    })
}

/// Decode an echo reply or an ICMP error message that quotes our request
pub fn decode_response(
    bytes: &[u8],
    expected_identifier: u16,
    expected_sequence: u16,
) -> Result<IcmpResponse, DecodeError> {
    let message = IcmpPacket::new(bytes).ok_or(DecodeError::Truncated(bytes.len()))?;
    let icmp_type = message.get_icmp_type();
    let code = message.get_icmp_code().0;

    if icmp_type == IcmpTypes::EchoReply {
        return decode_echo_reply(bytes, expected_identifier, expected_sequence)
            .map(IcmpResponse::EchoReply);
    }

    let is_error = icmp_type == IcmpTypes::DestinationUnreachable
        || icmp_type == IcmpTypes::TimeExceeded
        || icmp_type == IcmpTypes::ParameterProblem
        || icmp_type == IcmpTypes::SourceQuench;
    if !is_error {
        return Err(DecodeError::UnexpectedType { icmp_type: icmp_type.0, code });
    }

    // Error body: 4 unused bytes, then the original IP header and the
    // first 8 bytes of the datagram it carried.
    if bytes.len() < ICMP_HEADER_SIZE {
        return Err(DecodeError::Truncated(bytes.len()));
    }
    let quoted = Ipv4Packet::new(&bytes[ICMP_HEADER_SIZE..])
        .ok_or(DecodeError::Truncated(bytes.len()))?;
    let quoted_header_len = quoted.get_header_length() as usize * 4;
    let quoted_icmp = bytes
        .get(ICMP_HEADER_SIZE + quoted_header_len..)
        .filter(|rest| quoted_header_len >= IPV4_HEADER_SIZE && rest.len() >= ICMP_HEADER_SIZE)
        .ok_or(DecodeError::Truncated(bytes.len()))?;
    let request = EchoRequestPacket::new(quoted_icmp).ok_or(DecodeError::Truncated(bytes.len()))?;

    if request.get_icmp_type() != IcmpTypes::EchoRequest {
        return Err(DecodeError::UnexpectedType {
            icmp_type: request.get_icmp_type().0,
            code: request.get_icmp_code().0,
        });
    }

    let identifier = request.get_identifier();
    let sequence = request.get_sequence_number();
    if identifier != expected_identifier || sequence != expected_sequence {
        return Err(DecodeError::Mismatch { identifier, sequence });
    }

    verify_checksum(bytes, message.get_checksum())?;

    Ok(IcmpResponse::Error { icmp_type: icmp_type.0, code })
}

/// Split off a leading IPv4 header, returning the ICMP message and the header TTL.
///
/// Raw sockets (and datagram sockets on BSD-derived systems) deliver the IP
/// header; Linux datagram sockets do not. No ICMP type we accept starts with
/// a version nibble of 4, so the first byte tells the two apart.
pub fn strip_ipv4_header(bytes: &[u8]) -> (&[u8], Option<u8>) {
    if bytes.first().map(|b| b >> 4) != Some(4) {
        return (bytes, None);
    }
    match Ipv4Packet::new(bytes) {
        Some(header) => {
            let header_len = header.get_header_length() as usize * 4;
            if header_len < IPV4_HEADER_SIZE || header_len > bytes.len() {
                return (bytes, None);
            }
            (&bytes[header_len..], Some(header.get_ttl()))
        }
        None => (bytes, None),
    }
}

/// Default filler payload of the requested size
pub fn payload_of_size(size: usize) -> Vec<u8> {
    (0..size).map(|i| b'a' + (i % 23) as u8).collect()
}

fn verify_checksum(message: &[u8], carried: u16) -> Result<(), DecodeError> {
    let expected = checksum(message);
    if expected != carried {
        return Err(DecodeError::ChecksumMismatch { expected, actual: carried });
    }
    Ok(())
}
