use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use crate::error::{PingError, PingResult};

/// Portable outcome of a single echo probe
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Timeout,
    Unreachable,
    TransportError,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Timeout => write!(f, "timeout"),
            Outcome::Unreachable => write!(f, "unreachable"),
            Outcome::TransportError => write!(f, "transport-error"),
        }
    }
}

/// One echo request as handed to the probe executor
#[derive(Debug, Clone)]
pub struct EchoRequest {
    pub target: IpAddr,
    pub payload: Vec<u8>,
    pub timeout: Duration,
}

impl EchoRequest {
    pub fn new(target: IpAddr, payload: Vec<u8>, timeout_ms: u64) -> Self {
        Self {
            target,
            payload,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

/// Result of one echo probe.
///
/// `rtt` is only meaningful for [`Outcome::Success`]. `raw_status` keeps the
/// IP status code the outcome was translated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoReply {
    pub outcome: Outcome,
    pub rtt: Option<Duration>,
    pub reply_source: Option<IpAddr>,
    pub raw_status: u32,
    pub ttl: Option<u8>,
}

impl EchoReply {
    pub fn success(source: IpAddr, rtt: Duration, ttl: Option<u8>) -> Self {
        Self {
            outcome: Outcome::Success,
            rtt: Some(rtt),
            reply_source: Some(source),
            raw_status: crate::status::IP_SUCCESS,
            ttl,
        }
    }

    pub fn timeout() -> Self {
        Self {
            outcome: Outcome::Timeout,
            rtt: None,
            reply_source: None,
            raw_status: crate::status::IP_REQ_TIMED_OUT,
            ttl: None,
        }
    }

    /// Build a reply whose outcome comes from the status table
    pub fn from_status(raw_status: u32, reply_source: Option<IpAddr>) -> Self {
        Self {
            outcome: crate::status::translate(raw_status),
            rtt: None,
            reply_source,
            raw_status,
            ttl: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Round-trip time in whole milliseconds
    pub fn rtt_ms(&self) -> Option<u64> {
        self.rtt.map(|rtt| rtt.as_millis() as u64)
    }
}

/// Interpret a raw network-order address buffer.
///
/// Four bytes give an IPv4 address, sixteen an IPv6 one. Anything else is rejected.
pub fn address_from_octets(octets: &[u8]) -> PingResult<IpAddr> {
    match octets.len() {
        4 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(octets);
            Ok(IpAddr::V4(Ipv4Addr::from(buf)))
        }
        16 => {
            let mut buf = [0u8; 16];
            buf.copy_from_slice(octets);
            Ok(IpAddr::V6(Ipv6Addr::from(buf)))
        }
        len => Err(PingError::InvalidAddressLength(len)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_octets() {
        let addr = address_from_octets(&[127, 0, 0, 1]).unwrap();
        assert_eq!(addr, IpAddr::V4(Ipv4Addr::LOCALHOST));

        let mut v6 = [0u8; 16];
        v6[15] = 1;
        assert_eq!(address_from_octets(&v6).unwrap(), IpAddr::V6(Ipv6Addr::LOCALHOST));

        assert!(matches!(
            address_from_octets(&[1, 2, 3]),
            Err(PingError::InvalidAddressLength(3))
        ));
    }

    #[test]
    fn test_timeout_reply_has_no_rtt() {
        let reply = EchoReply::timeout();
        assert_eq!(reply.outcome, Outcome::Timeout);
        assert_eq!(reply.rtt_ms(), None);
        assert!(!reply.is_success());
    }

    #[test]
    fn test_success_reply() {
        let reply = EchoReply::success(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            Duration::from_micros(1_500),
            Some(64),
        );
        assert!(reply.is_success());
        assert_eq!(reply.rtt_ms(), Some(1));
        assert_eq!(reply.raw_status, 0);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&Outcome::TransportError).unwrap();
        assert_eq!(json, "\"transport_error\"");
    }
}
