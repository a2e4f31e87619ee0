use std::io;
use std::net::IpAddr;

/// Transport-level failures surfaced to the caller.
///
/// Probe-level non-success (timeouts, unreachable hosts) is never reported
/// through this type; those are regular [`Outcome`](crate::Outcome) values.
#[derive(Debug, thiserror::Error)]
pub enum PingError {
    #[error("failed to open ICMP endpoint: {0}")]
    Open(#[source] io::Error),

    #[error("failed to release ICMP endpoint: {0}")]
    Close(#[source] io::Error),

    #[error("transport handle is closed")]
    HandleClosed,

    #[error("unsupported target address: {0}")]
    UnsupportedAddress(IpAddr),

    #[error("raw address must be 4 or 16 bytes, got {0}")]
    InvalidAddressLength(usize),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ICMP I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Reasons a received packet cannot be attributed to the outstanding probe.
///
/// These never leave the probe executor on their own.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("packet truncated: {0} bytes")]
    Truncated(usize),

    #[error("unexpected ICMP type {icmp_type} code {code}")]
    UnexpectedType { icmp_type: u8, code: u8 },

    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("reply id={identifier} seq={sequence} does not match the outstanding request")]
    Mismatch { identifier: u16, sequence: u16 },
}

impl DecodeError {
    /// Stale or foreign traffic that should be discarded while waiting.
    pub fn is_discardable(&self) -> bool {
        !matches!(self, DecodeError::ChecksumMismatch { .. })
    }
}

/// Result type for transport operations
pub type PingResult<T> = Result<T, PingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_mismatch_is_not_discardable() {
        let err = DecodeError::ChecksumMismatch { expected: 1, actual: 2 };
        assert!(!err.is_discardable());
        assert!(DecodeError::Mismatch { identifier: 1, sequence: 2 }.is_discardable());
        assert!(DecodeError::Truncated(3).is_discardable());
    }

    #[test]
    fn test_error_messages() {
        let err = PingError::UnsupportedAddress("::1".parse().unwrap());
        assert_eq!(err.to_string(), "unsupported target address: ::1");
        assert_eq!(PingError::HandleClosed.to_string(), "transport handle is closed");
    }
}
