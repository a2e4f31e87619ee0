//! Translation of OS and ICMP status codes into [`Outcome`].
//!
//! The code space is the IP helper `IP_STATUS` table. Windows reports these
//! values directly; on Unix the probe executor derives them from the ICMP
//! type/code of a correlated error message or from the socket errno.

use std::io;

use crate::types::Outcome;

pub const IP_SUCCESS: u32 = 0;
pub const IP_STATUS_BASE: u32 = 11000;
pub const IP_BUF_TOO_SMALL: u32 = 11001;
pub const IP_DEST_NET_UNREACHABLE: u32 = 11002;
pub const IP_DEST_HOST_UNREACHABLE: u32 = 11003;
pub const IP_DEST_PROT_UNREACHABLE: u32 = 11004;
pub const IP_DEST_PORT_UNREACHABLE: u32 = 11005;
pub const IP_NO_RESOURCES: u32 = 11006;
pub const IP_BAD_OPTION: u32 = 11007;
pub const IP_HW_ERROR: u32 = 11008;
pub const IP_PACKET_TOO_BIG: u32 = 11009;
pub const IP_REQ_TIMED_OUT: u32 = 11010;
pub const IP_BAD_REQ: u32 = 11011;
pub const IP_BAD_ROUTE: u32 = 11012;
pub const IP_TTL_EXPIRED_TRANSIT: u32 = 11013;
pub const IP_TTL_EXPIRED_REASSEM: u32 = 11014;
pub const IP_PARAM_PROBLEM: u32 = 11015;
pub const IP_SOURCE_QUENCH: u32 = 11016;
pub const IP_OPTION_TOO_BIG: u32 = 11017;
pub const IP_BAD_DESTINATION: u32 = 11018;
pub const IP_DEST_UNREACHABLE: u32 = 11040;
pub const IP_TIME_EXCEEDED: u32 = 11041;
pub const IP_BAD_HEADER: u32 = 11042;
pub const IP_UNRECOGNIZED_NEXT_HEADER: u32 = 11043;
pub const IP_ICMP_ERROR: u32 = 11044;
pub const IP_DEST_SCOPE_MISMATCH: u32 = 11045;
pub const IP_GENERAL_FAILURE: u32 = 11050;
pub const IP_PENDING: u32 = 11255;

const ICMP_DEST_UNREACHABLE: u8 = 3;
const ICMP_SOURCE_QUENCH: u8 = 4;
const ICMP_TIME_EXCEEDED: u8 = 11;
const ICMP_PARAMETER_PROBLEM: u8 = 12;

/// Map a status code to its portable outcome. Unknown codes are transport errors.
pub fn translate(status: u32) -> Outcome {
    match status {
        IP_SUCCESS => Outcome::Success,
        IP_REQ_TIMED_OUT => Outcome::Timeout,
        IP_DEST_NET_UNREACHABLE
        | IP_DEST_HOST_UNREACHABLE
        | IP_DEST_PROT_UNREACHABLE
        | IP_DEST_PORT_UNREACHABLE
        | IP_PACKET_TOO_BIG
        | IP_BAD_ROUTE
        | IP_TTL_EXPIRED_TRANSIT
        | IP_TTL_EXPIRED_REASSEM
        | IP_PARAM_PROBLEM
        | IP_SOURCE_QUENCH
        | IP_BAD_DESTINATION
        | IP_DEST_UNREACHABLE
        | IP_TIME_EXCEEDED
        | IP_DEST_SCOPE_MISMATCH => Outcome::Unreachable,
        _ => Outcome::TransportError,
    }
}

/// Human-readable reason for a status code
pub fn describe(status: u32) -> &'static str {
    match status {
        IP_SUCCESS => "success",
        IP_BUF_TOO_SMALL => "reply buffer too small",
        IP_DEST_NET_UNREACHABLE => "destination network unreachable",
        IP_DEST_HOST_UNREACHABLE => "destination host unreachable",
        IP_DEST_PROT_UNREACHABLE => "destination protocol unreachable",
        IP_DEST_PORT_UNREACHABLE => "destination port unreachable",
        IP_NO_RESOURCES => "insufficient IP resources",
        IP_BAD_OPTION => "bad IP option",
        IP_HW_ERROR => "hardware error",
        IP_PACKET_TOO_BIG => "packet too big",
        IP_REQ_TIMED_OUT => "request timed out",
        IP_BAD_REQ => "bad request",
        IP_BAD_ROUTE => "bad route",
        IP_TTL_EXPIRED_TRANSIT => "TTL expired in transit",
        IP_TTL_EXPIRED_REASSEM => "TTL expired during reassembly",
        IP_PARAM_PROBLEM => "parameter problem",
        IP_SOURCE_QUENCH => "source quench",
        IP_OPTION_TOO_BIG => "IP option too big",
        IP_BAD_DESTINATION => "bad destination",
        IP_DEST_UNREACHABLE => "destination unreachable",
        IP_TIME_EXCEEDED => "time exceeded",
        IP_BAD_HEADER => "bad IP header",
        IP_UNRECOGNIZED_NEXT_HEADER => "unrecognized next header",
        IP_ICMP_ERROR => "ICMP error",
        IP_DEST_SCOPE_MISMATCH => "destination scope mismatch",
        IP_GENERAL_FAILURE => "general failure",
        IP_PENDING => "request pending",
        _ => "unknown status",
    }
}

/// Status code for an ICMP error message correlated to our request
pub fn status_from_icmp(icmp_type: u8, code: u8) -> u32 {
    match (icmp_type, code) {
        (0, _) => IP_SUCCESS,
        (ICMP_DEST_UNREACHABLE, 0) | (ICMP_DEST_UNREACHABLE, 6) => IP_DEST_NET_UNREACHABLE,
        (ICMP_DEST_UNREACHABLE, 1) | (ICMP_DEST_UNREACHABLE, 7) => IP_DEST_HOST_UNREACHABLE,
        (ICMP_DEST_UNREACHABLE, 2) => IP_DEST_PROT_UNREACHABLE,
        (ICMP_DEST_UNREACHABLE, 3) => IP_DEST_PORT_UNREACHABLE,
        (ICMP_DEST_UNREACHABLE, 4) => IP_PACKET_TOO_BIG,
        (ICMP_DEST_UNREACHABLE, 5) => IP_BAD_ROUTE,
        (ICMP_DEST_UNREACHABLE, _) => IP_DEST_UNREACHABLE,
        (ICMP_SOURCE_QUENCH, _) => IP_SOURCE_QUENCH,
        (ICMP_TIME_EXCEEDED, 0) => IP_TTL_EXPIRED_TRANSIT,
        (ICMP_TIME_EXCEEDED, 1) => IP_TTL_EXPIRED_REASSEM,
        (ICMP_TIME_EXCEEDED, _) => IP_TIME_EXCEEDED,
        (ICMP_PARAMETER_PROBLEM, _) => IP_PARAM_PROBLEM,
        _ => IP_ICMP_ERROR,
    }
}

/// Status code for a socket error that stands for a delivery failure.
///
/// Returns `None` when the error is a genuine transport failure.
#[cfg(unix)]
pub fn status_from_io_error(err: &io::Error) -> Option<u32> {
    match err.raw_os_error()? {
        libc::ENETUNREACH => Some(IP_DEST_NET_UNREACHABLE),
        libc::EHOSTUNREACH | libc::EHOSTDOWN => Some(IP_DEST_HOST_UNREACHABLE),
        libc::ENOPROTOOPT => Some(IP_DEST_PROT_UNREACHABLE),
        libc::ECONNREFUSED => Some(IP_DEST_PORT_UNREACHABLE),
        libc::EMSGSIZE => Some(IP_PACKET_TOO_BIG),
        libc::EOPNOTSUPP => Some(IP_BAD_ROUTE),
        _ => None,
    }
}

#[cfg(not(unix))]
pub fn status_from_io_error(_err: &io::Error) -> Option<u32> {
    None
}
