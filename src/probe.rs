//! Probe executor: one echo request, one blocking wait.
//!
//! Each call runs `Idle -> Sent -> {Succeeded | TimedOut | Unreachable | Failed}`
//! on its own; nothing carries over between calls except the handle's
//! sequence counter.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::codec::{self, IcmpResponse, MAX_PAYLOAD_SIZE};
use crate::error::{PingError, PingResult};
use crate::status::{self, IP_GENERAL_FAILURE};
#[cfg(windows)]
use crate::transport::Endpoint;
use crate::transport::TransportHandle;
use crate::types::{EchoReply, EchoRequest};

/// Send one echo request to `target` and wait for the matching answer.
///
/// Timeouts and unreachable hosts come back as `Ok` replies with the
/// corresponding [`Outcome`](crate::Outcome). `Err` is reserved for
/// transport failures: closed handle, bad arguments, or OS errors.
pub fn send_echo(
    handle: &TransportHandle,
    target: IpAddr,
    payload: &[u8],
    timeout_ms: u64,
) -> PingResult<EchoReply> {
    let target = match target {
        IpAddr::V4(addr) => addr,
        IpAddr::V6(_) => return Err(PingError::UnsupportedAddress(target)),
    };
    if timeout_ms == 0 {
        return Err(PingError::InvalidArgument("timeout must be greater than 0".to_string()));
    }
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(PingError::InvalidArgument(format!(
            "payload of {} bytes exceeds {} bytes",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }

    let timeout = Duration::from_millis(timeout_ms);
    let identifier = handle.identifier();
    let sequence = handle.next_sequence();

    let reply = handle.with_endpoint(|endpoint| {
        exchange(endpoint, identifier, sequence, target, payload, timeout)
    })?;

    debug!(
        %target,
        sequence,
        outcome = %reply.outcome,
        rtt_ms = ?reply.rtt_ms(),
        status = reply.raw_status,
        "echo probe finished"
    );
    Ok(reply)
}

/// Same as [`send_echo`] but taking a prepared request
pub fn send_request(handle: &TransportHandle, request: &EchoRequest) -> PingResult<EchoReply> {
    send_echo(handle, request.target, &request.payload, request.timeout_ms())
}

#[cfg(windows)]
fn exchange(
    endpoint: &mut Endpoint,
    _identifier: u16,
    _sequence: u16,
    target: Ipv4Addr,
    payload: &[u8],
    timeout: Duration,
) -> PingResult<EchoReply> {
    endpoint.send_echo(target, payload, timeout)
}

/// What the receive loop needs from an OS endpoint
#[cfg(unix)]
pub(crate) trait EchoSocket {
    /// Throw away replies and errors left over from earlier requests
    fn drain_pending(&mut self) -> std::io::Result<()>;

    fn send(&mut self, packet: &[u8], target: Ipv4Addr) -> std::io::Result<()>;

    /// Identifier that replies to `requested` will carry
    fn reply_identifier(&self, requested: u16) -> u16;

    /// Wait up to `wait` for one datagram; `None` when the wait ended empty
    fn recv(&mut self, wait: Duration) -> std::io::Result<Option<(&[u8], Option<IpAddr>)>>;

    /// Next ICMP error the kernel queued for this socket, if any
    fn take_icmp_error(&mut self) -> std::io::Result<Option<QueuedIcmpError>>;
}

/// An ICMP error read from a socket error queue
#[cfg(unix)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueuedIcmpError {
    pub icmp_type: u8,
    pub code: u8,
    /// Router or host that generated the error
    pub offender: Option<IpAddr>,
    /// Sequence number quoted from the request that triggered it
    pub quoted_sequence: Option<u16>,
}

#[cfg(unix)]
fn exchange<S: EchoSocket>(
    socket: &mut S,
    identifier: u16,
    sequence: u16,
    target: Ipv4Addr,
    payload: &[u8],
    timeout: Duration,
) -> PingResult<EchoReply> {
    // Housekeeping counts against the caller's timeout.
    let deadline = Instant::now() + timeout;
    socket.drain_pending()?;

    let packet = codec::encode_echo_request(identifier, sequence, payload);
    let sent_at = Instant::now();

    if let Err(e) = socket.send(&packet, target) {
        return errno_failure(e);
    }
    trace!(%target, identifier, sequence, bytes = packet.len(), "echo request sent");

    let expected_identifier = socket.reply_identifier(identifier);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(EchoReply::timeout());
        }

        let (bytes, from) = match socket.recv(remaining) {
            Ok(Some(received)) => received,
            Ok(None) => continue,
            Err(e) => match socket.take_icmp_error()? {
                Some(queued) if queued.quoted_sequence.is_some_and(|quoted| quoted != sequence) => {
                    trace!(?queued, "discarded ICMP error for an earlier request");
                    continue;
                }
                Some(queued) => {
                    trace!(?queued, "ICMP error reported through the error queue");
                    let code = status::status_from_icmp(queued.icmp_type, queued.code);
                    return Ok(EchoReply::from_status(code, queued.offender));
                }
                None => return errno_failure(e),
            },
        };
        let rtt = sent_at.elapsed();
        let source = from.unwrap_or(IpAddr::V4(target));

        let (message, ttl) = codec::strip_ipv4_header(bytes);
        match codec::decode_response(message, expected_identifier, sequence) {
            Ok(IcmpResponse::EchoReply(_)) => {
                return Ok(EchoReply::success(source, rtt, ttl));
            }
            Ok(IcmpResponse::Error { icmp_type, code }) => {
                trace!(%source, icmp_type, code, "ICMP error for outstanding request");
                return Ok(EchoReply::from_status(
                    status::status_from_icmp(icmp_type, code),
                    Some(source),
                ));
            }
            Err(e) if e.is_discardable() => {
                trace!(%source, "discarded packet: {}", e);
            }
            Err(e) => {
                warn!(%source, "corrupt reply to outstanding request: {}", e);
                return Ok(EchoReply::from_status(IP_GENERAL_FAILURE, Some(source)));
            }
        }
    }
}

/// Socket errors that stand for an ICMP delivery failure become an
/// unreachable reply; the rest are transport errors.
#[cfg(unix)]
fn errno_failure(err: std::io::Error) -> PingResult<EchoReply> {
    match status::status_from_io_error(&err) {
        Some(code) => {
            trace!("delivery failure reported by socket: {}", err);
            Ok(EchoReply::from_status(code, None))
        }
        None => Err(PingError::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn open_or_skip() -> Option<TransportHandle> {
        match TransportHandle::open() {
            Ok(handle) => Some(handle),
            Err(e) => {
                eprintln!("skipping: {}", e);
                None
            }
        }
    }

    #[test]
    fn test_loopback_echo() {
        let Some(handle) = open_or_skip() else { return };

        let payload = codec::payload_of_size(32);
        let reply = send_echo(&handle, LOCALHOST, &payload, 1000).unwrap();

        assert_eq!(reply.outcome, Outcome::Success);
        assert!(reply.rtt_ms().unwrap() < 1000);
        assert_eq!(reply.reply_source, Some(LOCALHOST));
        handle.close().unwrap();
    }

    #[test]
    fn test_repeated_probes_on_one_handle() {
        let Some(handle) = open_or_skip() else { return };

        for size in [0usize, 1, 56] {
            let reply = send_echo(&handle, LOCALHOST, &codec::payload_of_size(size), 1000).unwrap();
            assert_eq!(reply.outcome, Outcome::Success);
        }
    }

    #[test]
    fn test_shared_handle_serializes_probes() {
        let Some(handle) = open_or_skip() else { return };
        let handle = std::sync::Arc::new(handle);

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                std::thread::spawn(move || send_echo(&handle, LOCALHOST, b"shared", 1000))
            })
            .collect();

        for worker in workers {
            let reply = worker.join().unwrap().unwrap();
            assert_eq!(reply.outcome, Outcome::Success);
        }
    }

    #[test]
    fn test_send_request() {
        let Some(handle) = open_or_skip() else { return };
        let request = EchoRequest::new(LOCALHOST, b"request".to_vec(), 500);
        let reply = send_request(&handle, &request).unwrap();
        assert!(reply.is_success());
    }

    #[test]
    fn test_closed_handle_is_rejected() {
        let Some(handle) = open_or_skip() else { return };
        handle.close().unwrap();

        let result = send_echo(&handle, LOCALHOST, b"", 100);
        assert!(matches!(result, Err(PingError::HandleClosed)));
    }

    #[test]
    fn test_invalid_arguments() {
        let Some(handle) = open_or_skip() else { return };

        let v6: IpAddr = "::1".parse().unwrap();
        assert!(matches!(
            send_echo(&handle, v6, b"", 100),
            Err(PingError::UnsupportedAddress(_))
        ));
        assert!(matches!(
            send_echo(&handle, LOCALHOST, b"", 0),
            Err(PingError::InvalidArgument(_))
        ));
        let oversized = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            send_echo(&handle, LOCALHOST, &oversized, 100),
            Err(PingError::InvalidArgument(_))
        ));
    }

    // 192.0.2.0/24 is reserved for documentation and normally black-holed.
    #[test]
    #[ignore = "needs a routed network that drops TEST-NET-1 traffic"]
    fn test_timeout_is_bounded() {
        let Some(handle) = open_or_skip() else { return };
        let target: IpAddr = "192.0.2.1".parse().unwrap();

        let started = Instant::now();
        let reply = send_echo(&handle, target, b"blackhole", 300).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(reply.outcome, Outcome::Timeout);
        assert_eq!(reply.raw_status, status::IP_REQ_TIMED_OUT);
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(350));
    }

    #[test]
    #[ignore = "needs a local network where 10.255.255.254 answers host-unreachable"]
    fn test_unreachable_host() {
        let Some(handle) = open_or_skip() else { return };
        let target: IpAddr = "10.255.255.254".parse().unwrap();

        let reply = send_echo(&handle, target, b"", 3000).unwrap();
        assert_eq!(reply.outcome, Outcome::Unreachable);
        assert_ne!(reply.raw_status, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_delivery_failure_mapping() {
        let err = std::io::Error::from_raw_os_error(libc::ENETUNREACH);
        let reply = errno_failure(err).unwrap();
        assert_eq!(reply.outcome, Outcome::Unreachable);
        assert_eq!(reply.raw_status, status::IP_DEST_NET_UNREACHABLE);

        let err = std::io::Error::from_raw_os_error(libc::EBADF);
        assert!(matches!(errno_failure(err), Err(PingError::Io(_))));
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use std::collections::VecDeque;
        use std::io;

        const TARGET: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 7);
        const ROUTER: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1));

        /// In-memory socket that replays a fixed sequence of events
        #[derive(Default)]
        struct ScriptedSocket {
            incoming: VecDeque<io::Result<(Vec<u8>, IpAddr)>>,
            queued_errors: VecDeque<QueuedIcmpError>,
            drain_delay: Duration,
            sent: Vec<Vec<u8>>,
            current: Vec<u8>,
        }

        impl EchoSocket for ScriptedSocket {
            fn drain_pending(&mut self) -> io::Result<()> {
                std::thread::sleep(self.drain_delay);
                Ok(())
            }

            fn send(&mut self, packet: &[u8], _target: Ipv4Addr) -> io::Result<()> {
                self.sent.push(packet.to_vec());
                Ok(())
            }

            fn reply_identifier(&self, requested: u16) -> u16 {
                requested
            }

            fn recv(&mut self, wait: Duration) -> io::Result<Option<(&[u8], Option<IpAddr>)>> {
                match self.incoming.pop_front() {
                    Some(Ok((bytes, from))) => {
                        self.current = bytes;
                        Ok(Some((self.current.as_slice(), Some(from))))
                    }
                    Some(Err(e)) => Err(e),
                    None => {
                        std::thread::sleep(wait);
                        Ok(None)
                    }
                }
            }

            fn take_icmp_error(&mut self) -> io::Result<Option<QueuedIcmpError>> {
                Ok(self.queued_errors.pop_front())
            }
        }

        fn echo_reply(identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
            let mut reply = codec::encode_echo_request(identifier, sequence, payload);
            reply[0] = 0;
            reply[2..4].copy_from_slice(&[0, 0]);
            let sum = codec::checksum(&reply);
            reply[2..4].copy_from_slice(&sum.to_be_bytes());
            reply
        }

        /// Destination unreachable quoting the request inside an IPv4 header
        fn host_unreachable(identifier: u16, sequence: u16) -> Vec<u8> {
            let request = codec::encode_echo_request(identifier, sequence, b"");
            let mut quoted = vec![0u8; codec::IPV4_HEADER_SIZE];
            quoted[0] = 0x45;
            quoted[8] = 64;
            quoted[9] = 1;
            quoted[16..20].copy_from_slice(&TARGET.octets());
            quoted.extend_from_slice(&request);

            let mut message = vec![3, 1, 0, 0, 0, 0, 0, 0];
            message.extend_from_slice(&quoted);
            let sum = codec::checksum(&message);
            message[2..4].copy_from_slice(&sum.to_be_bytes());
            message
        }

        #[test]
        fn test_foreign_and_stale_packets_are_skipped() {
            let target = IpAddr::V4(TARGET);
            let mut socket = ScriptedSocket::default();
            socket.incoming.extend([
                Ok((echo_reply(99, 5, b"abc"), target)),
                Ok((echo_reply(7, 4, b"abc"), target)),
                Ok((codec::encode_echo_request(7, 5, b"abc"), target)),
                Ok((vec![0, 0, 0], target)),
                Ok((echo_reply(7, 5, b"abc"), target)),
            ]);

            let reply = exchange(&mut socket, 7, 5, TARGET, b"abc", Duration::from_millis(500)).unwrap();

            assert_eq!(reply.outcome, Outcome::Success);
            assert_eq!(reply.reply_source, Some(target));
            assert!(socket.incoming.is_empty());
            assert_eq!(socket.sent, vec![codec::encode_echo_request(7, 5, b"abc")]);
        }

        #[test]
        fn test_correlated_icmp_error_is_unreachable() {
            let mut socket = ScriptedSocket::default();
            socket.incoming.extend([
                Ok((host_unreachable(7, 4), ROUTER)),
                Ok((host_unreachable(7, 5), ROUTER)),
            ]);

            let reply = exchange(&mut socket, 7, 5, TARGET, b"", Duration::from_millis(500)).unwrap();

            assert_eq!(reply.outcome, Outcome::Unreachable);
            assert_eq!(reply.raw_status, status::IP_DEST_HOST_UNREACHABLE);
            assert_eq!(reply.reply_source, Some(ROUTER));
            assert_eq!(reply.rtt, None);
        }

        #[test]
        fn test_error_queue_entry_is_unreachable() {
            let mut socket = ScriptedSocket::default();
            socket.incoming.extend([
                Err(io::Error::from_raw_os_error(libc::EHOSTUNREACH)),
                Err(io::Error::from_raw_os_error(libc::EHOSTUNREACH)),
            ]);
            socket.queued_errors.extend([
                QueuedIcmpError {
                    icmp_type: 3,
                    code: 1,
                    offender: Some(ROUTER),
                    quoted_sequence: Some(4),
                },
                QueuedIcmpError {
                    icmp_type: 11,
                    code: 0,
                    offender: Some(ROUTER),
                    quoted_sequence: Some(5),
                },
            ]);

            let reply = exchange(&mut socket, 7, 5, TARGET, b"", Duration::from_millis(500)).unwrap();

            assert_eq!(reply.outcome, Outcome::Unreachable);
            assert_eq!(reply.raw_status, status::IP_TTL_EXPIRED_TRANSIT);
            assert_eq!(reply.reply_source, Some(ROUTER));
        }

        #[test]
        fn test_errno_without_queue_entry_is_unreachable() {
            let mut socket = ScriptedSocket::default();
            socket
                .incoming
                .push_back(Err(io::Error::from_raw_os_error(libc::EHOSTUNREACH)));

            let reply = exchange(&mut socket, 7, 5, TARGET, b"", Duration::from_millis(500)).unwrap();

            assert_eq!(reply.outcome, Outcome::Unreachable);
            assert_eq!(reply.raw_status, status::IP_DEST_HOST_UNREACHABLE);
            assert_eq!(reply.reply_source, None);
        }

        #[test]
        fn test_unmapped_socket_error_is_transport_failure() {
            let mut socket = ScriptedSocket::default();
            socket.incoming.push_back(Err(io::Error::from_raw_os_error(libc::EBADF)));

            let result = exchange(&mut socket, 7, 5, TARGET, b"", Duration::from_millis(500));
            assert!(matches!(result, Err(PingError::Io(_))));
        }

        #[test]
        fn test_drain_counts_against_timeout() {
            let mut socket = ScriptedSocket {
                drain_delay: Duration::from_millis(80),
                ..Default::default()
            };

            let started = Instant::now();
            let reply = exchange(&mut socket, 7, 5, TARGET, b"", Duration::from_millis(100)).unwrap();
            let elapsed = started.elapsed();

            assert_eq!(reply.outcome, Outcome::Timeout);
            assert_eq!(reply.raw_status, status::IP_REQ_TIMED_OUT);
            assert!(elapsed >= Duration::from_millis(100));
            assert!(elapsed < Duration::from_millis(160), "took {:?}", elapsed);
        }
    }
}
