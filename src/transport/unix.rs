use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::IntoRawFd;
use std::time::Duration;
use tracing::{debug, trace};

use super::EndpointKind;
use crate::probe::{EchoSocket, QueuedIcmpError};

/// Large enough for any IPv4 datagram
const RECV_BUFFER_SIZE: usize = 65_536;

/// Upper bound on queued datagrams discarded before a probe
const MAX_DRAIN: usize = 1024;

/// ICMP socket owned by a transport handle
pub(crate) struct Endpoint {
    socket: Socket,
    kind: EndpointKind,
    buffer: Vec<MaybeUninit<u8>>,
}

impl Endpoint {
    /// Prefer an unprivileged datagram socket, fall back to a raw one
    pub(crate) fn open() -> io::Result<Self> {
        let (socket, kind) = match Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)) {
            Ok(socket) => (socket, EndpointKind::Datagram),
            Err(dgram_err) => {
                debug!("datagram ICMP socket unavailable ({}), trying raw socket", dgram_err);
                let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
                (socket, EndpointKind::Raw)
            }
        };

        // Datagram sockets only see ICMP errors through the error queue.
        #[cfg(target_os = "linux")]
        if kind == EndpointKind::Datagram {
            errqueue::enable(&socket)?;
        }

        Ok(Self {
            socket,
            kind,
            buffer: vec![MaybeUninit::uninit(); RECV_BUFFER_SIZE],
        })
    }

    pub(crate) fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Close the descriptor, reporting any error from the OS
    pub(crate) fn release(self) -> io::Result<()> {
        let fd = self.socket.into_raw_fd();
        // SAFETY: `fd` was just taken out of the socket and is closed exactly once.
        if unsafe { libc::close(fd) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl EchoSocket for Endpoint {
    /// Discard replies and pending errors left over from earlier probes
    fn drain_pending(&mut self) -> io::Result<()> {
        if let Some(err) = self.socket.take_error()? {
            trace!("discarded pending socket error: {}", err);
        }
        while let Some(stale) = self.take_icmp_error()? {
            trace!(?stale, "discarded queued ICMP error");
        }

        self.socket.set_nonblocking(true)?;
        let mut drained = 0;
        while drained < MAX_DRAIN {
            match self.socket.recv(&mut self.buffer) {
                Ok(_) => drained += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // A queued ICMP error on a connected socket; it belongs to an old probe.
                Err(_) => drained += 1,
            }
        }
        self.socket.set_nonblocking(false)?;

        if drained > 0 {
            trace!(drained, "discarded stale ICMP traffic");
        }
        Ok(())
    }

    /// Send an encoded echo request.
    ///
    /// Datagram sockets are connected to the target first so that ICMP
    /// errors for the probe come back as socket errors.
    fn send(&mut self, packet: &[u8], target: Ipv4Addr) -> io::Result<()> {
        let addr = SockAddr::from(SocketAddrV4::new(target, 0));
        match self.kind {
            EndpointKind::Datagram => {
                self.socket.connect(&addr)?;
                self.socket.send(packet)?;
            }
            _ => {
                self.socket.send_to(packet, &addr)?;
            }
        }
        Ok(())
    }

    /// Identifier the replies will carry.
    ///
    /// Linux datagram sockets replace the identifier with the socket's
    /// local port; everything else echoes the one we sent.
    fn reply_identifier(&self, requested: u16) -> u16 {
        if self.kind != EndpointKind::Datagram || !cfg!(target_os = "linux") {
            return requested;
        }
        match self.socket.local_addr().ok().and_then(|addr| addr.as_socket()) {
            Some(SocketAddr::V4(local)) if local.port() != 0 => local.port(),
            _ => requested,
        }
    }

    /// Wait up to `wait` for one datagram.
    ///
    /// Returns `Ok(None)` when nothing arrived in time or a signal cut the
    /// wait short.
    fn recv(&mut self, wait: Duration) -> io::Result<Option<(&[u8], Option<IpAddr>)>> {
        // A zero timeout means "block forever" to the socket layer.
        let wait = wait.max(Duration::from_micros(1));
        self.socket.set_read_timeout(Some(wait))?;

        let (len, from) = match self.socket.recv_from(&mut self.buffer) {
            Ok(received) => received,
            Err(e) if wait_expired(&e) => return Ok(None),
            Err(e) => return Err(e),
        };

        // SAFETY: recv_from initialized the first `len` bytes of the buffer.
        let bytes = unsafe { std::slice::from_raw_parts(self.buffer.as_ptr() as *const u8, len) };
        Ok(Some((bytes, from.as_socket().map(|addr| addr.ip()))))
    }

    fn take_icmp_error(&mut self) -> io::Result<Option<QueuedIcmpError>> {
        #[cfg(target_os = "linux")]
        if self.kind == EndpointKind::Datagram {
            return errqueue::read(&self.socket);
        }
        Ok(None)
    }
}

/// Errors that only mean the wait ended without data
fn wait_expired(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// `IP_RECVERR` error queue of Linux datagram ICMP sockets.
///
/// The kernel treats net/host unreachable and time exceeded as soft errors
/// and only reports them here.
#[cfg(target_os = "linux")]
mod errqueue {
    use socket2::Socket;
    use std::io;
    use std::mem;
    use std::net::{IpAddr, Ipv4Addr};
    use std::os::fd::AsRawFd;
    use std::ptr;

    use crate::codec::ICMP_HEADER_SIZE;
    use crate::probe::QueuedIcmpError;

    const SO_EE_ORIGIN_ICMP: u8 = 2;

    pub(super) fn enable(socket: &Socket) -> io::Result<()> {
        let on: libc::c_int = 1;
        // SAFETY: valid descriptor and a correctly sized option value.
        let rc = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::IPPROTO_IP,
                libc::IP_RECVERR,
                &on as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(test)]
    pub(super) fn is_enabled(socket: &Socket) -> io::Result<bool> {
        let mut value: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: valid descriptor, output buffer and length.
        let rc = unsafe {
            libc::getsockopt(
                socket.as_raw_fd(),
                libc::IPPROTO_IP,
                libc::IP_RECVERR,
                &mut value as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(value != 0)
    }

    /// Pop one entry off the error queue without blocking
    pub(super) fn read(socket: &Socket) -> io::Result<Option<QueuedIcmpError>> {
        let mut data = [0u8; 576];
        let mut control = [0u64; 64];
        let mut iov = libc::iovec {
            iov_base: data.as_mut_ptr() as *mut libc::c_void,
            iov_len: data.len(),
        };
        // SAFETY: msghdr is plain data; all-zero is a valid empty header.
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = mem::size_of_val(&control) as _;

        // SAFETY: every buffer referenced by `msg` outlives the call.
        let len = unsafe {
            libc::recvmsg(socket.as_raw_fd(), &mut msg, libc::MSG_ERRQUEUE | libc::MSG_DONTWAIT)
        };
        if len < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(err);
        }
        let quoted = &data[..len as usize];

        // SAFETY: the control buffer was filled by recvmsg and the CMSG
        // macros stay within `msg_controllen`.
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                if (*cmsg).cmsg_level == libc::IPPROTO_IP && (*cmsg).cmsg_type == libc::IP_RECVERR {
                    let ee_ptr = libc::CMSG_DATA(cmsg) as *const libc::sock_extended_err;
                    let ee = ptr::read_unaligned(ee_ptr);
                    let offender = ptr::read_unaligned(ee_ptr.add(1) as *const libc::sockaddr_in);
                    return Ok(from_extended_err(&ee, &offender, quoted));
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }
        Ok(None)
    }

    /// Build the report for an ICMP-originated queue entry
    pub(super) fn from_extended_err(
        ee: &libc::sock_extended_err,
        offender: &libc::sockaddr_in,
        quoted: &[u8],
    ) -> Option<QueuedIcmpError> {
        if ee.ee_origin != SO_EE_ORIGIN_ICMP {
            return None;
        }
        let offender = if offender.sin_family as libc::c_int == libc::AF_INET {
            Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(offender.sin_addr.s_addr))))
        } else {
            None
        };
        // The payload is the echo request the error was generated for.
        let quoted_sequence = (quoted.len() >= ICMP_HEADER_SIZE)
            .then(|| u16::from_be_bytes([quoted[6], quoted[7]]));

        Some(QueuedIcmpError {
            icmp_type: ee.ee_type,
            code: ee.ee_code,
            offender,
            quoted_sequence,
        })
    }

}
