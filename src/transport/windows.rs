use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr};
use std::ptr;
use std::time::Duration;
use tracing::trace;
use winapi::shared::minwindef::{BOOL, DWORD, LPVOID, UCHAR, ULONG, USHORT, WORD};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::handleapi::INVALID_HANDLE_VALUE;
use winapi::um::winnt::HANDLE;

use super::EndpointKind;
use crate::error::{PingError, PingResult};
use crate::status::{self, IP_REQ_TIMED_OUT, IP_SUCCESS};
use crate::types::{EchoReply, Outcome};

/// `IP_OPTION_INFORMATION` from `ipexport.h`
#[repr(C)]
#[allow(non_camel_case_types, non_snake_case, dead_code)]
struct IP_OPTION_INFORMATION {
    Ttl: UCHAR,
    Tos: UCHAR,
    Flags: UCHAR,
    OptionsSize: UCHAR,
    OptionsData: *mut UCHAR,
}

/// `ICMP_ECHO_REPLY` from `ipexport.h`
#[repr(C)]
#[allow(non_camel_case_types, non_snake_case, dead_code)]
struct ICMP_ECHO_REPLY {
    Address: ULONG,
    Status: ULONG,
    RoundTripTime: ULONG,
    DataSize: USHORT,
    Reserved: USHORT,
    Data: LPVOID,
    Options: IP_OPTION_INFORMATION,
}

// winapi 0.3 ships no bindings for the ICMP helper functions.
#[link(name = "iphlpapi")]
extern "system" {
    fn IcmpCreateFile() -> HANDLE;
    fn IcmpCloseHandle(handle: HANDLE) -> BOOL;
    fn IcmpSendEcho(
        handle: HANDLE,
        destination: ULONG,
        request_data: LPVOID,
        request_size: WORD,
        request_options: *mut IP_OPTION_INFORMATION,
        reply_buffer: LPVOID,
        reply_size: DWORD,
        timeout: DWORD,
    ) -> DWORD;
}

/// Room for one ICMP error message on top of the echoed payload
const REPLY_SLACK: usize = 8 + 576;

/// ICMP helper API handle owned by a transport handle
pub(crate) struct Endpoint {
    handle: HANDLE,
    buffer: Vec<u8>,
}

// SAFETY: the ICMP handle is not tied to the creating thread, and the
// owning `TransportHandle` only hands it out under its lock.
unsafe impl Send for Endpoint {}

impl Endpoint {
    pub(crate) fn open() -> io::Result<Self> {
        // SAFETY: plain FFI call without arguments.
        let handle = unsafe { IcmpCreateFile() };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            handle,
            buffer: Vec::new(),
        })
    }

    pub(crate) fn kind(&self) -> EndpointKind {
        EndpointKind::IcmpHelper
    }

    pub(crate) fn release(mut self) -> io::Result<()> {
        let handle = mem::replace(&mut self.handle, INVALID_HANDLE_VALUE);
        // SAFETY: `handle` came from IcmpCreateFile and Drop will not see it again.
        if unsafe { IcmpCloseHandle(handle) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// One blocking `IcmpSendEcho` exchange.
    ///
    /// The OS does its own correlation and timing, so the reported
    /// round-trip time is used as is.
    pub(crate) fn send_echo(
        &mut self,
        target: Ipv4Addr,
        payload: &[u8],
        timeout: Duration,
    ) -> PingResult<EchoReply> {
        let reply_size = mem::size_of::<ICMP_ECHO_REPLY>() + payload.len() + REPLY_SLACK;
        self.buffer.resize(reply_size, 0);

        let destination = u32::from_ne_bytes(target.octets());
        // SAFETY: the payload and reply buffers outlive the call and their
        // lengths are passed alongside them.
        let replies = unsafe {
            IcmpSendEcho(
                self.handle,
                destination,
                payload.as_ptr() as LPVOID,
                payload.len() as WORD,
                ptr::null_mut(),
                self.buffer.as_mut_ptr() as LPVOID,
                self.buffer.len() as DWORD,
                timeout.as_millis().min(DWORD::MAX as u128) as DWORD,
            )
        };

        if replies == 0 {
            // SAFETY: reads the calling thread's last-error value.
            let code = unsafe { GetLastError() };
            trace!(code, "IcmpSendEcho returned no replies");
            if code == IP_REQ_TIMED_OUT {
                return Ok(EchoReply::timeout());
            }
            if status::translate(code) == Outcome::Unreachable {
                return Ok(EchoReply::from_status(code, None));
            }
            return Err(PingError::Io(io::Error::from_raw_os_error(code as i32)));
        }

        // SAFETY: a non-zero return guarantees an ICMP_ECHO_REPLY at the
        // start of the buffer; the buffer may not be aligned for it.
        let reply = unsafe { ptr::read_unaligned(self.buffer.as_ptr() as *const ICMP_ECHO_REPLY) };
        let source = IpAddr::V4(Ipv4Addr::from(reply.Address.to_ne_bytes()));

        if reply.Status == IP_SUCCESS {
            let rtt = Duration::from_millis(reply.RoundTripTime as u64);
            return Ok(EchoReply::success(source, rtt, Some(reply.Options.Ttl)));
        }
        Ok(EchoReply::from_status(reply.Status, Some(source)))
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if self.handle != INVALID_HANDLE_VALUE {
            // SAFETY: the handle is still owned here and is closed once.
            unsafe { IcmpCloseHandle(self.handle) };
        }
    }
}
