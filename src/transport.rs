#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub(crate) use unix::Endpoint;
#[cfg(windows)]
pub(crate) use windows::Endpoint;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use crate::error::{PingError, PingResult};

static NEXT_HANDLE: AtomicU16 = AtomicU16::new(0);

/// Which OS facility backs a handle
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Unprivileged `SOCK_DGRAM` ICMP socket
    Datagram,
    /// `SOCK_RAW` ICMP socket, needs elevated privileges
    Raw,
    /// Windows ICMP helper API handle
    IcmpHelper,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Datagram => write!(f, "datagram"),
            EndpointKind::Raw => write!(f, "raw"),
            EndpointKind::IcmpHelper => write!(f, "icmp-helper"),
        }
    }
}

/// One open OS-level ICMP endpoint.
///
/// Probes on the same handle are serialized by an internal lock, so a handle
/// may be shared behind an `Arc`; callers that want probes to run in
/// parallel open one handle per worker. The endpoint is released by
/// [`close`](TransportHandle::close) or, failing that, on drop.
pub struct TransportHandle {
    endpoint: Mutex<Option<Endpoint>>,
    kind: EndpointKind,
    identifier: u16,
    sequence: AtomicU16,
}

impl TransportHandle {
    /// Open a new ICMP endpoint
    pub fn open() -> PingResult<Self> {
        let endpoint = Endpoint::open().map_err(|e| {
            warn!("cannot open ICMP endpoint: {}", e);
            PingError::Open(e)
        })?;
        let kind = endpoint.kind();
        let identifier = (std::process::id() as u16)
            .wrapping_add(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed).wrapping_mul(0x9e3));

        debug!(%kind, identifier, "opened ICMP endpoint");

        Ok(Self {
            endpoint: Mutex::new(Some(endpoint)),
            kind,
            identifier,
            sequence: AtomicU16::new(rand::random()),
        })
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Echo identifier stamped on requests sent through this handle
    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Release the endpoint.
    ///
    /// Closing an already closed handle does not touch the OS and returns
    /// [`PingError::HandleClosed`].
    pub fn close(&self) -> PingResult<()> {
        let endpoint = self.lock().take().ok_or(PingError::HandleClosed)?;
        endpoint.release().map_err(PingError::Close)?;
        debug!(identifier = self.identifier, "closed ICMP endpoint");
        Ok(())
    }

    pub(crate) fn next_sequence(&self) -> u16 {
        self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Run `f` with exclusive access to the open endpoint
    pub(crate) fn with_endpoint<T>(
        &self,
        f: impl FnOnce(&mut Endpoint) -> PingResult<T>,
    ) -> PingResult<T> {
        let mut guard = self.lock();
        let endpoint = guard.as_mut().ok_or(PingError::HandleClosed)?;
        f(endpoint)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Endpoint>> {
        self.endpoint.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("kind", &self.kind)
            .field("identifier", &self.identifier)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Open a new ICMP endpoint
pub fn open() -> PingResult<TransportHandle> {
    TransportHandle::open()
}

/// Release `handle`; see [`TransportHandle::close`]
pub fn close(handle: &TransportHandle) -> PingResult<()> {
    handle.close()
}
