//! Native ICMP echo engine.
//!
//! Open a [`TransportHandle`] once, call [`send_echo`] per target, and close
//! the handle when done. Timeouts and unreachable hosts are ordinary
//! [`Outcome`] values; only transport failures are returned as [`PingError`].
//!
//! ```no_run
//! use echoprobe::{send_echo, Outcome, TransportHandle};
//!
//! let handle = TransportHandle::open()?;
//! let reply = send_echo(&handle, "127.0.0.1".parse().unwrap(), &[0u8; 32], 1000)?;
//! if reply.outcome == Outcome::Success {
//!     println!("rtt {:?}", reply.rtt);
//! }
//! handle.close()?;
//! # Ok::<(), echoprobe::PingError>(())
//! ```

pub mod codec;
pub mod error;
pub mod probe;
pub mod status;
pub mod summary;
pub mod transport;
pub mod types;

pub use error::{DecodeError, PingError, PingResult};
pub use probe::{send_echo, send_request};
pub use summary::PingSummary;
pub use transport::{close, open, EndpointKind, TransportHandle};
pub use types::{address_from_octets, EchoReply, EchoRequest, Outcome};
