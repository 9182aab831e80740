//! FastCGI record layer.
//!
//! A responder-only, non-multiplexing implementation of the FastCGI wire
//! protocol:
//!
//! - [`protocol`] - record header, record types, name-value encoding
//! - [`FcgiConnection`] - one accepted connection, read request by request
//!
//! Management records (`GET_VALUES`) are answered transparently while the
//! connection waits for the next `BEGIN_REQUEST`.

pub mod connection;
pub mod protocol;

pub use connection::{FcgiConnection, RequestInput};
pub use protocol::BeginRequest;

use thiserror::Error;

/// Errors raised while reading or writing FastCGI records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record header carried a version other than 1.
    #[error("unsupported FastCGI version {0}")]
    UnsupportedVersion(u8),

    /// A record or name-value pair ended early.
    #[error("truncated {0}")]
    Truncated(&'static str),

    /// A stream grew beyond its limit.
    #[error("{what} exceeds limit of {limit} bytes")]
    TooLarge { what: &'static str, limit: usize },

    /// The peer closed the connection in the middle of a request.
    #[error("connection closed mid-request")]
    ConnectionClosed,

    /// The peer sent ABORT_REQUEST for the request being read.
    #[error("request {0} aborted by client")]
    Aborted(u16),
}

impl ProtocolError {
    /// True when the error came from the peer hanging up.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
