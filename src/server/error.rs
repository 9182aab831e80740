//! Server error types.
//!
//! Startup and lifecycle failures are returned to the caller; per-request
//! failures are mapped to a response status with [`Error::status_code`] and
//! never leave the worker loop.

use super::Status;
use crate::fcgi::ProtocolError;
use crate::handler::HandlerError;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Server errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Lifecycle call made in a status that does not allow it.
    #[error("cannot {operation} server: status is {status}")]
    InvalidState {
        operation: &'static str,
        status: Status,
    },

    /// No endpoint configured.
    #[error("at least one endpoint has to be configured")]
    NoEndpoints,

    /// Listening socket could not be opened.
    #[error("failed to open endpoint {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Configured component name is not registered.
    #[error("component '{name}' is not registered")]
    MissingComponent { name: String },

    /// Configured component has the wrong capability.
    #[error("component '{name}' does not implement {expected} interface (it is a {found})")]
    Capability {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The transport could not be bound to a request.
    #[error("failed to attach request: {0}")]
    Attach(String),

    /// No handler chain resolves for the request.
    #[error("no handler for '{script}'")]
    NotFound { script: String },

    /// A filter or handler failed.
    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),

    /// FastCGI protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO error with context.
    #[error("IO error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Create an invalid state error.
    pub const fn invalid_state(operation: &'static str, status: Status) -> Self {
        Self::InvalidState { operation, status }
    }

    /// Create a bind error.
    pub fn bind(address: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            address: address.into(),
            source,
        }
    }

    /// Create a missing component error.
    pub fn missing_component(name: impl Into<String>) -> Self {
        Self::MissingComponent { name: name.into() }
    }

    /// Create a capability mismatch error.
    pub fn capability(name: impl Into<String>, expected: &'static str, found: &'static str) -> Self {
        Self::Capability {
            name: name.into(),
            expected,
            found,
        }
    }

    /// Create a not found error.
    pub fn not_found(script: impl Into<String>) -> Self {
        Self::NotFound {
            script: script.into(),
        }
    }

    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Response status for a failure that reached the worker loop.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Attach(_) => 400,
            Self::Handler(e) => e.status_code(),
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_invalid_state_display() {
        let err = Error::invalid_state("stop", Status::Loading);
        assert_eq!(err.to_string(), "cannot stop server: status is loading");
    }

    #[test]
    fn test_capability_display() {
        let err = Error::capability("timing", "RequestCache", "statistics collector");
        assert_eq!(
            err.to_string(),
            "component 'timing' does not implement RequestCache interface (it is a statistics collector)"
        );
    }

    #[test]
    fn test_bind_has_source() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let err = Error::bind("0.0.0.0:9000", io);
        assert!(err.to_string().contains("0.0.0.0:9000"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::not_found("/x").status_code(), 404);
        assert_eq!(Error::Attach("bad".into()).status_code(), 400);
        assert_eq!(
            Error::Handler(HandlerError::Failed("boom".into())).status_code(),
            500
        );
        assert_eq!(
            Error::Handler(HandlerError::BadRequest("no id".into())).status_code(),
            400
        );
        assert_eq!(Error::NoEndpoints.status_code(), 500);
        assert_eq!(
            Error::Protocol(ProtocolError::ConnectionClosed).status_code(),
            500
        );
    }

    #[test]
    fn test_missing_component_display() {
        let err = Error::missing_component("auth");
        assert_eq!(err.to_string(), "component 'auth' is not registered");
    }
}
