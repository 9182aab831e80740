//! Centralized constants for container limits and defaults.
//!
//! All magic numbers used by the container live here so that limits can be
//! audited and tuned in one place.

// =============================================================================
// Endpoint Defaults
// =============================================================================

/// Default number of worker tasks per endpoint.
pub const DEFAULT_ENDPOINT_THREADS: usize = 1;

/// Default listen backlog.
/// Matches Linux `SOMAXCONN`; the kernel clamps larger values anyway.
pub const DEFAULT_BACKLOG: u32 = 4096;

/// Default bind host for TCP endpoints.
pub const DEFAULT_ENDPOINT_HOST: &str = "0.0.0.0";

/// Default bind host for the monitor socket.
pub const DEFAULT_MONITOR_HOST: &str = "127.0.0.1";

// =============================================================================
// Lifecycle
// =============================================================================

/// Interval between quiescence checks while joining (10 ms).
pub const QUIESCENCE_POLL_INTERVAL_MS: u64 = 10;

/// Pause after a failed accept so a persistent error (e.g. `EMFILE`)
/// does not spin the worker.
pub const ACCEPT_ERROR_BACKOFF_MS: u64 = 50;

/// Monitor read buffer. Only the first byte is interpreted.
pub const MONITOR_BUFFER_SIZE: usize = 80;

/// How long the monitor waits for a client's command (5 seconds).
pub const MONITOR_READ_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// Request Limits
// =============================================================================

/// Maximum request body size accepted on STDIN (10 MB).
pub const MAX_BODY_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Maximum size of the PARAMS stream (1 MB).
/// Prevents memory exhaustion from a client that never terminates PARAMS.
pub const MAX_PARAMS_SIZE_BYTES: usize = 1024 * 1024;

// =============================================================================
// FastCGI Record Limits
// =============================================================================

/// Length of a record header.
pub const FCGI_HEADER_LEN: usize = 8;

/// Largest content length a single record can carry.
pub const FCGI_MAX_CONTENT_LEN: usize = 65535;

// =============================================================================
// Built-in Components
// =============================================================================

/// Name of the cookie carrying the built-in session id.
pub const SESSION_COOKIE: &str = "session_id";

/// Idle time after which built-in sessions expire (30 minutes).
pub const SESSION_IDLE_SECS: u64 = 30 * 60;

/// Maximum number of sessions the built-in manager keeps.
pub const SESSION_CAPACITY: u64 = 100_000;

/// Idle time after which cached requests expire (10 minutes).
pub const REQUEST_CACHE_IDLE_SECS: u64 = 10 * 60;

/// Maximum number of requests the built-in cache keeps.
pub const REQUEST_CACHE_CAPACITY: u64 = 10_000;

// =============================================================================
// Headers
// =============================================================================

/// Content-Type for plain text responses.
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// Content-Type for url-encoded form bodies.
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";
