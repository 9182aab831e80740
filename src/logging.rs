//! Logging for the container.
//!
//! Everything goes through `tracing`. [`init_logging`] installs a
//! `tracing-subscriber` stack once at startup; until then the monitor falls
//! back to stderr (see [`is_initialized`]). Each served request runs inside
//! a `request_span!` so its log lines share one request id.

use std::io;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Output format, selected by `[log] format`.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// Multi-line human-readable output on stderr.
    #[default]
    Pretty,
    /// One JSON object per line on stdout.
    Json,
    /// Single-line output on stderr.
    Compact,
}

/// What [`init_logging`] installs.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Used when `RUST_LOG` is unset.
    pub level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: Level::INFO,
        }
    }
}

impl LogConfig {
    #[must_use]
    pub const fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub const fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured
/// level. Only the first call has any effect.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_writer(io::stdout))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(io::stderr))
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

/// Returns true once a global subscriber has been installed.
///
/// Used to decide whether diagnostics must fall back to stderr.
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

/// Generate a unique request ID.
///
/// Format: `req_<32 hex chars>`
pub fn generate_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}

/// Span for correlating everything logged while one request is served.
///
/// # Example
///
/// ```rust,ignore
/// let span = request_span!(request_id, endpoint, script);
/// async { /* ... */ }.instrument(span).await;
/// ```
#[macro_export]
macro_rules! request_span {
    ($request_id:expr, $endpoint:expr, $script:expr) => {
        tracing::info_span!(
            "request",
            request_id = %$request_id,
            endpoint = %$endpoint,
            script = %$script,
        )
    };
}

/// Log a completed request with timing.
///
/// # Example
///
/// ```rust,ignore
/// log_request_complete("GET", "/hello", 200, Duration::from_millis(42));
/// ```
pub fn log_request_complete(method: &str, script: &str, status: u16, elapsed: Duration) {
    tracing::info!(
        method = %method,
        script = %script,
        status = status,
        duration_ms = elapsed.as_millis() as u64,
        "Request completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_id() {
        let id1 = generate_request_id();
        let id2 = generate_request_id();

        assert!(id1.starts_with("req_"));
        assert_eq!(id1.len(), 4 + 32);
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::default()
            .level(Level::DEBUG)
            .format(LogFormat::Json);

        assert_eq!(config.level, Level::DEBUG);
        assert!(matches!(config.format, LogFormat::Json));
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging(&LogConfig::default().format(LogFormat::Compact));
        init_logging(&LogConfig::default());
        assert!(is_initialized());
    }
}
