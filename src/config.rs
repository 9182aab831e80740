//! Configuration types for the container.
//!
//! This module loads and validates the container's TOML configuration:
//!
//! - [`ContainerConfig`] - Root configuration struct
//! - [`DaemonSettings`] - Monitor, collaborators and request timing
//! - [`EndpointConfig`] - Listening endpoints and their worker counts
//! - [`HandlerConfig`] / [`FilterConfig`] - Handler chains and global filters
//! - [`PoolConfig`] - Named background task pools
//!
//! All configuration types support serde deserialization and provide
//! defaults suitable for development use.
//!
//! # Example
//!
//! ```
//! use fcgi_container::config::ContainerConfig;
//!
//! let config = ContainerConfig::from_toml(r#"
//! [[endpoint]]
//! port = 9000
//! threads = 4
//!
//! [[handler]]
//! path = "/hello"
//! handlers = ["echo"]
//! "#).unwrap();
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.endpoints[0].threads, 4);
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants;
use crate::logging::{LogConfig, LogFormat};

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub const fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Daemon-wide settings.
    pub daemon: DaemonSettings,
    /// Logging settings.
    pub log: LogSettings,
    /// Listening endpoints.
    #[serde(rename = "endpoint")]
    pub endpoints: Vec<EndpointConfig>,
    /// Global filters, in execution order.
    #[serde(rename = "filter")]
    pub filters: Vec<FilterConfig>,
    /// Handler chains keyed by path pattern.
    #[serde(rename = "handler")]
    pub handlers: Vec<HandlerConfig>,
    /// Named background task pools.
    #[serde(rename = "pool")]
    pub pools: Vec<PoolConfig>,
}

/// Daemon-wide settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Monitor port. `None` disables the monitor.
    pub monitor_port: Option<u16>,
    /// Host the monitor binds to.
    pub monitor_host: String,
    /// Log every completed request with its duration.
    pub log_times: bool,
    /// Component name of the request cache.
    pub request_cache: Option<String>,
    /// Component name of the response time statistics collector.
    pub statistics: Option<String>,
    /// Session manager settings.
    pub session: Option<SessionSettings>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            monitor_port: None,
            monitor_host: constants::DEFAULT_MONITOR_HOST.to_string(),
            log_times: false,
            request_cache: None,
            statistics: None,
            session: None,
        }
    }
}

impl DaemonSettings {
    /// Name of the session manager component, if sessions are attached.
    #[must_use]
    pub fn session_component(&self) -> Option<&str> {
        self.session
            .as_ref()
            .filter(|s| s.attach)
            .map(|s| s.component.as_str())
    }
}

/// Session manager settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Component implementing the session manager.
    pub component: String,
    /// Attach sessions to requests. The manager is ignored when false.
    #[serde(default)]
    pub attach: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Minimum level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Output format (`pretty`, `compact`, `json`).
    pub format: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LogSettings {
    /// Convert to a [`LogConfig`], falling back to defaults on unknown values.
    #[must_use]
    pub fn to_log_config(&self) -> LogConfig {
        let format = match self.format.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        };
        let level = self
            .level
            .parse::<tracing::Level>()
            .unwrap_or(tracing::Level::INFO);
        LogConfig::default().level(level).format(format)
    }
}

/// A listening endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Unix socket path. Mutually exclusive with `port`.
    #[serde(default)]
    pub socket: Option<PathBuf>,
    /// TCP port. Mutually exclusive with `socket`.
    #[serde(default)]
    pub port: Option<u16>,
    /// TCP bind host.
    #[serde(default = "default_endpoint_host")]
    pub host: String,
    /// Number of worker tasks serving this endpoint.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Keep FastCGI connections open between requests when the client asks.
    #[serde(default = "default_true", alias = "keep_connection")]
    pub keepalive: bool,
    /// Listen backlog.
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

impl EndpointConfig {
    /// A TCP endpoint on `port` with default settings.
    #[must_use]
    pub fn tcp(port: u16) -> Self {
        Self {
            socket: None,
            port: Some(port),
            host: default_endpoint_host(),
            threads: constants::DEFAULT_ENDPOINT_THREADS,
            keepalive: true,
            backlog: constants::DEFAULT_BACKLOG,
        }
    }

    /// A Unix socket endpoint at `path` with default settings.
    #[must_use]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self {
            socket: Some(path.into()),
            port: None,
            ..Self::tcp(0)
        }
    }

    /// Set the worker count.
    #[must_use]
    pub const fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set the keepalive flag.
    #[must_use]
    pub const fn keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Set the bind host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

/// A global filter entry.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Component implementing the filter.
    pub component: String,
    /// Path pattern the filter applies to.
    #[serde(default = "default_filter_path")]
    pub path: String,
}

/// A handler chain entry.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerConfig {
    /// Path pattern: exact, or a prefix when it ends in `*`.
    pub path: String,
    /// Handler components, in execution order.
    pub handlers: Vec<String>,
}

/// A named background task pool.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Pool name, reported by the monitor.
    pub name: String,
    /// Number of pool workers.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Maximum number of queued jobs.
    #[serde(default = "default_queue_length")]
    pub queue_length: usize,
}

fn default_endpoint_host() -> String {
    constants::DEFAULT_ENDPOINT_HOST.to_string()
}

const fn default_threads() -> usize {
    constants::DEFAULT_ENDPOINT_THREADS
}

const fn default_true() -> bool {
    true
}

const fn default_backlog() -> u32 {
    constants::DEFAULT_BACKLOG
}

const fn default_queue_length() -> usize {
    1000
}

fn default_filter_path() -> String {
    "*".to_string()
}

impl ContainerConfig {
    /// Load configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML for
    /// this schema.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            endpoints = config.endpoints.len(),
            handlers = config.handlers.len(),
            filters = config.filters.len(),
            "Loaded container configuration"
        );

        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid TOML for this schema.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate configuration with comprehensive checks.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error listing every problem found:
    /// - No endpoints configured
    /// - Endpoint with both or neither of `port` and `socket`
    /// - Endpoint or pool with zero workers, pool with zero queue length
    /// - Handler entry with an empty path or no handlers
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Endpoints
        if self.endpoints.is_empty() {
            errors.push("at least one endpoint has to be configured".to_string());
        }
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            match (&endpoint.socket, endpoint.port) {
                (Some(_), Some(_)) => errors.push(format!(
                    "endpoint #{i}: 'socket' and 'port' are mutually exclusive"
                )),
                (None, None) => errors.push(format!(
                    "endpoint #{i}: one of 'socket' or 'port' is required"
                )),
                (None, Some(port)) if port > 0 && port < 1024 => warnings.push(format!(
                    "endpoint #{i}: port {port} is a privileged port (< 1024)"
                )),
                _ => {},
            }
            if endpoint.threads == 0 {
                errors.push(format!("endpoint #{i}: threads must be greater than 0"));
            }
        }

        // 2. Handlers and filters
        for handler in &self.handlers {
            if handler.path.is_empty() {
                errors.push("handler path cannot be empty".to_string());
            }
            if handler.handlers.is_empty() {
                errors.push(format!(
                    "handler '{}' must list at least one handler component",
                    handler.path
                ));
            }
        }
        for filter in &self.filters {
            if filter.component.is_empty() {
                errors.push("filter component cannot be empty".to_string());
            }
        }

        // 3. Pools
        for pool in &self.pools {
            if pool.threads == 0 {
                errors.push(format!("pool '{}': threads must be greater than 0", pool.name));
            }
            if pool.queue_length == 0 {
                errors.push(format!(
                    "pool '{}': queue_length must be greater than 0",
                    pool.name
                ));
            }
        }

        // 4. Daemon
        if let Some(session) = self.daemon.session.as_ref().filter(|s| !s.attach) {
            warnings.push(format!(
                "session component '{}' is configured but attach is false; sessions are disabled",
                session.component
            ));
        }

        if errors.is_empty() {
            Ok(ValidationResult { warnings })
        } else {
            anyhow::bail!("invalid configuration:\n  - {}", errors.join("\n  - "))
        }
    }
}
