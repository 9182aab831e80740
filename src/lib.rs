// =============================================================================
// Lint Configuration
// =============================================================================

#![deny(unsafe_code)]
// Correctness: Must handle all fallible operations
#![deny(unused_must_use)]
// Quality: Pedantic but pragmatic
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![warn(unreachable_pub)]
#![allow(missing_debug_implementations)] // Trait objects and moka caches lack Debug

// Allowed with documented reasons
#![allow(clippy::missing_errors_doc)] // Error returns self-documenting via type
#![allow(clippy::module_name_repetitions)] // e.g., server::ServerError would stutter less but read worse
#![allow(clippy::doc_markdown)] // Too many false positives in code docs
#![allow(clippy::must_use_candidate)] // Not all returned values need annotation
#![allow(clippy::cast_possible_truncation)] // Intentional in record length calculations

//! FastCGI application container.
//!
//! Serves FastCGI requests on one or more endpoints, resolves each request
//! to a chain of handlers (with global filters in front), and exposes a
//! small monitor socket for status and remote stop.
//!
//! # Modules
//!
//! - [`server`] - endpoints, workers, dispatch, lifecycle and the monitor
//! - [`handler`] - the [`handler::Handler`] and [`handler::Filter`] traits and path resolution
//! - [`components`] - named components, collaborators and task pools
//! - [`fcgi`] - the FastCGI record layer
//! - [`request`] - request and response model
//! - [`config`] - TOML configuration
//!
//! # Example
//!
//! ```no_run
//! use fcgi_container::components::ComponentRegistry;
//! use fcgi_container::config::ContainerConfig;
//! use fcgi_container::server::Server;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ContainerConfig::from_toml(
//!     r#"
//! [[endpoint]]
//! port = 9000
//! threads = 4
//!
//! [[handler]]
//! path = "/ping"
//! handlers = ["ping"]
//! "#,
//! )?;
//!
//! let server = Server::new(config, ComponentRegistry::with_builtins());
//! server.start().await?;
//! server.stopped().await;
//! server.join().await?;
//! # Ok(())
//! # }
//! ```

pub mod components;
pub mod config;
pub mod constants;
pub mod fcgi;
pub mod handler;
pub mod logging;
pub mod request;
pub mod server;

pub use server::{Error, Result, Server, Status};
