//! Run a container from a configuration file.
//!
//! The container serves until SIGINT/SIGTERM arrives or a monitor client
//! sends `s`, then drains and exits.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::Level;

use fcgi_container::components::ComponentRegistry;
use fcgi_container::config::ContainerConfig;
use fcgi_container::logging;
use fcgi_container::server::{Error, Server};

pub async fn execute(config_path: &Path, verbose: bool) -> Result<()> {
    let config = ContainerConfig::load_from(config_path)?;
    let validation = config.validate()?;

    let mut log_config = config.log.to_log_config();
    if verbose {
        log_config = log_config.level(Level::DEBUG);
    }
    logging::init_logging(&log_config);

    for warning in &validation.warnings {
        tracing::warn!("{warning}");
    }

    let server = Server::new(config, ComponentRegistry::with_builtins());
    server
        .start()
        .await
        .with_context(|| format!("Failed to start container from {}", config_path.display()))?;

    tokio::select! {
        () = wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received");
            match server.stop() {
                // Already stopping, e.g. a monitor stop raced the signal.
                Ok(()) | Err(Error::InvalidState { .. }) => {},
                Err(e) => return Err(e.into()),
            }
        },
        () = server.stopped() => {},
    }

    server.join().await?;
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM/SIGINT on Unix, Ctrl+C elsewhere).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = sigint.recv() => {},
                }
            },
            _ => {
                tracing::warn!("Failed to install signal handlers, falling back to Ctrl+C");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            },
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
