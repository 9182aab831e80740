//! Monitor client commands.

use anyhow::{Context, Result};

use fcgi_container::server::send_command;

/// Print the status document of a running container.
pub async fn info(address: &str) -> Result<()> {
    let reply = send_command(address, b'i')
        .await
        .with_context(|| format!("Failed to reach monitor at {address}"))?;
    print!("{reply}");
    Ok(())
}

/// Ask a running container to stop. Returns once the request is sent.
pub async fn stop(address: &str) -> Result<()> {
    send_command(address, b's')
        .await
        .with_context(|| format!("Failed to reach monitor at {address}"))?;
    println!("Stop requested at {address}");
    Ok(())
}
