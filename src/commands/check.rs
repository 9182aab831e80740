//! Validate a configuration file without starting anything.

use anyhow::Result;
use std::path::Path;

use fcgi_container::config::ContainerConfig;

pub fn execute(config_path: &Path) -> Result<()> {
    let config = ContainerConfig::load_from(config_path)?;
    let validation = config.validate()?;

    for warning in &validation.warnings {
        eprintln!("warning: {warning}");
    }

    let threads: usize = config.endpoints.iter().map(|ep| ep.threads).sum();
    println!(
        "{}: ok ({} endpoint(s), {} worker(s), {} handler chain(s), {} filter(s), {} pool(s))",
        config_path.display(),
        config.endpoints.len(),
        threads,
        config.handlers.len(),
        config.filters.len(),
        config.pools.len()
    );
    Ok(())
}
