use anyhow::{Context, Result};
use tracing::info;

use crate::cli::ServerCli;
use crate::config::ServerConfig;
use crate::logging;
use crate::server;

/// Server entry point: config file plus command-line overrides
pub async fn execute(cli: ServerCli) -> Result<()> {
    let config = load(&cli)?;
    let _guard = logging::init_logging(&config.log_file, &config.log_level)?;
    info!(config = ?config, "Loaded server configuration");

    server::serve(config).await?;
    Ok(())
}

fn load(cli: &ServerCli) -> Result<ServerConfig> {
    let mut config = ServerConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    if let Some(bind) = &cli.bind {
        config.bind = bind.clone();
    }
    if let (Some(cert), Some(key)) = (&cli.tls_cert, &cli.tls_key) {
        config.tls_cert = Some(cert.clone());
        config.tls_key = Some(key.clone());
    }
    config.validate()?;
    Ok(config)
}
