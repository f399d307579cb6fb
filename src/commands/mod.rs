pub mod certs;
pub mod decrypt;
pub mod menu;
pub mod remote;
pub mod restore;
pub mod run;
pub mod serve;

use anyhow::{Context, Result};
use std::process::ExitCode;

use crate::cli::Cli;
use crate::config::BackupJobConfig;
use crate::context::JobContext;
use crate::logging;

/// Client entry point: load the job, start logging, then menu or backup run
pub async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config = BackupJobConfig::load(&cli.config_file)
        .with_context(|| format!("Failed to load {}", cli.config_file.display()))?;
    let _guard = logging::init_logging(&config.log_file, &config.log_level)?;

    let ctx = JobContext::from_config(config)?;
    if cli.gui {
        menu::execute(ctx).await?;
        return Ok(ExitCode::SUCCESS);
    }
    run::execute(ctx, cli.once).await
}
