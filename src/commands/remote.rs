use anyhow::{Context, Result};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::CliDisplay;
use crate::context::JobContext;
use crate::store::BackupStore;
use crate::utils;

async fn fetch_list(store: &Arc<dyn BackupStore>) -> Result<Vec<String>> {
    let spinner = utils::spinner(format!("Listing backups on {}...", store.name()));
    let result = store.list().await;
    spinner.finish_and_clear();
    result.with_context(|| format!("Failed to list backups on {}", store.name()))
}

pub async fn list(ctx: &JobContext) -> Result<Vec<String>> {
    let store = ctx.require_store()?;
    let backups = fetch_list(&store).await?;
    CliDisplay::print_backups(store.name(), &backups);
    Ok(backups)
}

pub async fn download(ctx: &JobContext) -> Result<()> {
    let store = ctx.require_store()?;
    let backups = fetch_list(&store).await?;
    let Some(name) = utils::prompt_select("Backup to download", &backups)? else {
        CliDisplay::print_backups(store.name(), &backups);
        return Ok(());
    };

    let default_dir = ctx.config.backup_dir.display().to_string();
    let dest = PathBuf::from(utils::prompt_input_default("Download into", &default_dir)?);

    let spinner = utils::spinner(format!("Downloading {}...", name));
    let result = store.download(name, &dest).await;
    spinner.finish_and_clear();

    let path = result.with_context(|| format!("Failed to download {}", name))?;
    println!(
        "{}",
        utils::format_success(&format!("Downloaded to {}", path.display().to_string().cyan()))
    );
    Ok(())
}

pub async fn delete(ctx: &JobContext) -> Result<()> {
    let store = ctx.require_store()?;
    let backups = fetch_list(&store).await?;
    let Some(name) = utils::prompt_select("Backup to delete", &backups)? else {
        CliDisplay::print_backups(store.name(), &backups);
        return Ok(());
    };

    if !utils::prompt_confirm(&format!("Delete {} from {}?", name, store.name()))? {
        println!("{}", utils::format_info("Nothing deleted"));
        return Ok(());
    }

    store
        .delete(name)
        .await
        .with_context(|| format!("Failed to delete {}", name))?;
    println!("{}", utils::format_success(&format!("Deleted {}", name.cyan())));
    Ok(())
}
