use anyhow::{Context, Result, anyhow};
use colored::*;
use std::path::PathBuf;

use crate::archive::ArchiveBuilder;
use crate::context::JobContext;
use crate::crypto::ENCRYPTED_SUFFIX;
use crate::utils;

/// Unpack a zip archive into a directory
pub async fn execute(ctx: &JobContext, archive: Option<PathBuf>, dest: Option<PathBuf>) -> Result<usize> {
    let archive = match archive {
        Some(path) => path,
        None => {
            let name = utils::prompt_input("Archive to extract (path or name in backup_dir)")?;
            utils::resolve_archive(&name, &ctx.config.backup_dir)
        }
    };
    if archive.to_string_lossy().ends_with(ENCRYPTED_SUFFIX) {
        return Err(anyhow!(
            "{} is encrypted, decrypt it first",
            archive.display()
        ));
    }
    let dest = match dest {
        Some(dest) => dest,
        None => PathBuf::from(utils::prompt_input_default("Extract into", "restored")?),
    };

    let spinner = utils::spinner(format!("Extracting {}...", archive.display()));
    let (source, target) = (archive.clone(), dest.clone());
    let result = tokio::task::spawn_blocking(move || ArchiveBuilder::extract(&source, &target)).await;
    spinner.finish_and_clear();

    let files = result?.with_context(|| format!("Failed to extract {}", archive.display()))?;
    println!(
        "{}",
        utils::format_success(&format!(
            "Extracted {} files into {}",
            files,
            dest.display().to_string().cyan()
        ))
    );
    Ok(files)
}
