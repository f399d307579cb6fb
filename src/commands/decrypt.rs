use anyhow::{Context, Result};
use colored::*;
use std::path::PathBuf;

use crate::context::JobContext;
use crate::crypto::CryptoBox;
use crate::utils;

/// Decrypt a `.enc` archive next to itself using the job's key file
pub async fn execute(ctx: &JobContext, archive: Option<PathBuf>) -> Result<PathBuf> {
    let archive = match archive {
        Some(path) => path,
        None => {
            let name = utils::prompt_input("Encrypted archive (path or name in backup_dir)")?;
            utils::resolve_archive(&name, &ctx.config.backup_dir)
        }
    };
    let key_file = ctx.config.key_file();

    let spinner = utils::spinner(format!("Decrypting {}...", archive.display()));
    let source = archive.clone();
    let result = tokio::task::spawn_blocking(move || -> crate::error::Result<PathBuf> {
        let key = CryptoBox::load_key(&key_file)?;
        CryptoBox::decrypt_file(&source, &key)
    })
    .await;
    spinner.finish_and_clear();

    let output = result?.with_context(|| format!("Failed to decrypt {}", archive.display()))?;
    println!(
        "{}",
        utils::format_success(&format!("Decrypted to {}", output.display().to_string().cyan()))
    );
    Ok(output)
}
