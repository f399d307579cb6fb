use anyhow::{Result, anyhow};
use colored::*;
use dialoguer::{Confirm, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Format error for display
pub fn format_error(err: &anyhow::Error) -> String {
    format!("{} {}", "✗".red().bold(), format!("{:#}", err).red())
}

/// Format success message
pub fn format_success(msg: &str) -> String {
    format!("{} {}", "✓".green().bold(), msg.green())
}

/// Format warning message
pub fn format_warning(msg: &str) -> String {
    format!("{} {}", "⚠".yellow().bold(), msg.yellow())
}

/// Format info message
pub fn format_info(msg: &str) -> String {
    format!("{} {}", "→".blue().bold(), msg)
}

/// Prompt for input
pub fn prompt_input(prompt: &str) -> Result<String> {
    let input = Input::<String>::new()
        .with_prompt(prompt)
        .interact_text()
        .map_err(|e| anyhow!("Failed to read input: {}", e))?;

    Ok(input.trim().to_string())
}

/// Prompt for input, pre-filled with a default
pub fn prompt_input_default(prompt: &str, default: &str) -> Result<String> {
    let input = Input::<String>::new()
        .with_prompt(prompt)
        .default(default.to_string())
        .interact_text()
        .map_err(|e| anyhow!("Failed to read input: {}", e))?;

    Ok(input.trim().to_string())
}

/// Prompt for confirmation
pub fn prompt_confirm(prompt: &str) -> Result<bool> {
    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| anyhow!("Failed to read confirmation: {}", e))?;

    Ok(confirmed)
}

/// Pick one of `items`; `None` if there is nothing to pick from
pub fn prompt_select<'a>(prompt: &str, items: &'a [String]) -> Result<Option<&'a str>> {
    if items.is_empty() {
        return Ok(None);
    }
    let index = Select::new()
        .with_prompt(prompt)
        .items(items)
        .default(0)
        .interact()
        .map_err(|e| anyhow!("Failed to read selection: {}", e))?;

    Ok(Some(items[index].as_str()))
}

/// Spinner for operations of unknown length
pub fn spinner(msg: impl Into<Cow<'static, str>>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Resolve a user-supplied archive path: as given if it exists, otherwise
/// relative to the backup directory
pub fn resolve_archive(input: &str, backup_dir: &Path) -> PathBuf {
    let given = PathBuf::from(input);
    if given.exists() || given.is_absolute() {
        return given;
    }
    let in_backups = backup_dir.join(&given);
    if in_backups.exists() { in_backups } else { given }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempdir::TempDir;

    #[test]
    fn test_resolve_archive_falls_back_to_backup_dir() {
        let dir = TempDir::new("utils").unwrap();
        let backups = dir.path().join("backups");
        std::fs::create_dir_all(&backups).unwrap();
        std::fs::write(backups.join("backup_1.zip.enc"), b"x").unwrap();

        assert_eq!(
            resolve_archive("backup_1.zip.enc", &backups),
            backups.join("backup_1.zip.enc")
        );
        assert_eq!(
            resolve_archive("missing.zip", &backups),
            PathBuf::from("missing.zip")
        );
    }

    #[test]
    fn test_format_helpers_keep_message() {
        assert!(format_success("done").contains("done"));
        assert!(format_warning("careful").contains("careful"));
        assert!(format_info("note").contains("note"));
        assert!(format_error(&anyhow!("boom")).contains("boom"));
    }
}
