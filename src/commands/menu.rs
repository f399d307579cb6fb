use anyhow::{Result, anyhow};
use colored::*;
use dialoguer::Select;

use super::{certs, decrypt, remote, restore, run};
use crate::cli::CliDisplay;
use crate::context::JobContext;
use crate::error::BackupError;
use crate::orchestrator::BackupOrchestrator;
use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    RunBackup,
    Decrypt,
    Extract,
    GenerateCert,
    ListRemote,
    DownloadRemote,
    DeleteRemote,
    Exit,
}

impl Action {
    const ALL: [Action; 8] = [
        Action::RunBackup,
        Action::Decrypt,
        Action::Extract,
        Action::GenerateCert,
        Action::ListRemote,
        Action::DownloadRemote,
        Action::DeleteRemote,
        Action::Exit,
    ];

    fn label(self) -> &'static str {
        match self {
            Action::RunBackup => "Run backup now",
            Action::Decrypt => "Decrypt an archive",
            Action::Extract => "Extract an archive",
            Action::GenerateCert => "Generate self-signed certificate",
            Action::ListRemote => "List remote backups",
            Action::DownloadRemote => "Download a remote backup",
            Action::DeleteRemote => "Delete a remote backup",
            Action::Exit => "Exit",
        }
    }

    fn needs_remote(self) -> bool {
        matches!(
            self,
            Action::ListRemote | Action::DownloadRemote | Action::DeleteRemote
        )
    }
}

/// Interactive menu. Errors from an action are printed and the menu continues,
/// except strict hook failures, which end the process.
pub async fn execute(ctx: JobContext) -> Result<()> {
    CliDisplay::print_banner();
    let orchestrator = BackupOrchestrator::new(ctx.clone());

    let actions: Vec<Action> = Action::ALL
        .into_iter()
        .filter(|a| !a.needs_remote() || ctx.store.is_some())
        .collect();
    let labels: Vec<&str> = actions.iter().map(|a| a.label()).collect();

    loop {
        let index = Select::new()
            .with_prompt("What would you like to do?")
            .items(&labels)
            .default(0)
            .interact()
            .map_err(|e| anyhow!("Failed to read selection: {}", e))?;

        let result = match actions[index] {
            Action::RunBackup => run::run_interactive(&orchestrator).await,
            Action::Decrypt => decrypt::execute(&ctx, None).await.map(|_| ()),
            Action::Extract => restore::execute(&ctx, None, None).await.map(|_| ()),
            Action::GenerateCert => certs::execute().await,
            Action::ListRemote => remote::list(&ctx).await.map(|_| ()),
            Action::DownloadRemote => remote::download(&ctx).await,
            Action::DeleteRemote => remote::delete(&ctx).await,
            Action::Exit => break,
        };

        if let Err(err) = result {
            if matches!(
                err.downcast_ref::<BackupError>(),
                Some(BackupError::HookFailure { .. })
            ) {
                return Err(err);
            }
            println!("{}", utils::format_error(&err));
        }
        println!();
    }

    println!("{}", "Goodbye!".dimmed());
    Ok(())
}
