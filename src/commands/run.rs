use anyhow::Result;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

use crate::cli::CliDisplay;
use crate::context::JobContext;
use crate::orchestrator::BackupOrchestrator;
use crate::schedule::Scheduler;
use crate::utils;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Non-interactive mode: the scheduler loop, or a single cycle when no
/// schedule is configured (or `once` is set)
pub async fn execute(ctx: JobContext, once: bool) -> Result<ExitCode> {
    let trigger = if once { None } else { ctx.config.trigger()? };
    let orchestrator = BackupOrchestrator::new(ctx);

    let Some(trigger) = trigger else {
        // Strict hook failures surface as Err and end the process with 1
        let report = orchestrator.run_cycle().await?;
        return Ok(if report.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    };

    let mut scheduler = Scheduler::new(trigger, POLL_INTERVAL);
    let orchestrator = &orchestrator;
    scheduler
        .run(move || async move { orchestrator.run_cycle().await.map(|_| ()) })
        .await?;

    info!("Scheduler stopped");
    Ok(ExitCode::SUCCESS)
}

/// Menu action: run one cycle with a spinner and print the outcome
pub async fn run_interactive(orchestrator: &BackupOrchestrator) -> Result<()> {
    let spinner = utils::spinner("Running backup...");
    let result = orchestrator.run_cycle().await;
    spinner.finish_and_clear();

    let report = result?;
    CliDisplay::print_cycle_report(&report);
    Ok(())
}
