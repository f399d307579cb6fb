use clap::Parser;
use hoard::cli::Cli;
use hoard::{commands, utils};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match commands::dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", utils::format_error(&err));
            ExitCode::FAILURE
        }
    }
}
