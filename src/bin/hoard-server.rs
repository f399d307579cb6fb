use clap::Parser;
use hoard::cli::ServerCli;
use hoard::{commands, utils};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = ServerCli::parse();

    match commands::serve::execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", utils::format_error(&err));
            ExitCode::FAILURE
        }
    }
}
