use clap::Parser;
use colored::*;
use std::path::PathBuf;

use crate::types::{CycleOutcome, CycleReport};

#[derive(Parser, Debug)]
#[command(name = "hoard")]
#[command(about = "Scheduled, encrypted directory backups")]
#[command(version)]
pub struct Cli {
    /// Job configuration file (JSON, or TOML with a .toml extension)
    pub config_file: PathBuf,

    /// Open the interactive menu instead of running the scheduler
    #[arg(long)]
    pub gui: bool,

    /// Run one backup immediately and exit, ignoring the schedule
    #[arg(long, conflicts_with = "gui")]
    pub once: bool,
}

#[derive(Parser, Debug)]
#[command(name = "hoard-server")]
#[command(about = "Backup store: upload, list, download and delete archives over HTTP")]
#[command(version)]
pub struct ServerCli {
    /// Server configuration file
    #[arg(short, long, env = "HOARD_SERVER_CONFIG", default_value = "server-config.json")]
    pub config: PathBuf,

    /// Listen address, overrides `bind` from the config file
    #[arg(long, env = "HOARD_BIND")]
    pub bind: Option<String>,

    /// PEM certificate, overrides `tls_cert`
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key, overrides `tls_key`
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,
}

pub struct CliDisplay;

impl CliDisplay {
    pub fn print_banner() {
        println!(
            "{} {} {}",
            "📦".blue(),
            "HOARD".cyan().bold(),
            "Directory Backups".white()
        );
        println!("{}", "Archive • Encrypt • Upload".dimmed());
        println!();
    }

    pub fn print_cycle_report(report: &CycleReport) {
        let elapsed = report.finished_at - report.started_at;
        match &report.outcome {
            CycleOutcome::Completed => {
                println!(
                    "{} Backup completed in {}s",
                    "✓".green().bold(),
                    elapsed.num_seconds().to_string().cyan()
                );
            }
            CycleOutcome::Failed { stage, reason } => {
                println!(
                    "{} Backup failed during {}: {}",
                    "✗".red().bold(),
                    stage.to_string().yellow(),
                    reason.red()
                );
            }
        }
        if let Some(path) = &report.artifact {
            println!("  {} Local archive: {}", "→".blue(), path.display().to_string().cyan());
        }
        if let Some(name) = &report.remote_name {
            println!("  {} Stored remotely as: {}", "→".blue(), name.cyan());
        }
    }

    pub fn print_backups(backend: &str, backups: &[String]) {
        if backups.is_empty() {
            println!("{}", format!("No backups stored on {}", backend).yellow());
            return;
        }
        println!(
            "{} {} backups on {}:\n",
            "📦".green(),
            backups.len().to_string().bold(),
            backend.cyan()
        );
        for name in backups {
            println!("  {}", name.cyan());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definitions() {
        Cli::command().debug_assert();
        ServerCli::command().debug_assert();
    }

    #[test]
    fn test_client_args() {
        let cli = Cli::try_parse_from(["hoard", "config.json", "--gui"]).unwrap();
        assert_eq!(cli.config_file, PathBuf::from("config.json"));
        assert!(cli.gui);
        assert!(!cli.once);

        assert!(Cli::try_parse_from(["hoard"]).is_err());
        assert!(Cli::try_parse_from(["hoard", "c.json", "--gui", "--once"]).is_err());
        assert!(Cli::try_parse_from(["hoard", "c.json", "--bogus"]).is_err());
    }

    #[test]
    fn test_server_args() {
        let cli = ServerCli::try_parse_from(["hoard-server"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("server-config.json"));

        assert!(ServerCli::try_parse_from(["hoard-server", "--tls-cert", "c.pem"]).is_err());
        let cli = ServerCli::try_parse_from([
            "hoard-server",
            "--bind",
            "127.0.0.1:9000",
            "--tls-cert",
            "c.pem",
            "--tls-key",
            "k.pem",
        ])
        .unwrap();
        assert_eq!(cli.bind.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(cli.tls_key, Some(PathBuf::from("k.pem")));
    }
}
