use anyhow::{Context, Result};
use colored::*;
use std::path::PathBuf;

use crate::tls;
use crate::utils;

/// Generate a self-signed certificate and key for the backup server
pub async fn execute() -> Result<()> {
    let cert = PathBuf::from(utils::prompt_input_default("Certificate file", "server.crt")?);
    let key = PathBuf::from(utils::prompt_input_default("Private key file", "server.key")?);

    if (cert.exists() || key.exists())
        && !utils::prompt_confirm("Certificate or key already exists. Overwrite?")?
    {
        println!("{}", utils::format_warning("Kept existing files"));
        return Ok(());
    }

    tls::generate_self_signed(&cert, &key)
        .with_context(|| format!("Failed to write {} / {}", cert.display(), key.display()))?;

    println!(
        "{}",
        utils::format_success(&format!(
            "Certificate written to {} and key to {}",
            cert.display().to_string().cyan(),
            key.display().to_string().cyan()
        ))
    );
    println!(
        "{}",
        utils::format_info("Set tls_cert and tls_key in the server config to enable HTTPS")
    );
    println!(
        "{}",
        utils::format_warning("Clients do not verify this certificate; use it on private networks only")
    );
    Ok(())
}
