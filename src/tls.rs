use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{BackupError, Result};

/// Names the generated certificate is valid for
const SELF_SIGNED_NAMES: [&str; 2] = ["localhost", "127.0.0.1"];

/// Write a self-signed certificate and its private key as PEM files.
///
/// Existing files are overwritten. The key is written with mode 0600.
pub fn generate_self_signed(cert_path: &Path, key_path: &Path) -> Result<()> {
    let names: Vec<String> = SELF_SIGNED_NAMES.iter().map(|s| s.to_string()).collect();
    let certified = rcgen::generate_simple_self_signed(names)
        .map_err(|e| BackupError::Tls(format!("certificate generation failed: {}", e)))?;

    write_pem(cert_path, certified.cert.pem().as_bytes(), false)?;
    write_pem(key_path, certified.key_pair.serialize_pem().as_bytes(), true)?;

    info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "Generated self-signed certificate"
    );
    warn!("Self-signed certificates are only suitable for private networks");
    Ok(())
}

fn write_pem(path: &Path, data: &[u8], private: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        if private {
            options.mode(0o600);
            // mode() only applies to newly created files
            if path.exists() {
                fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_generates_pem_pair() {
        let dir = TempDir::new("tls").unwrap();
        let cert = dir.path().join("certs/cert.pem");
        let key = dir.path().join("certs/key.pem");

        generate_self_signed(&cert, &key).unwrap();

        let cert_pem = fs::read_to_string(&cert).unwrap();
        let key_pem = fs::read_to_string(&key).unwrap();
        assert!(cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(key_pem.contains("PRIVATE KEY-----"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&key).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_regenerating_replaces_files() {
        let dir = TempDir::new("tls").unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");

        generate_self_signed(&cert, &key).unwrap();
        let first = fs::read_to_string(&cert).unwrap();
        generate_self_signed(&cert, &key).unwrap();
        assert_ne!(first, fs::read_to_string(&cert).unwrap());
    }
}
