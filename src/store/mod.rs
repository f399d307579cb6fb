//! Remote backup stores.
//!
//! Every backend implements the same four operations so the orchestrator and
//! the interactive menu never care where archives end up.

mod gdrive;
mod http;
mod yandex;

pub use gdrive::GoogleDriveStore;
pub use http::HttpStore;
pub use yandex::YandexDiskStore;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::RemoteConfig;
use crate::error::{BackupError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Upload a local archive; returns the name it is stored under
    async fn upload(&self, file: &Path, client_timestamp: Option<i64>) -> Result<String>;

    /// Names of stored backups, in backend order
    async fn list(&self) -> Result<Vec<String>>;

    /// Download `name` into `dest_dir`; returns the local path
    async fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf>;

    async fn delete(&self, name: &str) -> Result<()>;
}

/// Build the backend selected by the `remote` config section
pub fn build_store(remote: &RemoteConfig, timeout: Duration) -> Result<Arc<dyn BackupStore>> {
    let store: Arc<dyn BackupStore> = match remote {
        RemoteConfig::Http {
            server_url,
            username,
            password,
        } => Arc::new(HttpStore::new(server_url, username, password, timeout)?),
        RemoteConfig::YandexDisk { token, remote_dir } => {
            Arc::new(YandexDiskStore::new(token, remote_dir, timeout)?)
        }
        RemoteConfig::GoogleDrive {
            access_token,
            folder_id,
        } => Arc::new(GoogleDriveStore::new(access_token, folder_id.clone(), timeout)?),
    };
    debug!(backend = remote.backend_name(), store = store.name(), "Remote store configured");
    Ok(store)
}

pub(crate) fn http_client(timeout: Duration, accept_invalid_certs: bool) -> Result<Client> {
    let client = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()?;
    Ok(client)
}

/// Local file name of an archive
pub(crate) fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| BackupError::format(format!("{} has no file name", path.display())))
}

/// Reject remote names that would escape the destination directory
pub(crate) fn local_file_name(name: &str) -> Result<&str> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(BackupError::format(format!("unsafe backup name: {:?}", name)));
    }
    Ok(name)
}

/// Streaming request body for a local file, with its length
pub(crate) async fn file_body(path: &Path) -> Result<(reqwest::Body, u64)> {
    let file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    Ok((reqwest::Body::wrap_stream(ReaderStream::new(file)), len))
}

/// Turn a non-success response into the matching error
pub(crate) async fn remote_error(resp: Response) -> BackupError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();

    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| {
            ["detail", "error", "message", "description"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                text
            }
        });

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackupError::Auth(message),
        _ => BackupError::Remote {
            status: status.as_u16(),
            message,
        },
    }
}

/// Stream a download into `dest_dir/name`; only a complete body is persisted
pub(crate) async fn save_response(mut resp: Response, dest_dir: &Path, name: &str) -> Result<PathBuf> {
    let name = local_file_name(name)?;
    tokio::fs::create_dir_all(dest_dir).await?;
    let target = dest_dir.join(name);

    let partial = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(dest_dir)?;
    let mut out = tokio::fs::File::from_std(partial.reopen()?);

    let mut written: u64 = 0;
    while let Some(chunk) = resp.chunk().await? {
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    out.sync_all().await?;
    drop(out);

    partial.persist(&target)?;
    info!(path = %target.display(), bytes = written, "Downloaded backup");
    Ok(target)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_file_name_rejects_traversal() {
        assert!(local_file_name("backup_1.zip").is_ok());
        assert!(local_file_name("../etc/passwd").is_err());
        assert!(local_file_name("..").is_err());
        assert!(local_file_name("a\\b").is_err());
        assert!(local_file_name("").is_err());
    }

    #[test]
    fn test_build_store_picks_backend() {
        let timeout = Duration::from_secs(5);
        let http = RemoteConfig::Http {
            server_url: "https://localhost:8000".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
        };
        let yandex = RemoteConfig::YandexDisk {
            token: "t".to_string(),
            remote_dir: "app:/backups".to_string(),
        };
        let drive = RemoteConfig::GoogleDrive {
            access_token: "t".to_string(),
            folder_id: None,
        };

        assert_eq!(build_store(&http, timeout).unwrap().name(), "http");
        assert_eq!(build_store(&yandex, timeout).unwrap().name(), "yandex_disk");
        assert_eq!(build_store(&drive, timeout).unwrap().name(), "google_drive");
    }
}
