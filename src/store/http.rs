use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{BackupStore, file_body, file_name_of, http_client, remote_error, save_response};
use crate::error::{BackupError, Result};
use crate::types::{ListResponse, MessageResponse, UploadResponse};

/// Client for the self-hosted backup server.
///
/// Certificates are NOT validated: the server is expected to run on private
/// infrastructure with a self-signed certificate. Do not point this at a
/// server reachable over an untrusted network.
pub struct HttpStore {
    client: Client,
    base_url: Url,
    username: String,
    password: String,
}

impl HttpStore {
    pub fn new(server_url: &str, username: &str, password: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(server_url)
            .map_err(|e| BackupError::config(format!("invalid server_url '{}': {}", server_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackupError::config(format!("invalid server_url '{}'", server_url)));
        }

        Ok(Self {
            client: http_client(timeout, true)?,
            base_url,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// `{server_url}/{segments...}` with each segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackupError::config(format!("invalid server_url '{}'", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl BackupStore for HttpStore {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn upload(&self, file: &Path, client_timestamp: Option<i64>) -> Result<String> {
        let file_name = file_name_of(file)?;
        let (body, len) = file_body(file).await?;
        let part = Part::stream_with_length(body, len)
            .file_name(file_name.clone())
            .mime_str("application/octet-stream")?;

        let mut form = Form::new().part("file", part);
        if let Some(ts) = client_timestamp {
            form = form.text("client_timestamp", ts.to_string());
        }

        debug!(file = %file.display(), bytes = len, "Uploading to backup server");
        let resp = self
            .client
            .post(self.endpoint(&["upload"])?)
            .basic_auth(&self.username, Some(&self.password))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }

        let body: UploadResponse = resp.json().await?;
        // The server reports its own path; the stored name is its last component
        let stored = body
            .path
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(body.path.as_str())
            .to_string();

        info!(file = %file_name, stored = %stored, "Uploaded backup to server");
        Ok(stored)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(self.endpoint(&["list"])?)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }

        let body: ListResponse = resp.json().await?;
        Ok(body.backups)
    }

    async fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let resp = self
            .client
            .get(self.endpoint(&["download", name])?)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => save_response(resp, dest_dir, name).await,
            StatusCode::NOT_FOUND => Err(BackupError::NotFound(name.to_string())),
            _ => Err(remote_error(resp).await),
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.endpoint(&["delete", name])?)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => {
                let body: MessageResponse = resp.json().await?;
                info!(name, message = %body.message, "Deleted backup from server");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(BackupError::NotFound(name.to_string())),
            _ => Err(remote_error(resp).await),
        }
    }
}
