use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, LOCATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{BackupStore, file_body, file_name_of, http_client, remote_error, save_response};
use crate::error::{BackupError, Result};

const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3";
const PAGE_SIZE: &str = "1000";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

/// Google Drive v3 backend.
///
/// Authenticates with a caller-supplied OAuth access token; obtaining and
/// refreshing that token is left to the operator.
pub struct GoogleDriveStore {
    client: Client,
    api_base: String,
    upload_base: String,
    access_token: String,
    folder_id: Option<String>,
}

impl GoogleDriveStore {
    pub fn new(access_token: &str, folder_id: Option<String>, timeout: Duration) -> Result<Self> {
        Self::with_endpoints(DRIVE_API, DRIVE_UPLOAD_API, access_token, folder_id, timeout)
    }

    pub fn with_endpoints(
        api_base: &str,
        upload_base: &str,
        access_token: &str,
        folder_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        if access_token.is_empty() {
            return Err(BackupError::config("google_drive access_token must not be empty"));
        }
        Ok(Self {
            client: http_client(timeout, false)?,
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            folder_id: folder_id.filter(|f| !f.is_empty()),
        })
    }

    fn parent(&self) -> &str {
        self.folder_id.as_deref().unwrap_or("root")
    }

    /// One page of files in the target folder matching `extra`
    async fn query_page(&self, extra: Option<&str>, page_token: Option<&str>) -> Result<FileList> {
        let mut q = format!("'{}' in parents and trashed = false", escape_query(self.parent()));
        if let Some(extra) = extra {
            q.push_str(" and ");
            q.push_str(extra);
        }

        let mut query = vec![
            ("q", q.as_str()),
            ("fields", "nextPageToken,files(id,name)"),
            ("pageSize", PAGE_SIZE),
            ("orderBy", "name"),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let resp = self
            .client
            .get(format!("{}/files", self.api_base))
            .bearer_auth(&self.access_token)
            .query(&query)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn find_id(&self, name: &str) -> Result<String> {
        let filter = format!("name = '{}'", escape_query(name));
        let page = self.query_page(Some(&filter), None).await?;
        page.files
            .into_iter()
            .find(|f| f.name == name)
            .map(|f| f.id)
            .ok_or_else(|| BackupError::NotFound(name.to_string()))
    }
}

/// Escape a literal for a Drive `q` expression
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl BackupStore for GoogleDriveStore {
    fn name(&self) -> &'static str {
        "google_drive"
    }

    async fn upload(&self, file: &Path, _client_timestamp: Option<i64>) -> Result<String> {
        let name = file_name_of(file)?;
        let (body, len) = file_body(file).await?;

        let session = self
            .client
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(&self.access_token)
            .query(&[("uploadType", "resumable")])
            .header("X-Upload-Content-Type", "application/octet-stream")
            .header("X-Upload-Content-Length", len)
            .json(&json!({ "name": name, "parents": [self.parent()] }))
            .send()
            .await?;

        if !session.status().is_success() {
            return Err(remote_error(session).await);
        }
        let location = session
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| BackupError::Remote {
                status: session.status().as_u16(),
                message: "upload session has no Location header".to_string(),
            })?;

        debug!(file = %file.display(), bytes = len, "Uploading to Google Drive");
        let resp = self
            .client
            .put(location)
            .bearer_auth(&self.access_token)
            .header(CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }
        info!(name = %name, folder = self.parent(), "Uploaded backup to Google Drive");
        Ok(name)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.query_page(None, page_token.as_deref()).await?;
            names.extend(page.files.into_iter().map(|f| f.name));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(names)
    }

    async fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let id = self.find_id(name).await?;
        let resp = self
            .client
            .get(format!("{}/files/{}", self.api_base, id))
            .bearer_auth(&self.access_token)
            .query(&[("alt", "media")])
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => save_response(resp, dest_dir, name).await,
            StatusCode::NOT_FOUND => Err(BackupError::NotFound(name.to_string())),
            _ => Err(remote_error(resp).await),
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let id = self.find_id(name).await?;
        let resp = self
            .client
            .delete(format!("{}/files/{}", self.api_base, id))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => {
                info!(name, "Deleted backup from Google Drive");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(BackupError::NotFound(name.to_string())),
            _ => Err(remote_error(resp).await),
        }
    }
}
