use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{BackupStore, file_body, file_name_of, http_client, remote_error, save_response};
use crate::error::{BackupError, Result};

const YANDEX_API: &str = "https://cloud-api.yandex.net/v1/disk";
const LIST_PAGE: usize = 1000;

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(rename = "_embedded")]
    embedded: Option<Embedded>,
}

#[derive(Debug, Deserialize)]
struct Embedded {
    #[serde(default)]
    items: Vec<Item>,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct Item {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Yandex Disk REST API backend (OAuth token)
pub struct YandexDiskStore {
    client: Client,
    api_base: String,
    token: String,
    remote_dir: String,
    page_size: usize,
}

impl YandexDiskStore {
    pub fn new(token: &str, remote_dir: &str, timeout: Duration) -> Result<Self> {
        Self::with_api_base(YANDEX_API, token, remote_dir, timeout)
    }

    pub fn with_api_base(api_base: &str, token: &str, remote_dir: &str, timeout: Duration) -> Result<Self> {
        if token.is_empty() {
            return Err(BackupError::config("yandex_disk token must not be empty"));
        }
        Ok(Self {
            client: http_client(timeout, false)?,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            remote_dir: remote_dir.trim_end_matches('/').to_string(),
            page_size: LIST_PAGE,
        })
    }

    fn authed(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.header(AUTHORIZATION, format!("OAuth {}", self.token))
    }

    fn remote_path(&self, name: &str) -> String {
        format!("{}/{}", self.remote_dir, name)
    }

    async fn ensure_dir(&self) -> Result<()> {
        let resp = self
            .authed(self.client.put(format!("{}/resources", self.api_base)))
            .query(&[("path", self.remote_dir.as_str())])
            .send()
            .await?;

        match resp.status() {
            // 409: already exists
            s if s.is_success() || s == StatusCode::CONFLICT => Ok(()),
            _ => Err(remote_error(resp).await),
        }
    }

    async fn link(&self, endpoint: &str, name: &str, overwrite: bool) -> Result<Link> {
        let path = self.remote_path(name);
        let mut query = vec![("path", path.as_str())];
        if overwrite {
            query.push(("overwrite", "true"));
        }

        let resp = self
            .authed(self.client.get(format!("{}/resources/{}", self.api_base, endpoint)))
            .query(&query)
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(resp.json().await?),
            StatusCode::NOT_FOUND => Err(BackupError::NotFound(name.to_string())),
            _ => Err(remote_error(resp).await),
        }
    }
}

#[async_trait]
impl BackupStore for YandexDiskStore {
    fn name(&self) -> &'static str {
        "yandex_disk"
    }

    async fn upload(&self, file: &Path, _client_timestamp: Option<i64>) -> Result<String> {
        let name = file_name_of(file)?;
        self.ensure_dir().await?;
        let link = self.link("upload", &name, true).await?;

        let (body, len) = file_body(file).await?;
        debug!(file = %file.display(), bytes = len, "Uploading to Yandex Disk");
        let resp = self
            .client
            .put(&link.href)
            .header(CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }
        info!(name = %name, dir = %self.remote_dir, "Uploaded backup to Yandex Disk");
        Ok(name)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let limit = self.page_size.to_string();
        let mut names = Vec::new();
        let mut offset: usize = 0;

        loop {
            let page_offset = offset.to_string();
            let resp = self
                .authed(self.client.get(format!("{}/resources", self.api_base)))
                .query(&[
                    ("path", self.remote_dir.as_str()),
                    ("limit", limit.as_str()),
                    ("offset", page_offset.as_str()),
                ])
                .send()
                .await?;

            let embedded = match resp.status() {
                s if s.is_success() => resp.json::<Resource>().await?.embedded,
                // Nothing uploaded yet
                StatusCode::NOT_FOUND => None,
                _ => return Err(remote_error(resp).await),
            };
            let Some(embedded) = embedded else {
                break;
            };

            let fetched = embedded.items.len();
            offset += fetched;
            names.extend(
                embedded
                    .items
                    .into_iter()
                    .filter(|item| item.kind == "file")
                    .map(|item| item.name),
            );

            let exhausted = embedded.total.is_some_and(|total| offset >= total);
            if fetched < self.page_size || exhausted {
                break;
            }
            debug!(offset, "Fetching next Yandex Disk listing page");
        }
        Ok(names)
    }

    async fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let link = self.link("download", name, false).await?;
        let resp = self.client.get(&link.href).send().await?;
        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }
        save_response(resp, dest_dir, name).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.remote_path(name);
        let resp = self
            .authed(self.client.delete(format!("{}/resources", self.api_base)))
            .query(&[("path", path.as_str()), ("permanently", "true")])
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => {
                info!(name, "Deleted backup from Yandex Disk");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(BackupError::NotFound(name.to_string())),
            _ => Err(remote_error(resp).await),
        }
    }
}
