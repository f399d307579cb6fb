//! Backup server: stores uploaded archives and serves list/download/delete
//! under HTTP Basic authentication.

mod auth;
mod handlers;
pub mod naming;

pub use auth::AuthUser;
pub use handlers::ApiError;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{BackupError, Result};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let limit = state.config.max_upload_bytes;
    Router::new()
        .route("/upload", post(handlers::upload))
        .route("/list", get(handlers::list))
        .route("/download/{name}", get(handlers::download))
        .route("/delete/{name}", delete(handlers::delete))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// Serve until Ctrl-C. HTTPS when a certificate and key are configured.
pub async fn serve(config: ServerConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.server_backup_dir).await?;
    let state = AppState::new(config);
    let config = state.config.clone();
    let app = router(state);
    info!(
        tls = config.tls_enabled(),
        users = config.users.len(),
        max_upload_bytes = config.max_upload_bytes,
        "Starting backup server"
    );

    match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => {
            // Process-wide rustls provider; fails harmlessly if one is already installed
            let _ = rustls::crypto::ring::default_provider().install_default();
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| BackupError::Tls(format!("cannot load {} / {}: {}", cert.display(), key.display(), e)))?;
            let addr = resolve(&config.bind).await?;

            let handle = axum_server::Handle::new();
            tokio::spawn(shutdown_on_ctrl_c(handle.clone()));

            info!(addr = %addr, dir = %config.server_backup_dir.display(), "Backup server listening (https)");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        _ => {
            let listener = TcpListener::bind(&config.bind).await?;
            warn!("TLS is not configured, credentials are sent in clear text");
            info!(
                addr = %listener.local_addr()?,
                dir = %config.server_backup_dir.display(),
                "Backup server listening (http)"
            );
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Shutdown requested");
                })
                .await?;
        }
    }

    info!("Backup server stopped");
    Ok(())
}

async fn resolve(bind: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(bind)
        .await?
        .next()
        .ok_or_else(|| BackupError::config(format!("bind address '{}' did not resolve", bind)))
}

async fn shutdown_on_ctrl_c(handle: axum_server::Handle) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown requested");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::spawn;
    use crate::store::{BackupStore, HttpStore};
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;
    use reqwest::multipart::{Form, Part};
    use serde_json::json;
    use tempdir::TempDir;

    struct TestServer {
        url: String,
        dir: TempDir,
    }

    impl TestServer {
        async fn start() -> Self {
            let dir = TempDir::new("server").unwrap();
            let config = ServerConfig::from_json(
                &json!({
                    "server_backup_dir": dir.path().join("store"),
                    "users": {"alice": "secret", "bob": "hunter2"},
                })
                .to_string(),
            )
            .unwrap();
            let url = spawn(router(AppState::new(config))).await;
            Self { url, dir }
        }

        fn store(&self, user: &str, password: &str) -> HttpStore {
            HttpStore::new(&self.url, user, password, Duration::from_secs(10)).unwrap()
        }

        fn store_dir(&self) -> std::path::PathBuf {
            self.dir.path().join("store")
        }

        fn local_file(&self, name: &str, data: &[u8]) -> std::path::PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, data).unwrap();
            path
        }
    }

    #[tokio::test]
    async fn test_upload_list_download_delete() {
        let server = TestServer::start().await;
        let store = server.store("alice", "secret");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let file = server.local_file("backup_20231114221320.zip", &data);

        let name = store.upload(&file, Some(1_700_000_000)).await.unwrap();
        assert_eq!(name, "backup_2023-11-14_22-13-20_alice.zip");

        assert_eq!(store.list().await.unwrap(), vec![name.clone()]);

        let out = server.dir.path().join("downloads");
        let local = store.download(&name, &out).await.unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), data);

        store.delete(&name).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.download(&name, &out).await.unwrap_err().is_not_found());
        assert!(store.delete(&name).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_upload_without_timestamp_uses_server_time() {
        let server = TestServer::start().await;
        let store = server.store("bob", "hunter2");
        let file = server.local_file("a.zip", b"x");

        let name = store.upload(&file, None).await.unwrap();
        assert!(name.starts_with("backup_"));
        assert!(name.ends_with("_bob.zip"));
        assert!(server.store_dir().join(&name).exists());
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let server = TestServer::start().await;
        for password in ["", "s", "secre", "secreX", "secret!", "secret secret", "SECRET"] {
            let store = server.store("alice", password);
            assert!(
                matches!(store.list().await, Err(BackupError::Auth(_))),
                "password {:?} was accepted",
                password
            );
        }
        assert!(matches!(
            server.store("mallory", "secret").list().await,
            Err(BackupError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_credentials_get_challenge() {
        let server = TestServer::start().await;
        let resp = reqwest::get(format!("{}/list", server.url)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()["www-authenticate"], "Basic");
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["detail"], "Incorrect username or password");
    }

    #[tokio::test]
    async fn test_list_hides_foreign_and_partial_files() {
        let server = TestServer::start().await;
        let store = server.store("alice", "secret");
        let file = server.local_file("a.zip", b"x");
        let name = store.upload(&file, Some(0)).await.unwrap();

        std::fs::write(server.store_dir().join("notes.txt"), b"n").unwrap();
        std::fs::write(server.store_dir().join(".upload-abc"), b"p").unwrap();
        std::fs::create_dir(server.store_dir().join("backup_dir")).unwrap();

        assert_eq!(store.list().await.unwrap(), vec![name]);
        assert!(store.download("notes.txt", server.dir.path()).await.unwrap_err().is_not_found());
        assert!(store.delete("backup_dir").await.unwrap_err().is_not_found());
        assert!(server.store_dir().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_traversal_names_are_not_found() {
        let server = TestServer::start().await;
        std::fs::write(server.dir.path().join("backup_secret"), b"s").unwrap();
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("{}/download/..%2Fbackup_secret", server.url))
            .basic_auth("alice", Some("secret"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["detail"], "File not found");
    }

    #[tokio::test]
    async fn test_invalid_timestamp_is_bad_request() {
        let server = TestServer::start().await;
        let client = reqwest::Client::new();

        for ts in ["yesterday", "1.5", "99999999999999999999"] {
            let form = Form::new()
                .part("file", Part::bytes(b"x".to_vec()).file_name("a.zip"))
                .text("client_timestamp", ts);
            let resp = client
                .post(format!("{}/upload", server.url))
                .basic_auth("alice", Some("secret"))
                .multipart(form)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "timestamp {:?}", ts);
        }

        // Parses as i64 but is outside the representable date range
        let form = Form::new()
            .part("file", Part::bytes(b"x".to_vec()).file_name("a.zip"))
            .text("client_timestamp", i64::MAX.to_string());
        let resp = client
            .post(format!("{}/upload", server.url))
            .basic_auth("alice", Some("secret"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // Nothing stored, staged uploads cleaned up
        let leftovers: Vec<_> = std::fs::read_dir(server.store_dir()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_upload_without_file_is_bad_request() {
        let server = TestServer::start().await;
        let resp = reqwest::Client::new()
            .post(format!("{}/upload", server.url))
            .basic_auth("alice", Some("secret"))
            .multipart(Form::new().text("client_timestamp", "1"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
