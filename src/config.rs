use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BackupError, Result};
use crate::schedule::{self, Trigger};

/// What to do when a pre/post hook exits non-zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookFailurePolicy {
    /// Stop the whole process with a non-zero exit code
    #[default]
    Strict,
    /// Abort only the current cycle and wait for the next trigger
    Lenient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
    /// Keep the unencrypted zip next to the `.enc` file
    #[serde(default)]
    pub keep_plaintext: bool,
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            key_file: default_key_file(),
            keep_plaintext: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub cron: Option<String>,
}

/// Remote backend selector, tagged by `backend`
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum RemoteConfig {
    Http {
        server_url: String,
        username: String,
        password: String,
    },
    YandexDisk {
        token: String,
        #[serde(default = "default_yandex_dir")]
        remote_dir: String,
    },
    GoogleDrive {
        access_token: String,
        #[serde(default)]
        folder_id: Option<String>,
    },
}

impl RemoteConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            RemoteConfig::Http { .. } => "http",
            RemoteConfig::YandexDisk { .. } => "yandex_disk",
            RemoteConfig::GoogleDrive { .. } => "google_drive",
        }
    }
}

// Credentials stay out of logs
impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteConfig::Http {
                server_url,
                username,
                ..
            } => f
                .debug_struct("Http")
                .field("server_url", server_url)
                .field("username", username)
                .finish_non_exhaustive(),
            RemoteConfig::YandexDisk { remote_dir, .. } => f
                .debug_struct("YandexDisk")
                .field("remote_dir", remote_dir)
                .finish_non_exhaustive(),
            RemoteConfig::GoogleDrive { folder_id, .. } => f
                .debug_struct("GoogleDrive")
                .field("folder_id", folder_id)
                .finish_non_exhaustive(),
        }
    }
}

/// Client job configuration, loaded once per process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupJobConfig {
    pub source_dir: PathBuf,
    pub backup_dir: PathBuf,
    #[serde(default, rename = "pre_backup_script")]
    pub pre_hook: Option<String>,
    #[serde(default, rename = "post_backup_script")]
    pub post_hook: Option<String>,
    #[serde(default)]
    pub hook_failure_policy: HookFailurePolicy,
    #[serde(default)]
    pub hook_timeout_secs: Option<u64>,
    #[serde(default)]
    pub encryption: Option<EncryptionSettings>,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_client_log")]
    pub log_file: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl BackupJobConfig {
    /// Load and validate a job configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: BackupJobConfig = read_config(path).map_err(hint_remote_keys)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Parse from a JSON string (used by tests and the menu)
    pub fn from_json(data: &str) -> Result<Self> {
        let mut config: BackupJobConfig = serde_json::from_str(data)
            .map_err(|e| hint_remote_keys(BackupError::config(e.to_string())))?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Minimal config: archive `source_dir` into `backup_dir`, nothing else
    pub fn local(source_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            backup_dir: backup_dir.into(),
            pre_hook: None,
            post_hook: None,
            hook_failure_policy: HookFailurePolicy::default(),
            hook_timeout_secs: None,
            encryption: None,
            schedule: None,
            remote: None,
            request_timeout_secs: default_request_timeout(),
            log_file: default_client_log(),
            log_level: default_log_level(),
        }
    }

    // Empty strings behave like absent hooks
    fn normalize(&mut self) {
        for hook in [&mut self.pre_hook, &mut self.post_hook] {
            if hook.as_deref().is_some_and(|h| h.trim().is_empty()) {
                *hook = None;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.source_dir.as_os_str().is_empty() {
            return Err(BackupError::config("source_dir must not be empty"));
        }
        if self.backup_dir.as_os_str().is_empty() {
            return Err(BackupError::config("backup_dir must not be empty"));
        }
        if let Some(enc) = &self.encryption {
            if enc.enabled && enc.key_file.as_os_str().is_empty() {
                return Err(BackupError::config("encryption.key_file must not be empty"));
            }
        }
        if let Some(RemoteConfig::Http { server_url, .. }) = &self.remote {
            if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
                return Err(BackupError::config(format!(
                    "server_url must start with http:// or https://: {}",
                    server_url
                )));
            }
        }
        // Parses the schedule, rejecting both-set and malformed values
        self.trigger()?;
        Ok(())
    }

    /// Encryption settings, if encryption is switched on
    pub fn encryption_enabled(&self) -> Option<&EncryptionSettings> {
        self.encryption.as_ref().filter(|e| e.enabled)
    }

    /// Key file path used for encrypt and decrypt
    pub fn key_file(&self) -> PathBuf {
        self.encryption
            .as_ref()
            .map(|e| e.key_file.clone())
            .unwrap_or_else(default_key_file)
    }

    /// Trigger for the configured schedule; `None` means run once
    pub fn trigger(&self) -> Result<Option<Box<dyn Trigger>>> {
        match &self.schedule {
            Some(schedule) => schedule::trigger_from_config(schedule),
            None => Ok(None),
        }
    }

    pub fn hook_timeout(&self) -> Option<Duration> {
        self.hook_timeout_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Backup server configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_dir")]
    pub server_backup_dir: PathBuf,
    #[serde(default)]
    pub users: HashMap<String, String>,
    #[serde(default = "default_name_format")]
    pub backup_name_format: String,
    #[serde(default = "default_prefix")]
    pub backup_prefix: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
    #[serde(default)]
    pub tls_key: Option<PathBuf>,
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_server_log")]
    pub log_file: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: ServerConfig = read_config(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let config: ServerConfig =
            serde_json::from_str(data).map_err(|e| BackupError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.users.is_empty() {
            return Err(BackupError::config("users must contain at least one account"));
        }
        if self.backup_prefix.is_empty() {
            return Err(BackupError::config("backup_prefix must not be empty"));
        }
        if !self.backup_name_format.starts_with(&self.backup_prefix) {
            return Err(BackupError::config(format!(
                "backup_name_format '{}' must start with prefix '{}'",
                self.backup_name_format, self.backup_prefix
            )));
        }
        if self.backup_name_format.contains('/') || self.backup_name_format.contains('\\') {
            return Err(BackupError::config(
                "backup_name_format must not contain path separators",
            ));
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(BackupError::config(
                "tls_cert and tls_key must be configured together",
            ));
        }
        Ok(())
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut users: Vec<&String> = self.users.keys().collect();
        users.sort();
        f.debug_struct("ServerConfig")
            .field("server_backup_dir", &self.server_backup_dir)
            .field("users", &users)
            .field("backup_name_format", &self.backup_name_format)
            .field("backup_prefix", &self.backup_prefix)
            .field("bind", &self.bind)
            .field("tls_cert", &self.tls_cert)
            .field("tls_key", &self.tls_key)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

// Remote settings written at the top level belong in the tagged `remote` object
const REMOTE_KEYS: [&str; 5] = ["server_url", "username", "password", "token", "access_token"];

fn hint_remote_keys(err: BackupError) -> BackupError {
    match err {
        BackupError::Config(msg)
            if REMOTE_KEYS
                .iter()
                .any(|key| msg.contains(&format!("unknown field `{}`", key))) =>
        {
            BackupError::Config(format!(
                "{}; remote settings go under \"remote\" with a \"backend\" such as \"http\"",
                msg
            ))
        }
        other => other,
    }
}

/// Read a JSON (or `.toml`) config file
fn read_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).map_err(|e| {
        BackupError::config(format!("cannot read {}: {}", path.display(), e))
    })?;

    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

    if is_toml {
        toml::from_str(&data)
            .map_err(|e| BackupError::config(format!("{}: {}", path.display(), e)))
    } else {
        serde_json::from_str(&data)
            .map_err(|e| BackupError::config(format!("{}: {}", path.display(), e)))
    }
}

fn default_key_file() -> PathBuf {
    PathBuf::from("encryption_key.key")
}

fn default_yandex_dir() -> String {
    "app:/backups".to_string()
}

fn default_request_timeout() -> u64 {
    3600
}

fn default_client_log() -> PathBuf {
    PathBuf::from("backup.log")
}

fn default_server_log() -> PathBuf {
    PathBuf::from("server.log")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_server_dir() -> PathBuf {
    PathBuf::from("server_backups")
}

fn default_name_format() -> String {
    "backup_{timestamp}_{username}.zip".to_string()
}

fn default_prefix() -> String {
    "backup_".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_upload() -> usize {
    const TEN_GIB: u64 = 10 * 1024 * 1024 * 1024;
    usize::try_from(TEN_GIB).unwrap_or(usize::MAX)
}
