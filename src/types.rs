use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Archive produced by one backup cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveArtifact {
    pub path: PathBuf,
    pub created_at: DateTime<Local>,
    pub encrypted: bool,
}

impl ArchiveArtifact {
    pub fn new(path: PathBuf, created_at: DateTime<Local>) -> Self {
        Self {
            path,
            created_at,
            encrypted: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Unix seconds of creation, sent to the server as `client_timestamp`
    pub fn timestamp(&self) -> i64 {
        self.created_at.timestamp()
    }
}

/// Symmetric key wrapper (zeroized on drop)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    pub key: Vec<u8>,
}

impl EncryptionKey {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Pipeline stages of a backup cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PreHook,
    Archiving,
    Encrypting,
    Uploading,
    Cleanup,
    PostHook,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PreHook => "pre-hook",
            Stage::Archiving => "archiving",
            Stage::Encrypting => "encrypting",
            Stage::Uploading => "uploading",
            Stage::Cleanup => "cleanup",
            Stage::PostHook => "post-hook",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed,
    Failed { stage: Stage, reason: String },
}

/// Summary of one backup cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    /// Local artifact, if one still exists after the cycle
    pub artifact: Option<PathBuf>,
    /// Name or path reported by the remote store after upload
    pub remote_name: Option<String>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.outcome == CycleOutcome::Completed
    }
}

/// `POST /upload` response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub path: String,
}

/// `GET /list` response body
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ListResponse {
    pub backups: Vec<String>,
}

/// `DELETE /delete/{name}` response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Error body returned by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}
