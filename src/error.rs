use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("{stage} hook failed: {command}")]
    HookFailure { stage: String, command: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl BackupError {
    /// Shorthand for a config error with a formatted message
    pub fn config(msg: impl Into<String>) -> Self {
        BackupError::Config(msg.into())
    }

    /// Shorthand for a format error with a formatted message
    pub fn format(msg: impl Into<String>) -> Self {
        BackupError::Format(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackupError::NotFound(_))
    }
}

impl From<tempfile::PersistError> for BackupError {
    fn from(err: tempfile::PersistError) -> Self {
        BackupError::Io(err.error)
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
