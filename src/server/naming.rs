use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::error::{BackupError, Result};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

// No separators, no NUL, no leading dot (hidden upload temp files start with one)
static SAFE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^./\\\x00][^/\\\x00]*$").expect("static pattern compiles"));

/// Render the stored name for an upload.
///
/// `{timestamp}` becomes the client timestamp (or `now`) in UTC, `{username}`
/// the authenticated user. A timestamp chrono cannot represent is a format error.
pub fn backup_name(format: &str, username: &str, client_timestamp: Option<i64>, now: DateTime<Utc>) -> Result<String> {
    let at = match client_timestamp {
        Some(ts) => DateTime::<Utc>::from_timestamp(ts, 0)
            .ok_or_else(|| BackupError::format(format!("invalid Unix timestamp: {}", ts)))?,
        None => now,
    };

    let name = format
        .replace("{timestamp}", &at.format(TIMESTAMP_FORMAT).to_string())
        .replace("{username}", username);

    if !is_safe_name(&name) {
        return Err(BackupError::format(format!("unsafe backup name: {:?}", name)));
    }
    Ok(name)
}

/// True if `name` is a single path component safe to join onto the backup directory
pub fn is_safe_name(name: &str) -> bool {
    SAFE_NAME.is_match(name)
}

/// A name the server will serve: safe and carrying the backup prefix
pub fn is_backup_name(name: &str, prefix: &str) -> bool {
    is_safe_name(name) && name.starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FORMAT: &str = "backup_{timestamp}_{username}.zip";

    #[test]
    fn test_client_timestamp_rendered_in_utc() {
        let name = backup_name(FORMAT, "alice", Some(1_700_000_000), Utc::now()).unwrap();
        assert_eq!(name, "backup_2023-11-14_22-13-20_alice.zip");
    }

    #[test]
    fn test_falls_back_to_now() {
        let now = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        assert_eq!(
            backup_name(FORMAT, "bob", None, now).unwrap(),
            "backup_1970-01-01_00-00-00_bob.zip"
        );
    }

    #[test]
    fn test_rejects_unrepresentable_timestamp() {
        assert!(backup_name(FORMAT, "alice", Some(i64::MAX), Utc::now()).is_err());
    }

    #[test]
    fn test_rejects_names_with_separators() {
        assert!(backup_name(FORMAT, "../../etc", Some(0), Utc::now()).is_err());
        assert!(backup_name("{username}", ".hidden", Some(0), Utc::now()).is_err());
    }

    #[test]
    fn test_backup_name_filter() {
        assert!(is_backup_name("backup_1.zip", "backup_"));
        assert!(!is_backup_name("notes.txt", "backup_"));
        assert!(!is_backup_name("backup_/x", "backup_"));
        assert!(!is_backup_name("..", "backup_"));
        assert!(!is_safe_name(""));
    }
}
