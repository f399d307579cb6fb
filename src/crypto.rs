use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{BackupError, Result};
use crate::types::EncryptionKey;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const MAGIC: &[u8; 4] = b"HRD1";

pub const ENCRYPTED_SUFFIX: &str = ".enc";

pub struct CryptoBox;

impl CryptoBox {
    /// Fresh random key from the OS CSPRNG
    pub fn generate_key() -> EncryptionKey {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        EncryptionKey::new(key.to_vec())
    }

    /// Create the key file if it does not exist yet. Returns true when a key was generated.
    pub fn generate_key_if_absent(key_path: &Path) -> Result<bool> {
        if key_path.exists() {
            return Ok(false);
        }
        if let Some(parent) = key_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let key = Self::generate_key();
        let mut encoded = BASE64.encode(&key.key);
        encoded.push('\n');

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = match options.open(key_path) {
            Ok(file) => file,
            // Another process won the race; its key is the one to use
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(encoded.as_bytes())?;
        file.sync_all()?;

        info!(path = %key_path.display(), "Generated new encryption key");
        warn!(
            path = %key_path.display(),
            "Back up this key file: archives encrypted with it cannot be recovered without it"
        );
        Ok(true)
    }

    /// Load a key previously written by `generate_key_if_absent`
    pub fn load_key(key_path: &Path) -> Result<EncryptionKey> {
        let encoded = fs::read_to_string(key_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(key_path)?.permissions().mode();
            if mode & 0o077 != 0 {
                warn!(
                    path = %key_path.display(),
                    mode = %format!("{:o}", mode & 0o777),
                    "Key file is readable by other users"
                );
            }
        }

        let key = BASE64
            .decode(encoded.trim())
            .map_err(|e| BackupError::format(format!("key file {} is not valid base64: {}", key_path.display(), e)))?;
        if key.len() != KEY_SIZE {
            return Err(BackupError::format(format!(
                "key file {} holds {} bytes, expected {}",
                key_path.display(),
                key.len(),
                KEY_SIZE
            )));
        }
        Ok(EncryptionKey::new(key))
    }

    /// `MAGIC || nonce || ciphertext`
    pub fn encrypt_bytes(data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.key));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, data)
            .map_err(|e| BackupError::format(format!("Encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(MAGIC.len() + NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt_bytes(data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
        let header = MAGIC.len() + NONCE_SIZE;
        if data.len() < header || &data[..MAGIC.len()] != MAGIC {
            return Err(BackupError::format("not an encrypted backup"));
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.key));
        let nonce = Nonce::from_slice(&data[MAGIC.len()..header]);

        cipher
            .decrypt(nonce, &data[header..])
            .map_err(|_| BackupError::format("decryption failed: wrong key or corrupted data"))
    }

    /// Writes `<file>.enc` next to the input and leaves the input in place
    pub fn encrypt_file(file_path: &Path, key: &EncryptionKey) -> Result<PathBuf> {
        let data = fs::read(file_path)?;
        let encrypted = Self::encrypt_bytes(&data, key)?;

        let mut target = OsString::from(file_path.as_os_str());
        target.push(ENCRYPTED_SUFFIX);
        let target = PathBuf::from(target);

        write_atomically(&target, &encrypted)?;
        info!(source = %file_path.display(), target = %target.display(), "Encrypted archive");
        Ok(target)
    }

    /// Writes the plaintext to the path without its `.enc` suffix.
    /// Nothing is written unless authentication succeeds.
    pub fn decrypt_file(file_path: &Path, key: &EncryptionKey) -> Result<PathBuf> {
        let name = file_path.to_string_lossy();
        let Some(stripped) = name.strip_suffix(ENCRYPTED_SUFFIX) else {
            return Err(BackupError::format(format!(
                "{} does not end with {}",
                file_path.display(),
                ENCRYPTED_SUFFIX
            )));
        };
        let target = PathBuf::from(stripped);

        let data = fs::read(file_path)?;
        let plaintext = Self::decrypt_bytes(&data, key)?;

        write_atomically(&target, &plaintext)?;
        info!(source = %file_path.display(), target = %target.display(), "Decrypted archive");
        Ok(target)
    }

    /// Create checksum for data integrity
    pub fn checksum(data: &[u8]) -> String {
        let mut hasher = Sha256::default();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Streaming SHA-256 of a file
    pub fn checksum_file(path: &Path) -> Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::default();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Compare two byte strings without an early exit on the first mismatch.
/// Only the lengths leak; callers compare fixed-size digests.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

fn write_atomically(target: &Path, data: &[u8]) -> Result<()> {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new().prefix(".partial-").tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempdir::TempDir;

    fn key_in(dir: &TempDir) -> EncryptionKey {
        let key_path = dir.path().join("keys/backup.key");
        assert!(CryptoBox::generate_key_if_absent(&key_path).unwrap());
        CryptoBox::load_key(&key_path).unwrap()
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = CryptoBox::generate_key();
        let plaintext = b"secret data";
        let encrypted = CryptoBox::encrypt_bytes(plaintext, &key).unwrap();
        let decrypted = CryptoBox::decrypt_bytes(&encrypted, &key).unwrap();

        assert_eq!(plaintext.to_vec(), decrypted);
    }

    #[test]
    fn test_key_generated_once() {
        let dir = TempDir::new("keys").unwrap();
        let key_path = dir.path().join("k.key");

        assert!(CryptoBox::generate_key_if_absent(&key_path).unwrap());
        let first = CryptoBox::load_key(&key_path).unwrap();
        assert!(!CryptoBox::generate_key_if_absent(&key_path).unwrap());
        let second = CryptoBox::load_key(&key_path).unwrap();

        assert_eq!(first.key, second.key);
        assert_eq!(first.key.len(), KEY_SIZE);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new("keys").unwrap();
        let key_path = dir.path().join("k.key");
        CryptoBox::generate_key_if_absent(&key_path).unwrap();
        let mode = fs::metadata(&key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new("crypto").unwrap();
        let key = key_in(&dir);
        let original = dir.path().join("backup_20240101000000.zip");
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&original, &content).unwrap();

        let encrypted = CryptoBox::encrypt_file(&original, &key).unwrap();
        assert_eq!(
            encrypted.file_name().unwrap().to_string_lossy(),
            "backup_20240101000000.zip.enc"
        );
        assert!(original.exists());

        fs::remove_file(&original).unwrap();
        let decrypted = CryptoBox::decrypt_file(&encrypted, &key).unwrap();
        assert_eq!(decrypted, original);
        assert_eq!(fs::read(&decrypted).unwrap(), content);
    }

    #[test]
    fn test_wrong_key_leaves_no_output() {
        let dir = TempDir::new("crypto").unwrap();
        let key = key_in(&dir);
        let other = CryptoBox::generate_key();
        let original = dir.path().join("data.zip");
        fs::write(&original, b"payload").unwrap();
        let encrypted = CryptoBox::encrypt_file(&original, &key).unwrap();
        fs::remove_file(&original).unwrap();

        let err = CryptoBox::decrypt_file(&encrypted, &other).unwrap_err();
        assert!(matches!(err, BackupError::Format(_)));
        assert!(!original.exists());
    }

    #[test]
    fn test_foreign_file_is_format_error() {
        let dir = TempDir::new("crypto").unwrap();
        let key = key_in(&dir);
        let bogus = dir.path().join("bogus.zip.enc");
        fs::write(&bogus, b"PK\x03\x04 definitely not ours").unwrap();

        let err = CryptoBox::decrypt_file(&bogus, &key).unwrap_err();
        assert!(matches!(err, BackupError::Format(_)));
        assert!(!dir.path().join("bogus.zip").exists());
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let key = CryptoBox::generate_key();
        let mut encrypted = CryptoBox::encrypt_bytes(b"important", &key).unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(matches!(
            CryptoBox::decrypt_bytes(&encrypted, &key),
            Err(BackupError::Format(_))
        ));
    }

    #[test]
    fn test_decrypt_requires_enc_suffix() {
        let dir = TempDir::new("crypto").unwrap();
        let key = key_in(&dir);
        let plain = dir.path().join("archive.zip");
        fs::write(&plain, b"x").unwrap();
        assert!(matches!(
            CryptoBox::decrypt_file(&plain, &key),
            Err(BackupError::Format(_))
        ));
    }

    #[test]
    fn test_corrupt_key_file() {
        let dir = TempDir::new("keys").unwrap();
        let key_path = dir.path().join("k.key");
        fs::write(&key_path, "c2hvcnQ=\n").unwrap();
        assert!(matches!(
            CryptoBox::load_key(&key_path),
            Err(BackupError::Format(_))
        ));
    }

    #[test]
    fn test_checksum_file_matches_bytes() {
        let dir = TempDir::new("sum").unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            CryptoBox::checksum_file(&path).unwrap(),
            CryptoBox::checksum(b"abc")
        );
        assert_eq!(
            CryptoBox::checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
