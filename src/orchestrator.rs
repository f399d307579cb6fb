//! One backup cycle: pre-hook, archive, encrypt, upload, cleanup, post-hook.
//!
//! A cycle never panics the scheduler. Stage failures end the cycle as
//! [`CycleOutcome::Failed`]; only a hook failure under the strict policy is
//! returned as an error, which the binary treats as fatal.

use chrono::{DateTime, Local};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::archive::ArchiveBuilder;
use crate::config::{EncryptionSettings, HookFailurePolicy};
use crate::context::JobContext;
use crate::crypto::CryptoBox;
use crate::error::{BackupError, Result};
use crate::types::{ArchiveArtifact, CycleOutcome, CycleReport, Stage};

pub struct BackupOrchestrator {
    ctx: JobContext,
}

/// Where a failed stage stopped and why
struct StageFailure {
    stage: Stage,
    reason: String,
}

impl StageFailure {
    fn at(stage: Stage) -> impl FnOnce(BackupError) -> StageFailure {
        move |err| StageFailure {
            stage,
            reason: err.to_string(),
        }
    }
}

#[derive(Default)]
struct Progress {
    artifact: Option<ArchiveArtifact>,
    remote_name: Option<String>,
}

impl BackupOrchestrator {
    pub fn new(ctx: JobContext) -> Self {
        Self { ctx }
    }

    /// Run a single cycle to completion
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let started_at = Local::now();
        let config = &self.ctx.config;
        info!(
            source = %config.source_dir.display(),
            destination = %config.backup_dir.display(),
            "Starting backup cycle"
        );

        if !self.ctx.hooks.run(config.pre_hook.as_deref()).await {
            let failure = self.hook_failed(Stage::PreHook, config.pre_hook.as_deref())?;
            return Ok(self.report(failure, Progress::default(), started_at));
        }

        let mut progress = Progress::default();
        let mut outcome = match self.pipeline(&mut progress).await {
            Ok(()) => CycleOutcome::Completed,
            Err(failure) => {
                error!(stage = %failure.stage, reason = %failure.reason, "Backup cycle failed");
                CycleOutcome::Failed {
                    stage: failure.stage,
                    reason: failure.reason,
                }
            }
        };

        // Runs even after a failed stage so services stopped by the pre-hook come back
        if !self.ctx.hooks.run(config.post_hook.as_deref()).await {
            let failure = self.hook_failed(Stage::PostHook, config.post_hook.as_deref())?;
            if outcome == CycleOutcome::Completed {
                outcome = failure;
            }
        }

        let report = self.report(outcome, progress, started_at);
        match &report.outcome {
            CycleOutcome::Completed => info!(
                stage = %Stage::Done,
                artifact = ?report.artifact,
                remote = ?report.remote_name,
                "Backup cycle completed"
            ),
            CycleOutcome::Failed { stage, .. } => warn!(stage = %stage, "Backup cycle ended with failure"),
        }
        Ok(report)
    }

    /// Strict policy turns a hook failure into an error; lenient only fails the cycle
    fn hook_failed(&self, stage: Stage, command: Option<&str>) -> Result<CycleOutcome> {
        let command = command.unwrap_or_default().to_string();
        match self.ctx.config.hook_failure_policy {
            HookFailurePolicy::Strict => {
                error!(stage = %stage, command = %command, "Hook failed, aborting (strict policy)");
                Err(BackupError::HookFailure {
                    stage: stage.to_string(),
                    command,
                })
            }
            HookFailurePolicy::Lenient => {
                warn!(stage = %stage, command = %command, "Hook failed, skipping this cycle");
                Ok(CycleOutcome::Failed {
                    stage,
                    reason: format!("{} hook failed: {}", stage, command),
                })
            }
        }
    }

    async fn pipeline(&self, progress: &mut Progress) -> std::result::Result<(), StageFailure> {
        let config = &self.ctx.config;

        let source = config.source_dir.clone();
        let destination = config.backup_dir.clone();
        let artifact = tokio::task::spawn_blocking(move || ArchiveBuilder::build(&source, &destination))
            .await
            .map_err(|e| StageFailure {
                stage: Stage::Archiving,
                reason: format!("archive task failed: {}", e),
            })?
            .map_err(StageFailure::at(Stage::Archiving))?;
        progress.artifact = Some(artifact.clone());

        let artifact = match config.encryption_enabled() {
            Some(settings) => {
                let encrypted = encrypt(artifact, settings.clone()).await?;
                progress.artifact = Some(encrypted.clone());
                encrypted
            }
            None => artifact,
        };

        let path = artifact.path.clone();
        match tokio::task::spawn_blocking(move || CryptoBox::checksum_file(&path)).await {
            Ok(Ok(digest)) => info!(path = %artifact.path.display(), sha256 = %digest, "Archive digest"),
            Ok(Err(e)) => warn!(path = %artifact.path.display(), error = %e, "Could not hash archive"),
            Err(e) => warn!(error = %e, "Hash task failed"),
        }

        let Some(store) = &self.ctx.store else {
            return Ok(());
        };

        info!(
            backend = store.name(),
            file = %artifact.file_name(),
            encrypted = artifact.encrypted,
            "Uploading backup"
        );
        let remote_name = store
            .upload(artifact.path(), Some(artifact.timestamp()))
            .await
            .map_err(StageFailure::at(Stage::Uploading))?;
        progress.remote_name = Some(remote_name);

        // Only after a confirmed upload; a failed delete leaves a redundant local copy
        match tokio::fs::remove_file(artifact.path()).await {
            Ok(()) => {
                info!(path = %artifact.path.display(), "Removed local archive after upload");
                progress.artifact = None;
            }
            Err(e) => warn!(
                stage = %Stage::Cleanup,
                path = %artifact.path.display(),
                error = %e,
                "Could not remove local archive"
            ),
        }
        Ok(())
    }

    fn report(&self, outcome: CycleOutcome, progress: Progress, started_at: DateTime<Local>) -> CycleReport {
        CycleReport {
            outcome,
            artifact: progress.artifact.map(|a| a.path),
            remote_name: progress.remote_name,
            started_at,
            finished_at: Local::now(),
        }
    }
}

/// Encrypt the archive in place of the plaintext; the key file is created on first use
async fn encrypt(
    artifact: ArchiveArtifact,
    settings: EncryptionSettings,
) -> std::result::Result<ArchiveArtifact, StageFailure> {
    let plaintext = artifact.path.clone();
    let encrypted: PathBuf = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        CryptoBox::generate_key_if_absent(&settings.key_file)?;
        let key = CryptoBox::load_key(&settings.key_file)?;
        let out = CryptoBox::encrypt_file(&plaintext, &key)?;
        if !settings.keep_plaintext {
            if let Err(e) = fs::remove_file(&plaintext) {
                warn!(path = %plaintext.display(), error = %e, "Could not remove plaintext archive");
            }
        }
        Ok(out)
    })
    .await
    .map_err(|e| StageFailure {
        stage: Stage::Encrypting,
        reason: format!("encryption task failed: {}", e),
    })?
    .map_err(StageFailure::at(Stage::Encrypting))?;

    info!(path = %encrypted.display(), "Encrypted archive");
    Ok(ArchiveArtifact {
        path: encrypted,
        created_at: artifact.created_at,
        encrypted: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackupJobConfig, EncryptionSettings};
    use crate::store::BackupStore;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::io::Read;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempdir::TempDir;

    /// Accepts uploads into memory, or refuses every call
    #[derive(Default)]
    struct MemoryStore {
        refuse: bool,
        uploads: Mutex<Vec<(String, Option<i64>, Vec<u8>)>>,
    }

    #[async_trait]
    impl BackupStore for MemoryStore {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn upload(&self, file: &Path, client_timestamp: Option<i64>) -> Result<String> {
            if self.refuse {
                return Err(BackupError::Remote {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            let name = file.file_name().unwrap().to_string_lossy().into_owned();
            let data = std::fs::read(file)?;
            self.uploads.lock().unwrap().push((name.clone(), client_timestamp, data));
            Ok(name)
        }

        async fn list(&self) -> Result<Vec<String>> {
            Ok(self.uploads.lock().unwrap().iter().map(|u| u.0.clone()).collect())
        }

        async fn download(&self, name: &str, _dest_dir: &Path) -> Result<PathBuf> {
            Err(BackupError::NotFound(name.to_string()))
        }

        async fn delete(&self, name: &str) -> Result<()> {
            Err(BackupError::NotFound(name.to_string()))
        }
    }

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new("orchestrator").unwrap();
            std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
            std::fs::write(dir.path().join("src/a.txt"), "hi").unwrap();
            std::fs::write(dir.path().join("src/nested/b.txt"), "there").unwrap();
            Self { dir }
        }

        fn config(&self) -> BackupJobConfig {
            BackupJobConfig::local(self.dir.path().join("src"), self.dir.path().join("backups"))
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.dir.path().join(rel)
        }

        fn backups(&self) -> Vec<String> {
            let mut names: Vec<String> = match std::fs::read_dir(self.path("backups")) {
                Ok(entries) => entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect(),
                Err(_) => Vec::new(),
            };
            names.sort();
            names
        }
    }

    fn orchestrator(config: BackupJobConfig, store: Option<Arc<dyn BackupStore>>) -> BackupOrchestrator {
        let mut ctx = JobContext::from_config(config).unwrap();
        if let Some(store) = store {
            ctx = ctx.with_store(store);
        }
        BackupOrchestrator::new(ctx)
    }

    #[tokio::test]
    async fn test_local_only_cycle_keeps_archive() {
        let fx = Fixture::new();
        let report = orchestrator(fx.config(), None).run_cycle().await.unwrap();

        assert!(report.is_success());
        let artifact = report.artifact.unwrap();
        assert!(artifact.exists());
        assert_eq!(fx.backups().len(), 1);
        assert!(fx.backups()[0].starts_with("backup_"));
        assert!(fx.backups()[0].ends_with(".zip"));
    }

    #[tokio::test]
    async fn test_single_file_archive_contents() {
        let dir = TempDir::new("e2e").unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.txt"), "hi").unwrap();
        let config = BackupJobConfig::local(dir.path().join("src"), dir.path().join("out"));

        let report = orchestrator(config, None).run_cycle().await.unwrap();
        assert!(report.is_success());

        let file = std::fs::File::open(report.artifact.unwrap()).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        assert_eq!(zip.len(), 1);
        let mut content = String::new();
        zip.by_name("a.txt").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hi");
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_local_archive() {
        let fx = Fixture::new();
        let store = Arc::new(MemoryStore {
            refuse: true,
            ..Default::default()
        });
        let report = orchestrator(fx.config(), Some(store)).run_cycle().await.unwrap();

        match &report.outcome {
            CycleOutcome::Failed { stage, reason } => {
                assert_eq!(*stage, Stage::Uploading);
                assert!(reason.contains("503"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(report.artifact.unwrap().exists());
        assert!(report.remote_name.is_none());
        assert_eq!(fx.backups().len(), 1);
    }

    #[tokio::test]
    async fn test_successful_upload_removes_local_archive() {
        let fx = Fixture::new();
        let store = Arc::new(MemoryStore::default());
        let report = orchestrator(fx.config(), Some(store.clone())).run_cycle().await.unwrap();

        assert!(report.is_success());
        assert!(report.artifact.is_none());
        assert!(fx.backups().is_empty());

        let uploads = store.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(report.remote_name.as_deref(), Some(uploads[0].0.as_str()));
        let sent = uploads[0].1.unwrap();
        assert!((report.started_at.timestamp() - sent).abs() <= 1);
    }

    #[tokio::test]
    async fn test_encryption_replaces_plaintext() {
        let fx = Fixture::new();
        let mut config = fx.config();
        config.encryption = Some(EncryptionSettings {
            enabled: true,
            key_file: fx.path("keys/backup.key"),
            keep_plaintext: false,
        });

        let report = orchestrator(config, None).run_cycle().await.unwrap();
        assert!(report.is_success());

        let backups = fx.backups();
        assert_eq!(backups.len(), 1);
        assert!(backups[0].ends_with(".zip.enc"));
        assert!(fx.path("keys/backup.key").exists());

        let key = CryptoBox::load_key(&fx.path("keys/backup.key")).unwrap();
        let plain = CryptoBox::decrypt_file(&report.artifact.unwrap(), &key).unwrap();
        assert_eq!(ArchiveBuilder::extract(&plain, &fx.path("restored")).unwrap(), 2);
        assert_eq!(std::fs::read_to_string(fx.path("restored/nested/b.txt")).unwrap(), "there");
    }

    #[tokio::test]
    async fn test_encrypted_artifact_is_uploaded() {
        let fx = Fixture::new();
        let mut config = fx.config();
        config.encryption = Some(EncryptionSettings {
            enabled: true,
            key_file: fx.path("backup.key"),
            keep_plaintext: true,
        });
        let store = Arc::new(MemoryStore::default());

        let report = orchestrator(config, Some(store.clone())).run_cycle().await.unwrap();
        assert!(report.is_success());
        assert!(report.remote_name.unwrap().ends_with(".zip.enc"));
        // Plaintext kept on request, uploaded ciphertext removed
        let backups = fx.backups();
        assert_eq!(backups.len(), 1);
        assert!(backups[0].ends_with(".zip"));
    }

    #[tokio::test]
    async fn test_missing_source_fails_archiving() {
        let fx = Fixture::new();
        let config = BackupJobConfig::local(fx.path("nope"), fx.path("backups"));

        let report = orchestrator(config, None).run_cycle().await.unwrap();
        assert!(matches!(
            report.outcome,
            CycleOutcome::Failed {
                stage: Stage::Archiving,
                ..
            }
        ));
        assert!(report.artifact.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lenient_pre_hook_failure_skips_cycle() {
        let fx = Fixture::new();
        let mut config = fx.config();
        config.hook_failure_policy = HookFailurePolicy::Lenient;
        config.pre_hook = Some("exit 1".to_string());
        config.post_hook = Some(format!("touch '{}'", fx.path("post-ran").display()));

        let report = orchestrator(config, None).run_cycle().await.unwrap();
        assert!(matches!(
            report.outcome,
            CycleOutcome::Failed {
                stage: Stage::PreHook,
                ..
            }
        ));
        assert!(fx.backups().is_empty());
        assert!(!fx.path("post-ran").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_strict_pre_hook_failure_is_error() {
        let fx = Fixture::new();
        let mut config = fx.config();
        config.pre_hook = Some("exit 2".to_string());

        let err = orchestrator(config, None).run_cycle().await.unwrap_err();
        match err {
            BackupError::HookFailure { stage, command } => {
                assert_eq!(stage, "pre-hook");
                assert_eq!(command, "exit 2");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(fx.backups().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_post_hook_runs_after_upload_failure() {
        let fx = Fixture::new();
        let mut config = fx.config();
        config.post_hook = Some(format!("touch '{}'", fx.path("post-ran").display()));
        let store = Arc::new(MemoryStore {
            refuse: true,
            ..Default::default()
        });

        let report = orchestrator(config, Some(store)).run_cycle().await.unwrap();
        assert!(!report.is_success());
        assert!(fx.path("post-ran").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lenient_post_hook_failure_marks_cycle() {
        let fx = Fixture::new();
        let mut config = fx.config();
        config.hook_failure_policy = HookFailurePolicy::Lenient;
        config.post_hook = Some("false".to_string());

        let report = orchestrator(config, None).run_cycle().await.unwrap();
        assert!(matches!(
            report.outcome,
            CycleOutcome::Failed {
                stage: Stage::PostHook,
                ..
            }
        ));
        // Committed work is not undone
        assert!(report.artifact.unwrap().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_strict_post_hook_failure_is_error() {
        let fx = Fixture::new();
        let mut config = fx.config();
        config.post_hook = Some("false".to_string());

        let err = orchestrator(config, None).run_cycle().await.unwrap_err();
        assert!(matches!(err, BackupError::HookFailure { .. }));
        assert_eq!(fx.backups().len(), 1);
    }
}
