use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{BackupError, Result};
use crate::types::ArchiveArtifact;

const ARCHIVE_PREFIX: &str = "backup_";
const ARCHIVE_TIMESTAMP: &str = "%Y%m%d%H%M%S";

pub struct ArchiveBuilder;

impl ArchiveBuilder {
    /// `backup_<YYYYMMDDHHMMSS>.zip`
    pub fn archive_name(created_at: &DateTime<Local>) -> String {
        format!("{}{}.zip", ARCHIVE_PREFIX, created_at.format(ARCHIVE_TIMESTAMP))
    }

    /// Archive every regular file under `source_dir` into a new zip in `backup_dir`
    pub fn build(source_dir: &Path, backup_dir: &Path) -> Result<ArchiveArtifact> {
        Self::build_at(source_dir, backup_dir, Local::now())
    }

    pub fn build_at(
        source_dir: &Path,
        backup_dir: &Path,
        created_at: DateTime<Local>,
    ) -> Result<ArchiveArtifact> {
        if !source_dir.is_dir() {
            return Err(BackupError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("source directory not found: {}", source_dir.display()),
            )));
        }

        if !backup_dir.exists() {
            fs::create_dir_all(backup_dir)?;
            info!(path = %backup_dir.display(), "Created backup directory");
        }

        let source = source_dir.canonicalize()?;
        let exclude = backup_dir.canonicalize()?;
        if source.starts_with(&exclude) {
            return Err(BackupError::config(format!(
                "source_dir {} must not be inside backup_dir {}",
                source.display(),
                exclude.display()
            )));
        }
        let target = backup_dir.join(Self::archive_name(&created_at));

        // Written under a hidden temporary name so a crash never leaves a
        // half-written archive under the final name
        let mut partial = tempfile::Builder::new()
            .prefix(".partial-")
            .suffix(".zip")
            .tempfile_in(backup_dir)?;

        let files = write_zip(&source, &exclude, partial.as_file_mut())?;
        partial.as_file_mut().sync_all()?;
        partial.persist_noclobber(&target)?;

        info!(
            path = %target.display(),
            files,
            "Created archive"
        );
        Ok(ArchiveArtifact::new(target, created_at))
    }

    /// Unpack an archive into `dest`, refusing entries that escape it
    pub fn extract(archive: &Path, dest: &Path) -> Result<usize> {
        let mut zip = ZipArchive::new(File::open(archive)?)?;
        fs::create_dir_all(dest)?;

        let mut files = 0;
        for index in 0..zip.len() {
            let mut entry = zip.by_index(index)?;
            let relative: PathBuf = entry.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
                BackupError::format(format!("unsafe entry name in archive: {}", entry.name()))
            })?;
            let full = dest.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&full)?;
                continue;
            }
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut out = File::create(&full)?;
            let written = io::copy(&mut entry, &mut out)?;
            debug!(path = %full.display(), bytes = written, "Extracted file");
            files += 1;
        }

        info!(archive = %archive.display(), dest = %dest.display(), files, "Extracted archive");
        Ok(files)
    }
}

fn write_zip<W: Write + Seek>(source: &Path, exclude: &Path, writer: W) -> Result<usize> {
    let mut zip = ZipWriter::new(writer);
    let base = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    let walker = WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !e.path().starts_with(exclude));

    let mut files = 0;
    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| BackupError::Io(io::Error::other(e)))?;
        let name = entry_name(relative);
        let metadata = entry.metadata().map_err(io::Error::from)?;

        let mut options = base.large_file(metadata.len() > u32::MAX as u64);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            options = options.unix_permissions(metadata.permissions().mode());
        }

        zip.start_file(name.as_str(), options)?;
        let mut file = File::open(entry.path())?;
        io::copy(&mut file, &mut zip)?;
        debug!(entry = %name, bytes = metadata.len(), "Added file to archive");
        files += 1;
    }

    zip.finish()?;
    Ok(files)
}

/// Relative path with `/` separators, as zip readers expect
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
