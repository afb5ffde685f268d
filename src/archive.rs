//! Compression stage: flatten the collected files into a staging directory and
//! pack it into the run's archive.

use crate::constants::{STAGING_ATTEMPTS, STAGING_PREFIX};
use crate::error::{BackupError, Result};
use crate::file_util;
use crate::name::ArchiveName;
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Moves `files` into a fresh staging directory under `backup_root` and compresses it into
/// `backup_root/<name rendered for started_at>`.
///
/// Returns the path of the archive. The staging directory is removed on success and left
/// in place when compression fails. A path listed more than once is staged once; distinct
/// files sharing a base name overwrite each other in list order.
///
/// # Errors
/// [`BackupError::Staging`] if a file cannot be moved, [`BackupError::Compression`] if the
/// tarball cannot be written, including when an archive with the same name already exists.
pub async fn stage_and_compress(
    files: &[PathBuf],
    backup_root: &Path,
    name: &ArchiveName,
    started_at: NaiveDateTime,
) -> Result<PathBuf> {
    let staging = create_staging_dir(backup_root).await?;
    debug!(staging = %staging.display(), files = files.len(), "Created staging directory");

    let mut staged = HashSet::new();
    for file in files {
        if !staged.insert(file) {
            debug!(file = %file.display(), "File declared twice, already staged");
            continue;
        }
        let file_name = file.file_name().ok_or_else(|| BackupError::Staging {
            path: file.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        })?;
        file_util::move_file(file, &staging.join(file_name))
            .await
            .map_err(|source| BackupError::Staging {
                path: file.clone(),
                source,
            })?;
    }

    let archive = backup_root.join(name.render(started_at));
    info!(archive = %archive.display(), "Backup: files compression...");

    let (src, dest) = (staging.clone(), archive.clone());
    let result = tokio::task::spawn_blocking(move || file_util::write_flat_tarball(&src, &dest))
        .await
        .unwrap_or_else(|e| Err(io::Error::other(e)));

    if let Err(source) = result {
        // an AlreadyExists archive belongs to an earlier run
        if source.kind() != io::ErrorKind::AlreadyExists {
            if let Err(e) = tokio::fs::remove_file(&archive).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(archive = %archive.display(), error = %e, "Failed to remove partial archive");
                }
            }
        }
        return Err(BackupError::Compression {
            staging,
            archive,
            source,
        });
    }

    tokio::fs::remove_dir_all(&staging).await?;
    Ok(archive)
}

/// Creates `backup_root/temp-<uuid>`, retrying with a new id if the name is taken.
async fn create_staging_dir(backup_root: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(backup_root).await?;
    let mut last_error = None;
    for _ in 0..STAGING_ATTEMPTS {
        let path = backup_root.join(format!("{STAGING_PREFIX}{}", Uuid::new_v4().simple()));
        match tokio::fs::create_dir(&path).await {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_error = Some(e),
            Err(source) => return Err(BackupError::Staging { path, source }),
        }
    }
    Err(BackupError::Staging {
        path: backup_root.to_path_buf(),
        source: last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::AlreadyExists)),
    })
}
