//! Export of a finished archive to the remote host.

use crate::error::{BackupError, Result};
use crate::name::ArchiveName;
use crate::remote::{RemoteConnector, RemoteTarget};
use crate::retention;
use std::path::Path;
use tracing::{info, warn};

/// Export behaviour taken from the configuration.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub target: RemoteTarget,
    /// Remote retention count, `0` for unlimited.
    pub keep: usize,
    pub delete_local: bool,
}

/// What the export did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub remote_deleted: Vec<String>,
    pub local_deleted: bool,
}

/// Uploads `archive`, prunes the remote directory and optionally removes the local copy.
///
/// # Errors
/// [`BackupError::Export`] if the upload fails; nothing else is attempted in that case.
/// [`BackupError::RemoteConnection`] if the remote directory cannot be inspected.
pub async fn export(
    archive: &Path,
    name: &ArchiveName,
    settings: &ExportSettings,
    connector: &dyn RemoteConnector,
) -> Result<ExportReport> {
    info!(server = %settings.target, "Backup: export compressed file...");
    connector
        .upload(&settings.target, archive)
        .await
        .map_err(|source| BackupError::Export {
            archive: archive.to_path_buf(),
            source,
        })?;

    let mut report = ExportReport::default();

    if settings.keep != 0 {
        info!("Backup: clear the server files overflow...");
        let mut session = connector
            .connect(&settings.target)
            .await
            .map_err(BackupError::RemoteConnection)?;
        let pruned = retention::prune_remote(session.as_mut(), name, settings.keep).await;
        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close remote session");
        }
        report.remote_deleted = pruned?;
    }

    if settings.delete_local {
        info!(archive = %archive.display(), "Backup: delete the local backup...");
        tokio::fs::remove_file(archive).await?;
        report.local_deleted = true;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::FakeConnector;
    use std::fs;
    use tempfile::TempDir;

    fn settings(keep: usize, delete_local: bool) -> ExportSettings {
        ExportSettings {
            target: RemoteTarget::parse("backup@host:/srv").unwrap(),
            keep,
            delete_local,
        }
    }

    fn setup() -> (TempDir, std::path::PathBuf, ArchiveName) {
        let root = TempDir::new().unwrap();
        let archive = root.path().join("backup-20240305-1407.tar.gz");
        fs::write(&archive, "gz").unwrap();
        (root, archive, ArchiveName::parse("backup-{date}").unwrap())
    }

    #[tokio::test]
    async fn test_export_keeps_local_by_default() {
        let (_root, archive, name) = setup();
        let fake = FakeConnector::with_files(&[
            "backup-20240301-0300.tar.gz",
            "backup-20240302-0300.tar.gz",
        ]);
        let report = export(&archive, &name, &settings(2, false), &fake).await.unwrap();

        assert!(archive.exists());
        assert!(!report.local_deleted);
        assert_eq!(report.remote_deleted, vec!["backup-20240301-0300.tar.gz"]);
        assert_eq!(
            fake.calls(),
            vec![
                "upload backup-20240305-1407.tar.gz",
                "connect",
                "list",
                "rm backup-20240301-0300.tar.gz",
                "close",
            ]
        );
    }

    #[tokio::test]
    async fn test_export_deletes_local_after_retention() {
        let (_root, archive, name) = setup();
        let fake = FakeConnector::default();
        let report = export(&archive, &name, &settings(3, true), &fake).await.unwrap();
        assert!(report.local_deleted);
        assert!(!archive.exists());
        assert_eq!(fake.files(), vec!["backup-20240305-1407.tar.gz"]);
    }

    #[tokio::test]
    async fn test_upload_failure_stops_export() {
        let (_root, archive, name) = setup();
        let fake = FakeConnector::default();
        fake.remote.lock().unwrap().fail_upload = true;
        let err = export(&archive, &name, &settings(3, true), &fake).await.unwrap_err();
        assert!(matches!(err, BackupError::Export { .. }));
        assert!(archive.exists());
        assert_eq!(fake.calls(), vec!["upload backup-20240305-1407.tar.gz"]);
    }

    #[tokio::test]
    async fn test_connection_failure_is_fatal() {
        let (_root, archive, name) = setup();
        let fake = FakeConnector::default();
        fake.remote.lock().unwrap().fail_connect = true;
        let err = export(&archive, &name, &settings(3, true), &fake).await.unwrap_err();
        assert!(matches!(err, BackupError::RemoteConnection(_)));
        assert!(archive.exists());
    }

    #[tokio::test]
    async fn test_unlimited_retention_skips_session() {
        let (_root, archive, name) = setup();
        let fake = FakeConnector::default();
        export(&archive, &name, &settings(0, false), &fake).await.unwrap();
        assert_eq!(fake.calls(), vec!["upload backup-20240305-1407.tar.gz"]);
    }
}
