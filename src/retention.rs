//! Retention of archives, locally and on the export host.
//!
//! Both sides keep the `keep` lexicographically greatest archive names. Archive
//! names embed `YYYYMMDD-HHMM`, so that is also the `keep` most recent archives.
//! A `keep` of `0` disables pruning.

use crate::error::{BackupError, Result};
use crate::file_util;
use crate::name::ArchiveName;
use crate::remote::RemoteSession;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Names to delete so that at most `keep` remain, oldest first.
fn overflow(mut names: Vec<String>, keep: usize) -> Vec<String> {
    if keep == 0 || names.len() <= keep {
        return vec![];
    }
    names.sort();
    let excess = names.len() - keep;
    names.truncate(excess);
    names
}

/// Names of the archives in `backup_root` matching `name`, oldest first.
///
/// A missing backup root holds no archive.
pub fn local_archives(backup_root: &Path, name: &ArchiveName) -> Result<Vec<String>> {
    if !backup_root.exists() {
        return Ok(vec![]);
    }
    let names = file_util::list_file_names(backup_root)?;
    Ok(names.into_iter().filter(|n| name.matches(n)).collect())
}

/// Deletes the oldest local archives matching `name` beyond `keep`.
///
/// Returns the deleted paths.
pub async fn prune_local(backup_root: &Path, name: &ArchiveName, keep: usize) -> Result<Vec<PathBuf>> {
    if keep == 0 {
        return Ok(vec![]);
    }
    info!("Backup: clear the local files overflow...");

    let names = local_archives(backup_root, name)?;
    let mut deleted = vec![];
    for file_name in overflow(names, keep) {
        let path = backup_root.join(&file_name);
        tokio::fs::remove_file(&path).await?;
        debug!(archive = %path.display(), "Deleted local archive");
        deleted.push(path);
    }
    Ok(deleted)
}

/// Deletes the oldest remote archives matching `name` beyond `keep`.
///
/// Deletes run one at a time on `session`. A failed delete is logged and skipped.
/// Returns the names that were deleted.
///
/// # Errors
/// [`BackupError::RemoteConnection`] if the remote directory cannot be listed.
pub async fn prune_remote(
    session: &mut dyn RemoteSession,
    name: &ArchiveName,
    keep: usize,
) -> Result<Vec<String>> {
    if keep == 0 {
        return Ok(vec![]);
    }
    let listing = session.list().await.map_err(BackupError::RemoteConnection)?;
    let names = listing.into_iter().filter(|n| name.matches(n)).collect();

    let mut deleted = vec![];
    for file_name in overflow(names, keep) {
        match session.remove(&file_name).await {
            Ok(()) => {
                debug!(archive = %file_name, "Deleted remote archive");
                deleted.push(file_name);
            }
            Err(e) => warn!(archive = %file_name, error = %e, "Backup: failed to delete remote archive"),
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteConnector;
    use crate::remote::RemoteTarget;
    use crate::remote::fake::FakeConnector;
    use std::fs;
    use tempfile::TempDir;

    fn name() -> ArchiveName {
        ArchiveName::parse("backup-{date}").unwrap()
    }

    fn archives(n: usize) -> Vec<String> {
        (1..=n)
            .map(|d| format!("backup-202401{d:02}-0300.tar.gz"))
            .collect()
    }

    fn target() -> RemoteTarget {
        RemoteTarget::parse("host:/backups").unwrap()
    }

    #[test]
    fn test_overflow() {
        let names = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(overflow(names.clone(), 1), vec!["a", "b"]);
        assert_eq!(overflow(names.clone(), 3), Vec::<String>::new());
        assert_eq!(overflow(names.clone(), 5), Vec::<String>::new());
        assert_eq!(overflow(names, 0), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_prune_local_keeps_newest() {
        let root = TempDir::new().unwrap();
        for file in archives(5) {
            fs::write(root.path().join(file), "").unwrap();
        }
        fs::write(root.path().join("notes.txt"), "").unwrap();
        fs::create_dir(root.path().join("temp-abc")).unwrap();

        let deleted = prune_local(root.path(), &name(), 3).await.unwrap();
        assert_eq!(deleted.len(), 2);

        let left = file_util::list_file_names(root.path()).unwrap();
        assert_eq!(
            left,
            vec![
                "backup-20240103-0300.tar.gz",
                "backup-20240104-0300.tar.gz",
                "backup-20240105-0300.tar.gz",
                "notes.txt",
            ]
        );
        assert!(root.path().join("temp-abc").is_dir());
    }

    #[test]
    fn test_local_archives() {
        let root = TempDir::new().unwrap();
        assert!(local_archives(&root.path().join("none"), &name()).unwrap().is_empty());
        for file in archives(2).into_iter().rev() {
            fs::write(root.path().join(file), "").unwrap();
        }
        fs::write(root.path().join("app.sql"), "").unwrap();
        assert_eq!(local_archives(root.path(), &name()).unwrap(), archives(2));
    }

    #[tokio::test]
    async fn test_prune_local_fewer_than_keep() {
        let root = TempDir::new().unwrap();
        for file in archives(2) {
            fs::write(root.path().join(file), "").unwrap();
        }
        let deleted = prune_local(root.path(), &name(), 3).await.unwrap();
        assert!(deleted.is_empty());
        assert_eq!(file_util::list_file_names(root.path()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_prune_local_unlimited() {
        let root = TempDir::new().unwrap();
        for file in archives(9) {
            fs::write(root.path().join(file), "").unwrap();
        }
        let deleted = prune_local(root.path(), &name(), 0).await.unwrap();
        assert!(deleted.is_empty());
        assert_eq!(file_util::list_file_names(root.path()).unwrap().len(), 9);
    }

    #[tokio::test]
    async fn test_prune_remote_deletes_oldest_one_by_one() {
        let mut files = archives(4);
        files.reverse();
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        let fake = FakeConnector::with_files(&refs);
        fake.remote.lock().unwrap().files.push("README".into());

        let mut session = fake.connect(&target()).await.unwrap();
        let deleted = prune_remote(session.as_mut(), &name(), 2).await.unwrap();
        session.close().await.unwrap();

        assert_eq!(deleted, vec!["backup-20240101-0300.tar.gz", "backup-20240102-0300.tar.gz"]);
        assert_eq!(
            fake.calls(),
            vec![
                "connect",
                "list",
                "rm backup-20240101-0300.tar.gz",
                "rm backup-20240102-0300.tar.gz",
                "close",
            ]
        );
        assert_eq!(
            fake.files(),
            vec!["README", "backup-20240103-0300.tar.gz", "backup-20240104-0300.tar.gz"]
        );
    }

    #[tokio::test]
    async fn test_prune_remote_fewer_than_keep() {
        let files = archives(2);
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        let fake = FakeConnector::with_files(&refs);
        let mut session = fake.connect(&target()).await.unwrap();
        let deleted = prune_remote(session.as_mut(), &name(), 3).await.unwrap();
        assert!(deleted.is_empty());
        assert!(fake.calls().iter().all(|c| !c.starts_with("rm")));
    }

    #[tokio::test]
    async fn test_prune_remote_failed_delete_continues() {
        let files = archives(4);
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        let fake = FakeConnector::with_files(&refs);
        fake.remote
            .lock()
            .unwrap()
            .fail_remove
            .push("backup-20240101-0300.tar.gz".into());

        let mut session = fake.connect(&target()).await.unwrap();
        let deleted = prune_remote(session.as_mut(), &name(), 1).await.unwrap();
        assert_eq!(
            deleted,
            vec!["backup-20240102-0300.tar.gz", "backup-20240103-0300.tar.gz"]
        );
        assert_eq!(
            fake.files(),
            vec!["backup-20240101-0300.tar.gz", "backup-20240104-0300.tar.gz"]
        );
    }

    #[tokio::test]
    async fn test_prune_remote_unlimited_issues_nothing() {
        let files = archives(6);
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        let fake = FakeConnector::with_files(&refs);
        let mut session = fake.connect(&target()).await.unwrap();
        prune_remote(session.as_mut(), &name(), 0).await.unwrap();
        assert_eq!(fake.calls(), vec!["connect"]);
    }
}
