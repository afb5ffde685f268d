//! One backup run, from task execution to the optional export.

use crate::archive;
use crate::config::Settings;
use crate::error::BackupError;
use crate::export;
use crate::pipeline;
use crate::remote::RemoteConnector;
use crate::retention;
use crate::task::TaskRegistry;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Archive written, retained and exported when enabled.
    Completed,
    /// No task declared a file, no archive was written.
    NothingToArchive,
    /// Archive written locally, the export phase failed.
    Partial,
    /// No usable archive came out of the run.
    Errored,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::NothingToArchive => "nothing to archive",
            RunStatus::Partial => "partial",
            RunStatus::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Record of one run.
#[derive(Debug)]
pub struct BackupRun {
    pub started_at: NaiveDateTime,
    pub tasks: usize,
    pub files: Vec<PathBuf>,
    pub archive: Option<PathBuf>,
    pub status: RunStatus,
    pub error: Option<BackupError>,
    pub elapsed: Duration,
}

impl BackupRun {
    fn new(started_at: NaiveDateTime, tasks: usize) -> Self {
        Self {
            started_at,
            tasks,
            files: vec![],
            archive: None,
            status: RunStatus::Errored,
            error: None,
            elapsed: Duration::ZERO,
        }
    }
}

/// Anything the scheduler can fire.
#[async_trait]
pub trait BackupRunner: Send + Sync {
    async fn run(&self, started_at: NaiveDateTime) -> BackupRun;
}

/// Runs the full backup pipeline with a fixed registry and settings.
pub struct Orchestrator {
    registry: TaskRegistry,
    settings: Settings,
    connector: Arc<dyn RemoteConnector>,
}

impl Orchestrator {
    pub fn new(registry: TaskRegistry, settings: Settings, connector: Arc<dyn RemoteConnector>) -> Self {
        Self {
            registry,
            settings,
            connector,
        }
    }

    async fn execute(&self, run: &mut BackupRun) -> Result<RunStatus, BackupError> {
        let settings = &self.settings;
        tokio::fs::create_dir_all(&settings.backup_root).await?;

        run.files = pipeline::run_tasks(&self.registry, &settings.backup_root).await?;
        if run.files.is_empty() {
            warn!("No file to compress for the backup process");
            return Ok(RunStatus::NothingToArchive);
        }

        let archive = archive::stage_and_compress(
            &run.files,
            &settings.backup_root,
            &settings.name,
            run.started_at,
        )
        .await?;
        run.archive = Some(archive.clone());

        retention::prune_local(&settings.backup_root, &settings.name, settings.keep).await?;

        if let Some(export_settings) = &settings.export {
            let report = export::export(
                &archive,
                &settings.name,
                export_settings,
                self.connector.as_ref(),
            )
            .await
            .inspect_err(|_| run.status = RunStatus::Partial)?;
            if report.local_deleted {
                run.archive = None;
            }
        }
        Ok(RunStatus::Completed)
    }
}

#[async_trait]
impl BackupRunner for Orchestrator {
    async fn run(&self, started_at: NaiveDateTime) -> BackupRun {
        let start = Instant::now();
        let mut run = BackupRun::new(started_at, self.registry.len());

        match self.execute(&mut run).await {
            Ok(status) => run.status = status,
            // status stays Errored, or Partial when the archive made it to disk
            Err(e) => {
                error!(error = %e, "Backup error");
                run.error = Some(e);
            }
        }
        run.elapsed = start.elapsed();

        info!(
            status = %run.status,
            archive = ?run.archive,
            "[done:backup] ({}) Backed up [{} tasks] [in {}]{}",
            run.started_at.format("%-d/%-m/%Y %H:%M"),
            run.tasks,
            format_elapsed(run.elapsed),
            if run.status == RunStatus::Completed { "" } else { " ! Not finished !" }
        );
        run
    }
}

/// Formats a duration as `1h 2min 3s`, omitting zero components.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs % 3600 / 60, secs % 60);
    let mut parts = vec![];
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}min"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{seconds}s"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::export::ExportSettings;
    use crate::remote::RemoteTarget;
    use crate::remote::fake::FakeConnector;
    use crate::task::{TaskRegistrar, task_fn};
    use chrono::NaiveDate;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn started_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(14, 7, 0)
            .unwrap()
    }

    fn settings(root: &TempDir, keep: usize, export: bool) -> Settings {
        let mut settings = Config {
            keep,
            backup_root: root.path().to_path_buf(),
            ..Config::default()
        }
        .settings()
        .unwrap();
        if export {
            settings.export = Some(ExportSettings {
                target: RemoteTarget::parse("host:/srv").unwrap(),
                keep,
                delete_local: false,
            });
        }
        settings
    }

    /// Task A declares one log file, task B declares nothing.
    fn registry(sources: &TempDir) -> TaskRegistry {
        let log = sources.path().join("a.log");
        fs::write(&log, "log line").unwrap();
        let mut registrar = TaskRegistrar::new();
        registrar.register(task_fn("a", move |ctx| {
            ctx.declare_output(log.clone());
            Ok(())
        }));
        registrar.register(task_fn("b", |_| Ok(())));
        registrar.finish().unwrap()
    }

    #[tokio::test]
    async fn test_run_without_export() {
        let root = TempDir::new().unwrap();
        let sources = TempDir::new().unwrap();
        for day in 1..=4 {
            fs::write(root.path().join(format!("backup-202403{day:02}-0300.tar.gz")), "").unwrap();
        }
        let fake = FakeConnector::default();
        let orchestrator = Orchestrator::new(
            registry(&sources),
            settings(&root, 3, false),
            Arc::new(fake.clone()),
        );

        let run = orchestrator.run(started_at()).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.tasks, 2);
        assert_eq!(run.files, vec![sources.path().join("a.log")]);
        let archive = run.archive.unwrap();
        assert_eq!(archive, root.path().join("backup-20240305-1407.tar.gz"));
        assert!(archive.exists());

        let mut left: Vec<_> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "backup-20240303-0300.tar.gz",
                "backup-20240304-0300.tar.gz",
                "backup-20240305-1407.tar.gz",
            ]
        );
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_with_nothing_to_archive() {
        let root = TempDir::new().unwrap();
        let mut registrar = TaskRegistrar::new();
        registrar.register(task_fn("empty", |_| Ok(())));
        let orchestrator = Orchestrator::new(
            registrar.finish().unwrap(),
            settings(&root, 3, true),
            Arc::new(FakeConnector::default()),
        );
        let run = orchestrator.run(started_at()).await;
        assert_eq!(run.status, RunStatus::NothingToArchive);
        assert!(run.archive.is_none());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_run_with_export() {
        let root = TempDir::new().unwrap();
        let sources = TempDir::new().unwrap();
        let fake = FakeConnector::with_files(&["backup-20240301-0300.tar.gz"]);
        let orchestrator = Orchestrator::new(
            registry(&sources),
            settings(&root, 1, true),
            Arc::new(fake.clone()),
        );
        let run = orchestrator.run(started_at()).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.archive.as_ref().unwrap().exists());
        assert_eq!(fake.files(), vec!["backup-20240305-1407.tar.gz"]);
    }

    #[tokio::test]
    async fn test_export_failure_is_partial() {
        let root = TempDir::new().unwrap();
        let sources = TempDir::new().unwrap();
        let fake = FakeConnector::default();
        fake.remote.lock().unwrap().fail_upload = true;
        let orchestrator = Orchestrator::new(
            registry(&sources),
            settings(&root, 3, true),
            Arc::new(fake.clone()),
        );
        let run = orchestrator.run(started_at()).await;
        assert_eq!(run.status, RunStatus::Partial);
        assert!(matches!(run.error, Some(BackupError::Export { .. })));
        assert!(run.archive.unwrap().exists());
        assert_eq!(fake.calls(), vec!["upload backup-20240305-1407.tar.gz"]);
    }

    #[tokio::test]
    async fn test_task_failure_is_errored() {
        let root = TempDir::new().unwrap();
        let mut registrar = TaskRegistrar::new();
        registrar.register(task_fn("broken", |_| Err(anyhow::anyhow!("disk full"))));
        let orchestrator = Orchestrator::new(
            registrar.finish().unwrap(),
            settings(&root, 3, false),
            Arc::new(FakeConnector::default()),
        );
        let run = orchestrator.run(started_at()).await;
        assert_eq!(run.status, RunStatus::Errored);
        assert!(matches!(run.error, Some(BackupError::Task { .. })));
        assert!(run.archive.is_none());
    }

    #[tokio::test]
    async fn test_second_run_in_same_minute_keeps_first_archive() {
        let root = TempDir::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registrar = TaskRegistrar::new();
        registrar.register(task_fn("dump", move |ctx| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let file = ctx.backup_root().join(format!("dump{n}.sql"));
            fs::write(&file, format!("run {n}"))?;
            ctx.declare_output(file);
            Ok(())
        }));
        let orchestrator = Orchestrator::new(
            registrar.finish().unwrap(),
            settings(&root, 3, false),
            Arc::new(FakeConnector::default()),
        );

        let first = orchestrator.run(started_at()).await;
        assert_eq!(first.status, RunStatus::Completed);
        let second = orchestrator.run(started_at()).await;
        assert_eq!(second.status, RunStatus::Errored);
        assert!(matches!(second.error, Some(BackupError::Compression { .. })));
        assert!(second.archive.is_none());

        let archive = first.archive.unwrap();
        let file = fs::File::open(&archive).unwrap();
        let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
        let entries: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["dump0.sql"]);
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(300)), "0s");
        assert_eq!(format_elapsed(Duration::from_secs(42)), "42s");
        assert_eq!(format_elapsed(Duration::from_secs(120)), "2min");
        assert_eq!(format_elapsed(Duration::from_secs(3723)), "1h 2min 3s");
        assert_eq!(format_elapsed(Duration::from_secs(7200)), "2h");
    }
}
