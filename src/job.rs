//! Backup jobs declared in the configuration file.
//!
//! Each `[[jobs]]` entry becomes one [`BackupTask`]. `copy` jobs hand over a copy
//! of a file (or a tarball of a directory), `command` jobs run a shell command that
//! writes its dumps into the backup root and declare the files it produced.
//!
//! Copies are named after their job (`<job>-<file name>`, `<job>.tar.gz`), so two
//! jobs never write the same file as long as job names are unique.

use crate::file_util;
use crate::task::{BackupTask, TaskContext, TaskDefinition, TaskRegistrar};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// A single backup job.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Job {
    /// Copy a file to `<name>-<file name>`, or pack a directory into `<name>.tar.gz`.
    Copy { name: String, source: PathBuf },
    /// Run `command` with `sh -c` in the backup root and archive `outputs`.
    Command {
        name: String,
        command: String,
        /// Files written by the command. Relative paths are resolved against the backup root.
        #[serde(default)]
        outputs: Vec<PathBuf>,
    },
}

impl Job {
    pub fn name(&self) -> &str {
        match self {
            Job::Copy { name, .. } | Job::Command { name, .. } => name,
        }
    }
}

#[async_trait]
impl BackupTask for Job {
    fn name(&self) -> &str {
        Job::name(self)
    }

    async fn run(&self, ctx: &mut TaskContext) -> Result<()> {
        match self {
            Job::Copy { name, source } => copy(name, source, ctx).await,
            Job::Command {
                command, outputs, ..
            } => run_command(command, outputs, ctx).await,
        }
    }
}

async fn copy(name: &str, source: &Path, ctx: &mut TaskContext) -> Result<()> {
    let metadata = tokio::fs::metadata(source)
        .await
        .with_context(|| format!("The path '{}' is invalid", source.display()))?;

    let dest = if metadata.is_dir() {
        let dest = ctx.backup_root().join(format!("{name}.tar.gz"));
        let (src, tarball) = (source.to_path_buf(), dest.clone());
        tokio::task::spawn_blocking(move || file_util::pack_dir(&src, &tarball)).await??;
        dest
    } else {
        let file_name = source
            .file_name()
            .with_context(|| format!("Invalid file name '{}'", source.display()))?;
        let dest = ctx
            .backup_root()
            .join(format!("{name}-{}", file_name.to_string_lossy()));
        if dest == source {
            bail!(
                "The source '{}' lives in the backup root and cannot be copied onto itself",
                source.display()
            );
        }
        tokio::fs::create_dir_all(ctx.backup_root()).await?;
        tokio::fs::copy(source, &dest).await?;
        dest
    };
    debug!(source = %source.display(), dest = %dest.display(), "Copied backup source");
    ctx.declare_output(dest);
    Ok(())
}

async fn run_command(command: &str, outputs: &[PathBuf], ctx: &mut TaskContext) -> Result<()> {
    tokio::fs::create_dir_all(ctx.backup_root()).await?;
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(ctx.backup_root())
        .env("BACKUP_PATH", ctx.backup_root())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to spawn '{command}'"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("'{command}' exited with {}: {}", output.status, stderr.trim());
    }

    for path in outputs {
        let path = ctx.backup_root().join(path);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            bail!("'{command}' did not produce '{}'", path.display());
        }
        ctx.declare_output(path);
    }
    Ok(())
}

/// Registers the jobs of the configuration file as tasks.
pub struct ConfiguredJobs {
    jobs: Vec<Job>,
}

impl ConfiguredJobs {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self { jobs }
    }
}

impl TaskDefinition for ConfiguredJobs {
    fn name(&self) -> &str {
        "config"
    }

    /// # Errors
    /// Fails if two jobs share a name.
    fn define(&self, registrar: &mut TaskRegistrar) -> Result<()> {
        let mut names = HashSet::new();
        for job in &self.jobs {
            if !names.insert(job.name()) {
                bail!("duplicate job name '{}'", job.name());
            }
            registrar.register(job.clone());
        }
        Ok(())
    }
}
