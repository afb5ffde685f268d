//! Sequential execution of the registered tasks.

use crate::error::{BackupError, Result};
use crate::task::{TaskContext, TaskRegistry};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Runs every task in registry order and returns all declared files.
///
/// A task only starts once the previous one has completed. The returned list
/// keeps declaration order across tasks.
///
/// # Errors
/// The first failing task aborts the run with [`BackupError::Task`].
pub async fn run_tasks(registry: &TaskRegistry, backup_root: &Path) -> Result<Vec<PathBuf>> {
    let total = registry.len();
    let mut files = vec![];

    for (index, task) in registry.list().iter().enumerate() {
        info!(
            task = task.name(),
            "Backup: execute task... [{}/{} tasks]",
            index + 1,
            total
        );
        let mut ctx = TaskContext::new(backup_root);
        task.run(&mut ctx)
            .await
            .map_err(|source| BackupError::Task {
                name: task.name().to_string(),
                source,
            })?;
        let outputs = ctx.into_outputs();
        debug!(task = task.name(), files = outputs.len(), "Task completed");
        files.extend(outputs);
    }
    Ok(files)
}
