//! Backup tasks and the registry that holds them.
//!
//! A [`TaskDefinition`] is invoked once at startup and registers zero or more
//! [`BackupTask`]s. Once every definition has run, the registrar is frozen into
//! a [`TaskRegistry`] whose order is the execution order of every run.

use crate::error::InitError;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-task view of a run: where to write, and how to hand files over for archiving.
#[derive(Debug)]
pub struct TaskContext {
    backup_root: PathBuf,
    outputs: Vec<PathBuf>,
}

impl TaskContext {
    pub(crate) fn new(backup_root: &Path) -> Self {
        Self {
            backup_root: backup_root.to_path_buf(),
            outputs: vec![],
        }
    }

    /// Directory the archives live in. Tasks may write their dumps here.
    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Declares a file to be moved into this run's archive.
    pub fn declare_output(&mut self, path: impl Into<PathBuf>) {
        self.outputs.push(path.into());
    }

    /// Files declared so far, in declaration order.
    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    pub(crate) fn into_outputs(self) -> Vec<PathBuf> {
        self.outputs
    }
}

/// A unit of work producing files to back up.
///
/// The run waits for the returned future before starting the next task.
#[async_trait]
pub trait BackupTask: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    async fn run(&self, ctx: &mut TaskContext) -> Result<()>;
}

/// A synchronous closure adapted into a [`BackupTask`].
pub struct FnTask<F> {
    name: String,
    func: F,
}

/// Wraps a closure as a task.
///
/// ```
/// use bkcron::task::task_fn;
///
/// let task = task_fn("hello", |ctx| {
///     let file = ctx.backup_root().join("hello.txt");
///     std::fs::write(&file, "hello")?;
///     ctx.declare_output(file);
///     Ok(())
/// });
/// # let _ = task;
/// ```
pub fn task_fn<F>(name: impl Into<String>, func: F) -> FnTask<F>
where
    F: Fn(&mut TaskContext) -> Result<()> + Send + Sync,
{
    FnTask {
        name: name.into(),
        func,
    }
}

#[async_trait]
impl<F> BackupTask for FnTask<F>
where
    F: Fn(&mut TaskContext) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut TaskContext) -> Result<()> {
        (self.func)(ctx)
    }
}

/// Something that contributes tasks to the registry at startup.
pub trait TaskDefinition {
    fn name(&self) -> &str;

    fn define(&self, registrar: &mut TaskRegistrar) -> Result<()>;
}

/// Collects tasks while definitions run. Consumed by [`TaskRegistrar::finish`].
#[derive(Default)]
pub struct TaskRegistrar {
    tasks: Vec<Arc<dyn BackupTask>>,
}

impl TaskRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task. Registration order is execution order.
    pub fn register(&mut self, task: impl BackupTask + 'static) {
        debug!(task = task.name(), "Registered backup task");
        self.tasks.push(Arc::new(task));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Freezes the registered tasks.
    ///
    /// # Errors
    /// Returns [`InitError::NoTasks`] if nothing was registered.
    pub fn finish(self) -> Result<TaskRegistry, InitError> {
        if self.tasks.is_empty() {
            warn!("No task found for the backup process");
            return Err(InitError::NoTasks);
        }
        Ok(TaskRegistry {
            tasks: self.tasks.into(),
        })
    }
}

/// The frozen, ordered set of tasks executed by every run.
#[derive(Clone)]
pub struct TaskRegistry {
    tasks: Arc<[Arc<dyn BackupTask>]>,
}

impl TaskRegistry {
    /// Runs every definition in order and freezes what they registered.
    ///
    /// # Errors
    /// Fails if a definition fails or if no task at all was registered.
    pub fn build<'a, I>(definitions: I) -> Result<Self, InitError>
    where
        I: IntoIterator<Item = &'a dyn TaskDefinition>,
    {
        let mut registrar = TaskRegistrar::new();
        for definition in definitions {
            let before = registrar.len();
            definition
                .define(&mut registrar)
                .map_err(|source| InitError::Definition {
                    name: definition.name().to_string(),
                    source,
                })?;
            debug!(
                definition = definition.name(),
                tasks = registrar.len() - before,
                "Loaded task definition"
            );
        }
        registrar.finish()
    }

    pub fn list(&self) -> &[Arc<dyn BackupTask>] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tasks.iter().map(|t| t.name()))
            .finish()
    }
}
