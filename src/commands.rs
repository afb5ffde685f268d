//! Command-line interface definition for bkcron.
//!
//! This module defines the CLI commands and the glue between the configuration
//! file and the engine: building the task registry, running the daily scheduler,
//! running a single backup, listing archives and showing the configuration.

use anyhow::{Context, Result};
use bkcron::config::{Config, Settings};
use bkcron::error::{BackupError, InitError};
use bkcron::job::ConfiguredJobs;
use bkcron::remote::SshConnector;
use bkcron::run::{BackupRunner, Orchestrator, RunStatus};
use bkcron::scheduler::{Clock, LocalClock, Scheduler, SchedulerHandle};
use bkcron::task::{TaskDefinition, TaskRegistry};
use bkcron::{retention, sysexits};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tracing::{error, info, warn};

/// Command-line interface definition for bkcron.
#[derive(Parser)]
#[command(version, about, long_about = None)]
pub(crate) struct Cli {
    /// Configuration file. Defaults to `<config dir>/bkcron/config.toml`.
    #[arg(short, long, global = true, env = "BKCRON_CONFIG")]
    pub config: Option<PathBuf>,
    /// Subcommand to execute.
    #[command(subcommand)]
    pub commands: Option<Commands>,
}

/// Supported bkcron commands.
#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Run the daily backup scheduler in the foreground.
    ///
    /// SIGUSR1 starts a backup immediately, SIGTERM or Ctrl-C stops the scheduler.
    Start {
        /// Start a backup right away instead of waiting for the scheduled hour.
        #[arg(long)]
        now: bool,
    },
    /// Run one backup now and exit.
    Run,
    /// List the archives in the backup root, oldest first.
    List,
    /// Display the configuration file path and the effective settings.
    Config,
}

/// Loads and validates the configuration, exiting with `EX_CONFIG` when it is unusable.
fn load(path: &Path) -> (Config, Settings) {
    let loaded = Config::load(path).and_then(|config| {
        let settings = config.settings()?;
        Ok((config, settings))
    });
    loaded.unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(sysexits::EX_CONFIG);
    })
}

/// Builds the task registry from the configured jobs, exiting when there is nothing to run.
fn registry(config: &Config) -> Result<TaskRegistry> {
    let jobs = ConfiguredJobs::new(config.jobs.clone());
    let definitions: [&dyn TaskDefinition; 1] = [&jobs];
    match TaskRegistry::build(definitions) {
        Ok(registry) => Ok(registry),
        Err(InitError::NoTasks) => {
            eprintln!("No task found for the backup process. Add [[jobs]] to the config file.");
            process::exit(sysexits::EX_CONFIG);
        }
        Err(e) => Err(e.into()),
    }
}

fn orchestrator(config: &Config, settings: Settings) -> Result<Orchestrator> {
    let registry = registry(config)?;
    let connector = Arc::new(SshConnector::new(settings.identity_file.clone()));
    Ok(Orchestrator::new(registry, settings, connector))
}

fn runtime() -> Result<Runtime> {
    Ok(Builder::new_multi_thread().enable_all().build()?)
}

/// Runs the scheduler until a shutdown signal arrives.
pub(crate) fn start(path: &Path, now: bool) -> Result<()> {
    let (config, settings) = load(path);
    if !settings.enabled {
        info!("Backup is disabled, the scheduler will not start");
        return Ok(());
    }
    let hour = settings.hour;
    let orchestrator = orchestrator(&config, settings)?;

    runtime()?.block_on(async move {
        let (scheduler, handle) = Scheduler::new(orchestrator, LocalClock, hour);
        let signals = tokio::spawn(forward_signals(handle.clone()));
        if now {
            handle.trigger();
        }
        scheduler.run().await;
        signals.abort();
    });
    Ok(())
}

/// Turns process signals into scheduler commands.
#[cfg(unix)]
async fn forward_signals(handle: SchedulerHandle) {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut usr1, mut term) = match (
        signal(SignalKind::user_defined1()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(usr1), Ok(term)) => (usr1, term),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Failed to install signal handlers");
            return;
        }
    };
    loop {
        tokio::select! {
            _ = usr1.recv() => {
                info!("SIGUSR1 received");
                handle.trigger();
            }
            _ = term.recv() => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    handle.shutdown();
}

/// Turns process signals into scheduler commands.
#[cfg(not(unix))]
async fn forward_signals(handle: SchedulerHandle) {
    let _ = tokio::signal::ctrl_c().await;
    handle.shutdown();
}

/// Runs a single backup and exits with a status reflecting its outcome.
pub(crate) fn run(path: &Path) -> Result<()> {
    let (config, settings) = load(path);
    let orchestrator = orchestrator(&config, settings)?;
    let record = runtime()?.block_on(orchestrator.run(LocalClock.now()));

    match record.status {
        RunStatus::Completed => {
            if let Some(archive) = &record.archive {
                println!("{}", archive.display());
            }
        }
        RunStatus::NothingToArchive => println!("No file to back up."),
        RunStatus::Partial => process::exit(sysexits::EX_TEMPFAIL),
        RunStatus::Errored => {
            let code = match record.error {
                Some(BackupError::Task { .. }) => sysexits::EX_SOFTWARE,
                _ => sysexits::EX_IOERR,
            };
            process::exit(code);
        }
    }
    Ok(())
}

/// Prints the archives of the backup root, oldest first.
pub(crate) fn list(path: &Path) -> Result<()> {
    let (_, settings) = load(path);
    let names = retention::local_archives(&settings.backup_root, &settings.name)
        .with_context(|| format!("Failed to read {:?}", settings.backup_root))?;
    for name in names {
        println!("{}", settings.backup_root.join(name).display());
    }
    Ok(())
}

/// Prints the configuration file path and the effective settings.
pub(crate) fn config(path: &Path) -> Result<()> {
    let (config, settings) = load(path);
    println!("config file: {}", path.display());
    println!("enabled: {}", settings.enabled);
    println!("hour: {}", settings.hour);
    println!("keep: {}", settings.keep);
    println!("name: {}", settings.name.template());
    println!("backup root: {}", settings.backup_root.display());
    match &settings.export {
        Some(export) => {
            println!("export: {}", export.target);
            println!("delete local after export: {}", export.delete_local);
        }
        None => println!("export: disabled"),
    }
    println!("jobs: {}", config.jobs.len());
    for job in &config.jobs {
        println!("  - {}", job.name());
    }
    if config.jobs.is_empty() {
        error!("No task found for the backup process");
    }
    Ok(())
}
