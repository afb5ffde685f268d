//! bkcron: a scheduled backup orchestrator.
//!
//! Backup tasks declare the files they produce, the orchestrator bundles them into
//! one gzip tarball per run, keeps a bounded number of archives and optionally ships
//! each archive to a remote host over SSH. The [`scheduler`] fires a run once a day.

pub mod archive;
pub mod config;
pub mod error;
pub mod export;
pub mod job;
pub mod logging;
pub mod name;
pub mod pipeline;
pub mod remote;
pub mod retention;
pub mod run;
pub mod scheduler;
pub mod sysexits;
pub mod task;

pub(crate) mod constants;
pub(crate) mod file_util;
