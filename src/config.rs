//! Configuration for this application.
//!
//! Settings are read from a TOML file and then overridden by `BACKUP_*`
//! environment variables. A missing file is not an error: every setting has a
//! default, and jobs can be supplied by the embedding application instead.

use crate::constants::{CONFIG_ENV, CONFIG_NAME, PKG_NAME};
use crate::error::ConfigError;
use crate::export::ExportSettings;
use crate::job::Job;
use crate::name::ArchiveName;
use crate::remote::RemoteTarget;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Raw configuration, as found in the config file.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Master switch. A disabled scheduler never starts.
    pub enabled: bool,
    /// Hour of the day (0-23) of the daily run.
    pub hour: u32,
    /// Archives to retain locally and remotely, `0` for unlimited.
    pub keep: usize,
    /// Archive name template, must contain `{date}`.
    pub name: String,
    /// Directory holding the archives.
    pub backup_root: PathBuf,
    /// Ship every archive to `server`.
    pub export: bool,
    /// `[user[:password]@]host[:port]:path`
    pub server: Option<String>,
    pub delete_local_after_export: bool,
    /// Private key passed to `ssh -i`.
    pub identity_file: Option<PathBuf>,
    pub jobs: Vec<Job>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 3,
            keep: 30,
            name: "backup-{date}".to_string(),
            backup_root: PathBuf::from("backup"),
            export: false,
            server: None,
            delete_local_after_export: false,
            identity_file: None,
            jobs: vec![],
        }
    }
}

impl Config {
    /// Loads `path` (if it exists) and applies the process environment on top.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read(path)?;
        config.apply_env(env::vars())?;
        Ok(config)
    }

    /// Reads the config file, falling back to defaults when it does not exist.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let toml_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&toml_str).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies the `BACKUP_*` variables found in `vars`.
    ///
    /// `BACKUP` enables the scheduler only when it is `true`, `BACKUP_EXPORT` enables
    /// export only when it is `true`, and `BACKUP_KEEP_LOCAL=false` removes the local
    /// archive after a successful export.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "BACKUP" => self.enabled = value == "true",
                "BACKUP_HOUR" => self.hour = parse_number(&key, &value)?,
                "BACKUP_KEEP_DAYS" => self.keep = parse_number(&key, &value)?,
                "BACKUP_NAME" => self.name = value,
                "BACKUP_PATH" => self.backup_root = PathBuf::from(value),
                "BACKUP_EXPORT" => self.export = value == "true",
                "BACKUP_SERVER" => self.server = Some(value),
                "BACKUP_KEEP_LOCAL" => self.delete_local_after_export = value == "false",
                _ => {}
            }
        }
        Ok(())
    }

    /// Validates the configuration and resolves it into [`Settings`].
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        if self.hour > 23 {
            return Err(ConfigError::Invalid(format!(
                "hour must be between 0 and 23, got {}",
                self.hour
            )));
        }
        let name = ArchiveName::parse(&self.name)?;
        let export = if self.export {
            let server = self.server.as_deref().ok_or_else(|| {
                ConfigError::Invalid("export is enabled but no server is configured".into())
            })?;
            Some(ExportSettings {
                target: RemoteTarget::parse(server)?,
                keep: self.keep,
                delete_local: self.delete_local_after_export,
            })
        } else {
            None
        };
        let backup_root = if self.backup_root.is_absolute() {
            self.backup_root.clone()
        } else {
            env::current_dir()
                .map_err(|e| ConfigError::Invalid(format!("cannot resolve backup root: {e}")))?
                .join(&self.backup_root)
        };

        Ok(Settings {
            enabled: self.enabled,
            hour: self.hour,
            keep: self.keep,
            name,
            backup_root,
            export,
            identity_file: self.identity_file.clone(),
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be a non-negative integer, got '{value}'")))
}

/// Validated settings used by the engine.
#[derive(Debug, Clone)]
pub struct Settings {
    pub enabled: bool,
    pub hour: u32,
    pub keep: usize,
    pub name: ArchiveName,
    /// Always absolute.
    pub backup_root: PathBuf,
    pub export: Option<ExportSettings>,
    pub identity_file: Option<PathBuf>,
}

/// Returns the configuration file path: `$BKCRON_CONFIG`, or the platform config directory.
pub fn config_file() -> PathBuf {
    match env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_dir().join(CONFIG_NAME),
    }
}

/// Returns the configuration directory for the application, platform-specific.
#[cfg(not(target_os = "macos"))]
fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PKG_NAME)
}

/// Returns the configuration directory for the application, platform-specific.
#[cfg(target_os = "macos")]
fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(PKG_NAME)
}
