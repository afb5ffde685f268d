/// Package name.
pub(crate) const PKG_NAME: &str = env!("CARGO_PKG_NAME");
/// Default configuration file name.
pub(crate) const CONFIG_NAME: &str = "config.toml";
/// Environment variable overriding the configuration file location.
pub(crate) const CONFIG_ENV: &str = "BKCRON_CONFIG";
/// Environment variable selecting the log format (`pretty` or `json`).
pub(crate) const LOG_FORMAT_ENV: &str = "BKCRON_LOG_FORMAT";
/// Placeholder substituted with the run date in archive names.
pub(crate) const DATE_PLACEHOLDER: &str = "{date}";
/// `YYYYMMDD-HHMM`
pub(crate) const DATE_FORMAT: &str = "%Y%m%d-%H%M";
/// Extension of every archive.
pub(crate) const ARCHIVE_EXTENSION: &str = ".tar.gz";
/// Prefix of per-run staging directories inside the backup root.
pub(crate) const STAGING_PREFIX: &str = "temp-";
/// Attempts made to create a unique staging directory.
pub(crate) const STAGING_ATTEMPTS: usize = 8;
