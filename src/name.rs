//! Archive naming.
//!
//! Archives are named from a template holding a `{date}` placeholder. The
//! substituted date is `YYYYMMDD-HHMM`, which sorts lexicographically in
//! chronological order, so retention can rely on plain string ordering.

use crate::constants::{ARCHIVE_EXTENSION, DATE_FORMAT, DATE_PLACEHOLDER};
use crate::error::ConfigError;
use chrono::NaiveDateTime;

/// A validated archive name template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    template: String,
}

impl ArchiveName {
    /// Parses a name template. `.tar.gz` is appended unless the template already ends with it.
    ///
    /// # Errors
    /// Returns an error if the template has no `{date}` placeholder or contains a path separator.
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        if !template.contains(DATE_PLACEHOLDER) {
            return Err(ConfigError::Invalid(format!(
                "archive name '{template}' must contain the {DATE_PLACEHOLDER} placeholder"
            )));
        }
        if template.contains('/') || template.contains('\\') {
            return Err(ConfigError::Invalid(format!(
                "archive name '{template}' must not contain a path separator"
            )));
        }
        let template = if template.ends_with(ARCHIVE_EXTENSION) {
            template.to_string()
        } else {
            format!("{template}{ARCHIVE_EXTENSION}")
        };
        Ok(Self { template })
    }

    /// The full template, extension included.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Renders the file name of the archive for a run started at `started_at`.
    pub fn render(&self, started_at: NaiveDateTime) -> String {
        let date = started_at.format(DATE_FORMAT).to_string();
        self.template.replace(DATE_PLACEHOLDER, &date)
    }

    /// Returns true if `file_name` could have been produced by this template.
    pub fn matches(&self, file_name: &str) -> bool {
        let (prefix, suffix) = self.affixes();
        file_name.len() >= prefix.len() + suffix.len()
            && file_name.starts_with(prefix)
            && file_name.ends_with(suffix)
    }

    /// Text before the first placeholder and after the last one.
    fn affixes(&self) -> (&str, &str) {
        let first = self.template.find(DATE_PLACEHOLDER).unwrap_or(0);
        let last = self
            .template
            .rfind(DATE_PLACEHOLDER)
            .map(|i| i + DATE_PLACEHOLDER.len())
            .unwrap_or(self.template.len());
        (&self.template[..first], &self.template[last..])
    }
}
