pub mod logging;

use std::collections::HashMap;
use std::path::PathBuf;
use which::which;

use crate::errors::{BackupError, Result};

/// Resolves logical utility names (`influxd`, `tar`, `gzip`, ...) to executables.
///
/// Entries configured explicitly win; anything else is looked up in `PATH`.
#[derive(Debug, Clone, Default)]
pub struct Utilities {
    overrides: HashMap<String, PathBuf>,
}

impl Utilities {
    /// Adds or replaces the path used for `name`.
    pub fn with(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(name.into(), path.into());
        self
    }

    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        if let Some(path) = self.overrides.get(name) {
            return Ok(path.clone());
        }
        which(name).map_err(|source| BackupError::UtilityNotFound {
            name: name.to_string(),
            source,
        })
    }

    /// Resolves `name` and renders it as a single shell word.
    pub fn command(&self, name: &str) -> Result<String> {
        let path = self.resolve(name)?;
        Ok(shell_word(&path.to_string_lossy()))
    }
}

fn is_plain(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_-./:@%+=,".contains(c)
}

/// Quotes `value` for `sh` only when it contains characters the shell would interpret.
pub fn shell_word(value: &str) -> String {
    if !value.is_empty() && value.chars().all(is_plain) {
        value.to_string()
    } else {
        single_quote(value)
    }
}

/// Always wraps `value` in single quotes, escaping embedded quotes.
pub fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
