// src/compressor/mod.rs
//! Compression hooks for the packaging pipeline.
//!
//! A compressor never runs anything itself. It only hands the packager a
//! filter command and the suffix to append to the archive name.

use crate::errors::{BackupError, Result};
use crate::utils::{Utilities, shell_word};

/// Filter stage plus the extension it adds, e.g. `gzip` and `.gz`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionHook {
    pub command: String,
    pub extension: String,
}

pub trait Compressor: Send + Sync {
    /// Returns the filter to splice into the pipeline, or `None` to skip compression.
    fn compress_with(&self) -> Option<CompressionHook>;
}

fn check_level(level: Option<u8>) -> Result<()> {
    match level {
        Some(level) if !(1..=9).contains(&level) => Err(BackupError::InvalidConfig(format!(
            "compression level must be between 1 and 9, got {}",
            level
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct Gzip {
    utility: String,
    level: Option<u8>,
    rsyncable: bool,
}

impl Gzip {
    pub fn new(utilities: &Utilities, level: Option<u8>, rsyncable: bool) -> Result<Self> {
        check_level(level)?;
        Ok(Self {
            utility: utilities.command("gzip")?,
            level,
            rsyncable,
        })
    }
}

impl Compressor for Gzip {
    fn compress_with(&self) -> Option<CompressionHook> {
        let mut command = self.utility.clone();
        if let Some(level) = self.level {
            command.push_str(&format!(" -{}", level));
        }
        if self.rsyncable {
            command.push_str(" --rsyncable");
        }
        Some(CompressionHook {
            command,
            extension: ".gz".to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Bzip2 {
    utility: String,
    level: Option<u8>,
}

impl Bzip2 {
    pub fn new(utilities: &Utilities, level: Option<u8>) -> Result<Self> {
        check_level(level)?;
        Ok(Self {
            utility: utilities.command("bzip2")?,
            level,
        })
    }
}

impl Compressor for Bzip2 {
    fn compress_with(&self) -> Option<CompressionHook> {
        let command = match self.level {
            Some(level) => format!("{} -{}", self.utility, level),
            None => self.utility.clone(),
        };
        Some(CompressionHook {
            command,
            extension: ".bz2".to_string(),
        })
    }
}

/// Arbitrary filter command, e.g. `xz -T0` with extension `.xz`.
#[derive(Debug, Clone)]
pub struct Custom {
    command: String,
    extension: String,
}

impl Custom {
    pub fn new(command: impl Into<String>, extension: impl Into<String>) -> Result<Self> {
        let command = command.into();
        let mut extension = extension.into();
        if command.trim().is_empty() {
            return Err(BackupError::InvalidConfig(
                "custom compressor requires a command".to_string(),
            ));
        }
        if !extension.is_empty() && !extension.starts_with('.') {
            extension.insert(0, '.');
        }
        if shell_word(&extension) != extension {
            return Err(BackupError::InvalidConfig(format!(
                "custom compressor extension contains unsupported characters: {}",
                extension
            )));
        }
        Ok(Self { command, extension })
    }
}

impl Compressor for Custom {
    fn compress_with(&self) -> Option<CompressionHook> {
        Some(CompressionHook {
            command: self.command.clone(),
            extension: self.extension.clone(),
        })
    }
}
