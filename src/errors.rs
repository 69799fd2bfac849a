use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which pipeline of a backup attempt produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Dump,
    Packaging,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Dump => f.write_str("dump"),
            Phase::Packaging => f.write_str("packaging"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BackupError {
    // Both pipeline failures share the same user-visible marker; use `phase()`
    // to tell them apart.
    #[error("Dump Failed!\n{0}")]
    Dump(String),

    #[error("Dump Failed!\n{0}")]
    Packaging(String),

    #[error("Pipeline has no stages")]
    EmptyPipeline,

    #[error("Pipeline timed out after {:?}", .after)]
    TimedOut { after: Duration },

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Utility '{name}' not found. Please ensure it is installed and in your PATH, or set it under \"utilities\" in config.json")]
    UtilityNotFound {
        name: String,
        #[source]
        source: which::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// Wraps aggregated stage diagnostics into the failure for `phase`.
    pub fn pipeline_failure(phase: Phase, messages: String) -> Self {
        match phase {
            Phase::Dump => BackupError::Dump(messages),
            Phase::Packaging => BackupError::Packaging(messages),
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            BackupError::Dump(_) => Some(Phase::Dump),
            BackupError::Packaging(_) => Some(Phase::Packaging),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
