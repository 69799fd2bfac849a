// src/backup/influxdb.rs
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::PathBuf;
use tracing::debug;

use super::package::Packager;
use super::{DatabaseAdapter, DumpTarget};
use crate::errors::{Phase, Result};
use crate::pipeline::{Pipeline, RunOptions};
use crate::utils::{Utilities, shell_word};

/// Flags passed to `influxd backup`. Every field is optional; unset fields emit nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfluxDbOptions {
    /// Database to dump. Without it only the metastore is backed up.
    pub name: Option<String>,
    /// Single retention policy; all policies when unset.
    pub retention: Option<String>,
    pub host: Option<String>,
    /// Single shard ID; all shards when unset.
    pub shard: Option<u64>,
    /// Only data written after this instant.
    pub since: Option<DateTime<Utc>>,
}

pub struct InfluxDb {
    options: InfluxDbOptions,
    target: DumpTarget,
    utility: String,
}

impl InfluxDb {
    pub const NAME: &'static str = "InfluxDB";

    pub fn new(options: InfluxDbOptions, target: DumpTarget, utilities: &Utilities) -> Result<Self> {
        Ok(Self {
            options,
            target,
            utility: utilities.command("influxd")?,
        })
    }

    /// `influxd backup [database flags] [-host H] <staging>`
    pub fn dump_command(&self) -> String {
        let mut parts = vec![self.utility.clone(), "backup".to_string()];
        parts.extend(self.database_options());
        parts.extend(self.connectivity_options());
        parts.push(shell_word(&self.staging_path().to_string_lossy()));
        parts.join(" ")
    }

    fn database_options(&self) -> Vec<String> {
        let mut opts = Vec::new();
        if let Some(name) = &self.options.name {
            opts.push(format!("-database {}", shell_word(name)));
        }
        if let Some(shard) = self.options.shard {
            opts.push(format!("-shard {}", shard));
        }
        if let Some(retention) = &self.options.retention {
            opts.push(format!("-retention {}", shell_word(retention)));
        }
        if let Some(since) = &self.options.since {
            opts.push(format!("-since {}", since.to_rfc3339_opts(SecondsFormat::AutoSi, true)));
        }
        opts
    }

    fn connectivity_options(&self) -> Vec<String> {
        self.options
            .host
            .iter()
            .map(|host| format!("-host {}", shell_word(host)))
            .collect()
    }

    /// Dumps, packages, and cleans up. Returns the archive path.
    pub async fn perform(&self, packager: &Packager, options: &RunOptions) -> Result<PathBuf> {
        super::perform(self, packager, options).await
    }
}

impl DatabaseAdapter for InfluxDb {
    fn target(&self) -> &DumpTarget {
        &self.target
    }

    async fn dump(&self, options: &RunOptions) -> Result<()> {
        let mut pipeline = Pipeline::new();
        pipeline.push(self.dump_command());

        debug!(
            dump_path = %self.target.dump_path().display(),
            dump_filename = self.target.dump_filename(),
            "Running influxd backup"
        );
        let result = pipeline.run(options).await?.ensure_success(Phase::Dump)?;
        let output = String::from_utf8_lossy(result.stdout());
        if !output.trim().is_empty() {
            debug!(output = %output.trim_end(), "influxd backup output");
        }
        Ok(())
    }
}
