// src/config/mod.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backup::DumpTarget;
use crate::backup::influxdb::{InfluxDb, InfluxDbOptions};
use crate::compressor::{Bzip2, Compressor, Custom, Gzip};
use crate::utils::Utilities;

pub const DEFAULT_TMP_PATH: &str = "./databasebackup";

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonInfluxDbOptions {
    pub name: Option<String>,
    pub retention: Option<String>,
    pub host: Option<String>,
    pub shard: Option<u64>,
    pub since: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CompressorConfig {
    Gzip {
        level: Option<u8>,
        #[serde(default)]
        rsyncable: bool,
    },
    Bzip2 {
        level: Option<u8>,
    },
    Custom {
        command: String,
        extension: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub tmp_path: Option<PathBuf>,
    pub trigger: Option<String>,
    pub database_id: Option<String>,
    pub influxdb: Option<JsonInfluxDbOptions>,
    pub compressor: Option<CompressorConfig>,
    pub utilities: Option<HashMap<String, PathBuf>>,
    pub pipeline_timeout_secs: Option<u64>,
    pub verify_archive: Option<bool>,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub tmp_path: PathBuf,
    pub trigger: String,
    pub database_id: Option<String>,
    pub influxdb: InfluxDbOptions,
    pub compressor: Option<CompressorConfig>,
    pub utilities: HashMap<String, PathBuf>,
    pub pipeline_timeout: Option<Duration>,
    pub verify_archive: bool,
}

impl BackupConfig {
    pub fn dump_target(&self) -> DumpTarget {
        DumpTarget::for_trigger(
            &self.tmp_path,
            &self.trigger,
            InfluxDb::NAME,
            self.database_id.as_deref(),
        )
    }

    pub fn utilities(&self) -> Utilities {
        self.utilities
            .iter()
            .fold(Utilities::default(), |utilities, (name, path)| {
                utilities.with(name.clone(), path.clone())
            })
    }

    /// `None` means the archive is written as plain tar.
    pub fn build_compressor(
        &self,
        utilities: &Utilities,
    ) -> crate::errors::Result<Option<Box<dyn Compressor>>> {
        let compressor: Box<dyn Compressor> = match &self.compressor {
            None => return Ok(None),
            Some(CompressorConfig::Gzip { level, rsyncable }) => {
                Box::new(Gzip::new(utilities, *level, *rsyncable)?)
            }
            Some(CompressorConfig::Bzip2 { level }) => Box::new(Bzip2::new(utilities, *level)?),
            Some(CompressorConfig::Custom { command, extension }) => {
                Box::new(Custom::new(command.clone(), extension.clone())?)
            }
        };
        Ok(Some(compressor))
    }

    /// Logical names of every external tool this configuration will invoke.
    pub fn required_utilities(&self) -> Vec<&'static str> {
        let mut names = vec!["influxd", "tar", "cat"];
        match &self.compressor {
            Some(CompressorConfig::Gzip { .. }) => names.push("gzip"),
            Some(CompressorConfig::Bzip2 { .. }) => names.push("bzip2"),
            Some(CompressorConfig::Custom { .. }) | None => {}
        }
        names
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub raw_json_config: RawJsonConfig,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content)
            .with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?;

        Ok(AppConfig { raw_json_config })
    }
}

pub fn load_backup_config_from_json(raw_config: &RawJsonConfig) -> Result<BackupConfig> {
    let trigger = raw_config
        .trigger
        .as_ref()
        .context("trigger must be set in config.json for backup")?
        .trim()
        .to_string();
    if trigger.is_empty() || trigger.contains('/') {
        return Err(anyhow::anyhow!(
            "trigger in config.json must be a non-empty name without '/'."
        ));
    }

    let tmp_path = raw_config
        .tmp_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TMP_PATH));
    if tmp_path.to_string_lossy().is_empty() {
        return Err(anyhow::anyhow!("tmp_path cannot be empty in config.json."));
    }

    let database_id = raw_config
        .database_id
        .as_ref()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    let pipeline_timeout = match raw_config.pipeline_timeout_secs {
        Some(0) => {
            return Err(anyhow::anyhow!(
                "pipeline_timeout_secs must be greater than zero; omit it to disable the timeout."
            ));
        }
        Some(secs) => Some(Duration::from_secs(secs)),
        None => None,
    };

    Ok(BackupConfig {
        tmp_path,
        trigger,
        database_id,
        influxdb: parse_influxdb_options(raw_config.influxdb.as_ref())?,
        compressor: raw_config.compressor.clone(),
        utilities: raw_config.utilities.clone().unwrap_or_default(),
        pipeline_timeout,
        verify_archive: raw_config.verify_archive.unwrap_or(false),
    })
}

/// Empty strings are treated as unset so they never turn into bare flags.
fn parse_influxdb_options(raw: Option<&JsonInfluxDbOptions>) -> Result<InfluxDbOptions> {
    let Some(raw) = raw else {
        return Ok(InfluxDbOptions::default());
    };
    let non_empty = |value: &Option<String>| {
        value
            .as_ref()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let since = match non_empty(&raw.since) {
        Some(since) => Some(
            DateTime::parse_from_rfc3339(&since)
                .with_context(|| {
                    format!(
                        "influxdb.since must be an RFC3339 timestamp (e.g. 2015-12-24T08:12:23Z), got '{}'",
                        since
                    )
                })?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    Ok(InfluxDbOptions {
        name: non_empty(&raw.name),
        retention: non_empty(&raw.retention),
        host: non_empty(&raw.host),
        shard: raw.shard,
        since,
    })
}
