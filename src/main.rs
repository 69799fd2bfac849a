//! InfluxDB Backup Tool
//!
//! Runs `influxd backup` into a staging directory and packages the result
//! into a single tar archive, optionally compressed.

// influxdb-backup/src/main.rs
mod backup;
mod compressor;
mod config;
mod errors;
mod pipeline;
mod utils;

use anyhow::{Context, Result};
use config::{AppConfig, load_backup_config_from_json};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug, PartialEq, Eq)]
enum Operation {
    Backup,
    Check,
    Verify(PathBuf),
}

#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    operation: Operation,
    config_path: PathBuf,
}

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    utils::logging::init();

    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let invocation = parse_args(&args)?;

    match invocation.operation {
        Operation::Backup => {
            println!("🚀 Starting Backup Process...");
            let backup_config = load_config(&invocation.config_path)?;
            backup::run_backup_flow(&backup_config)
                .await
                .context("Backup process failed")?;
        }
        Operation::Check => {
            let backup_config = load_config(&invocation.config_path)?;
            let utilities = backup_config.utilities();
            for name in backup_config.required_utilities() {
                let path = utilities.resolve(name)?;
                println!("✓ {} -> {}", name, path.display());
            }
        }
        Operation::Verify(archive_path) => {
            let entries = backup::archive::list_entries(&archive_path)
                .with_context(|| format!("Failed to verify {}", archive_path.display()))?;
            for entry in &entries {
                println!("{}", entry.display());
            }
            println!("{} entries in {}", entries.len(), archive_path.display());
        }
    }
    Ok(())
}

fn load_config(config_path: &std::path::Path) -> Result<config::BackupConfig> {
    let app_config = AppConfig::load_from_json(config_path).context(format!(
        "Failed to load application configuration from {}",
        config_path.display()
    ))?;
    load_backup_config_from_json(&app_config.raw_json_config)
        .context("Failed to load backup configuration from JSON")
}

/// `[backup|check|verify <archive>] [--config <path>]`; no operation means backup.
fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut operation = None;
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().context("--config requires a path")?;
                config_path = PathBuf::from(path);
            }
            "backup" | "check" | "verify" if operation.is_some() => {
                anyhow::bail!("Only one operation may be given, found extra '{}'", arg);
            }
            "backup" => operation = Some(Operation::Backup),
            "check" => operation = Some(Operation::Check),
            "verify" => {
                let archive = iter.next().context("verify requires an archive path")?;
                operation = Some(Operation::Verify(PathBuf::from(archive)));
            }
            other => {
                println!("❌ Invalid argument '{}'. Use 'backup', 'check' or 'verify <archive>'.", other);
                anyhow::bail!("Invalid operation choice");
            }
        }
    }

    Ok(Invocation {
        operation: operation.unwrap_or(Operation::Backup),
        config_path,
    })
}
