pub(crate) mod archive;  // Reading back produced archives
pub(crate) mod influxdb; // influxd backup adapter
pub(crate) mod package;  // tar (+ compressor) packaging pipeline

use anyhow::Context;
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::BackupConfig;
use crate::errors::Result;
use crate::pipeline::RunOptions;
use influxdb::InfluxDb;
use package::Packager;

/// Where one adapter stages its dump and writes its archive.
///
/// Raw dump output goes to `<dump_path>/<dump_filename>/`, the archive to
/// `<dump_path>/<dump_filename>.tar[<suffix>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpTarget {
    dump_path: PathBuf,
    dump_filename: String,
}

impl DumpTarget {
    pub fn new(dump_path: impl Into<PathBuf>, dump_filename: impl Into<String>) -> Self {
        Self {
            dump_path: dump_path.into(),
            dump_filename: dump_filename.into(),
        }
    }

    /// `<tmp_path>/<trigger>/databases/<AdapterName>[-<database_id>]`
    pub fn for_trigger(
        tmp_path: &Path,
        trigger: &str,
        adapter_name: &str,
        database_id: Option<&str>,
    ) -> Self {
        let dump_filename = match database_id {
            Some(id) => format!("{}-{}", adapter_name, sanitize_database_id(id)),
            None => adapter_name.to_string(),
        };
        Self::new(tmp_path.join(trigger).join("databases"), dump_filename)
    }

    pub fn dump_path(&self) -> &Path {
        &self.dump_path
    }

    pub fn dump_filename(&self) -> &str {
        &self.dump_filename
    }

    pub fn staging_path(&self) -> PathBuf {
        self.dump_path.join(&self.dump_filename)
    }

    pub fn archive_path(&self, extension: &str) -> PathBuf {
        self.dump_path.join(format!("{}.{}", self.dump_filename, extension))
    }
}

/// Replaces every non-word character so the id is safe inside a file name.
pub fn sanitize_database_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// A database-specific dump tool that fills a staging directory.
pub trait DatabaseAdapter {
    /// Name used in log events, e.g. `InfluxDB-primary`.
    fn label(&self) -> String {
        self.archive_name().to_string()
    }

    fn target(&self) -> &DumpTarget;

    fn staging_path(&self) -> PathBuf {
        self.target().staging_path()
    }

    fn archive_name(&self) -> &str {
        self.target().dump_filename()
    }

    /// Writes the raw dump into `staging_path()`. Must only return once every file is closed.
    async fn dump(&self, options: &RunOptions) -> Result<()>;
}

/// Dump, then package. Returns the archive path.
///
/// The staging directory is removed only after packaging succeeds; any
/// failure leaves it in place.
pub async fn perform<A: DatabaseAdapter>(
    adapter: &A,
    packager: &Packager,
    options: &RunOptions,
) -> Result<PathBuf> {
    let label = adapter.label();
    info!(database = %label, "Started");

    prepare(adapter).await?;
    adapter.dump(options).await?;

    let (files, bytes) = staged_contents(&adapter.staging_path());
    info!(database = %label, files, bytes, "Dump complete, packaging");

    let archive = packager.package(adapter.target(), options).await?;
    info!(database = %label, archive = %archive.display(), "Finished!");
    Ok(archive)
}

/// Gives the dump an empty staging directory.
///
/// Leftovers of an earlier failed attempt are moved aside, not deleted, so they
/// never end up in the new archive.
async fn prepare<A: DatabaseAdapter>(adapter: &A) -> Result<()> {
    let staging = adapter.staging_path();
    if is_non_empty_dir(&staging).await? {
        let target = adapter.target();
        let aside = target.dump_path().join(format!(
            "{}.failed-{}",
            target.dump_filename(),
            Local::now().format("%Y-%m-%d_%H_%M_%S")
        ));
        tokio::fs::rename(&staging, &aside).await?;
        warn!(
            staging = %staging.display(),
            moved_to = %aside.display(),
            "Staging directory left by a failed attempt was moved aside"
        );
    }
    tokio::fs::create_dir_all(&staging).await?;
    Ok(())
}

async fn is_non_empty_dir(path: &Path) -> Result<bool> {
    if !path.is_dir() {
        return Ok(false);
    }
    let mut entries = tokio::fs::read_dir(path).await?;
    Ok(entries.next_entry().await?.is_some())
}

/// Number of files and total bytes below `dir`.
fn staged_contents(dir: &Path) -> (usize, u64) {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .fold((0, 0), |(files, bytes), entry| {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            (files + 1, bytes + size)
        })
}

/// Public entry point for the backup process.
pub async fn run_backup_flow(backup_config: &BackupConfig) -> anyhow::Result<()> {
    let utilities = backup_config.utilities();
    let compressor = backup_config
        .build_compressor(&utilities)
        .context("Failed to set up compressor")?;
    let packager = Packager::new(&utilities, compressor).context("Failed to set up packaging")?;
    let adapter = InfluxDb::new(
        backup_config.influxdb.clone(),
        backup_config.dump_target(),
        &utilities,
    )
    .context("Failed to set up InfluxDB adapter")?;

    let options = RunOptions {
        timeout: backup_config.pipeline_timeout,
        cancel: CancellationToken::new(),
    };
    let interrupt = {
        let cancel = options.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping running pipeline");
                cancel.cancel();
            }
        })
    };

    let result = adapter.perform(&packager, &options).await;
    interrupt.abort();
    let archive_path = result.context("InfluxDB backup failed")?;

    if backup_config.verify_archive {
        if archive::is_supported(&archive_path) {
            let entries = archive::list_entries(&archive_path)?;
            info!(archive = %archive_path.display(), entries = entries.len(), "Archive verified");
        } else {
            warn!(archive = %archive_path.display(), "Archive format cannot be verified, skipping");
        }
    }

    println!("📦 Backup archive written to {}", archive_path.display());
    Ok(())
}
