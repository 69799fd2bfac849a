// src/backup/package.rs
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::DumpTarget;
use crate::compressor::Compressor;
use crate::errors::{BackupError, Phase, Result};
use crate::pipeline::{Pipeline, RunOptions, Stage};
use crate::utils::{Utilities, single_quote};

const ARCHIVE_EXTENSION: &str = "tar";

/// Turns a staging directory into a single `.tar[<suffix>]` file.
pub struct Packager {
    tar: String,
    cat: String,
    compressor: Option<Box<dyn Compressor>>,
}

impl Packager {
    pub fn new(utilities: &Utilities, compressor: Option<Box<dyn Compressor>>) -> Result<Self> {
        Ok(Self {
            tar: utilities.command("tar")?,
            cat: utilities.command("cat")?,
            compressor,
        })
    }

    /// Builds `tar | [compressor] | cat > archive` and returns it with the
    /// accumulated extension.
    pub fn pipeline_for(&self, target: &DumpTarget) -> (Pipeline, String) {
        let mut pipeline = Pipeline::new();
        let mut extension = ARCHIVE_EXTENSION.to_string();

        // GNU tar exits 1 when a file changed while being read; the archive is still usable.
        pipeline.push(
            Stage::new(format!(
                "{} -cf - -C {} {}",
                self.tar,
                single_quote(&target.dump_path().to_string_lossy()),
                single_quote(target.dump_filename())
            ))
            .with_success_codes(&[0, 1]),
        );

        if let Some(hook) = self.compressor.as_ref().and_then(|c| c.compress_with()) {
            pipeline.push(hook.command);
            extension.push_str(&hook.extension);
        }

        pipeline.push(format!(
            "{} > {}",
            self.cat,
            single_quote(&target.archive_path(&extension).to_string_lossy())
        ));

        (pipeline, extension)
    }

    /// Archives the staging directory and removes it once the archive is complete.
    pub async fn package(&self, target: &DumpTarget, options: &RunOptions) -> Result<PathBuf> {
        let (pipeline, extension) = self.pipeline_for(target);
        let archive_path = target.archive_path(&extension);
        let staging = target.staging_path();

        info!(
            staging = %staging.display(),
            archive = %archive_path.display(),
            stages = pipeline.stages().len(),
            "Packaging dump"
        );

        // Never hand back a truncated archive; the staging directory stays for inspection.
        let result = match pipeline.run(options).await {
            Ok(result) => result,
            Err(e) => {
                remove_incomplete(&archive_path).await;
                return Err(e);
            }
        };
        if !result.success() {
            remove_incomplete(&archive_path).await;
            return Err(BackupError::pipeline_failure(
                Phase::Packaging,
                result.error_messages(),
            ));
        }

        debug!(stages = result.stages().len(), "Packaging pipeline succeeded, removing staging directory");
        tokio::fs::remove_dir_all(&staging).await?;
        Ok(archive_path)
    }
}

async fn remove_incomplete(archive_path: &Path) {
    if tokio::fs::remove_file(archive_path).await.is_ok() {
        warn!(archive = %archive_path.display(), "Removed incomplete archive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive;
    use crate::compressor::{Custom, Gzip};
    use std::fs;
    use std::time::Duration;

    fn staged_target(root: &Path) -> anyhow::Result<DumpTarget> {
        let target = DumpTarget::for_trigger(root, "nightly", "InfluxDB", None);
        fs::create_dir_all(target.staging_path().join("shards"))?;
        fs::write(target.staging_path().join("meta.00"), b"meta")?;
        fs::write(target.staging_path().join("shards/s1.00"), b"shard data")?;
        Ok(target)
    }

    #[test]
    fn test_pipeline_without_compressor() -> anyhow::Result<()> {
        let utilities = Utilities::default().with("tar", "tar").with("cat", "cat");
        let packager = Packager::new(&utilities, None)?;
        let target = DumpTarget::new("/var/tmp/nightly/databases", "InfluxDB");

        let (pipeline, extension) = packager.pipeline_for(&target);

        assert_eq!(extension, "tar");
        let commands: Vec<&str> = pipeline.stages().iter().map(|s| s.command()).collect();
        assert_eq!(
            commands,
            vec![
                "tar -cf - -C '/var/tmp/nightly/databases' 'InfluxDB'",
                "cat > '/var/tmp/nightly/databases/InfluxDB.tar'",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_pipeline_with_compressor_appends_suffix() -> anyhow::Result<()> {
        let utilities = Utilities::default()
            .with("tar", "tar")
            .with("cat", "cat")
            .with("gzip", "gzip");
        let compressor = Gzip::new(&utilities, Some(9), false)?;
        let packager = Packager::new(&utilities, Some(Box::new(compressor)))?;
        let target = DumpTarget::new("/backups", "InfluxDB-eu");

        let (pipeline, extension) = packager.pipeline_for(&target);

        assert_eq!(extension, "tar.gz");
        assert_eq!(pipeline.stages().len(), 3);
        assert_eq!(pipeline.stages()[1].command(), "gzip -9");
        assert_eq!(pipeline.stages()[2].command(), "cat > '/backups/InfluxDB-eu.tar.gz'");
        Ok(())
    }

    #[tokio::test]
    async fn test_package_writes_tar_and_removes_staging() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = staged_target(dir.path())?;
        let packager = Packager::new(&Utilities::default(), None)?;

        let archive_path = packager.package(&target, &RunOptions::default()).await?;

        assert_eq!(archive_path, target.dump_path().join("InfluxDB.tar"));
        assert!(archive_path.is_file());
        assert!(!target.staging_path().exists());

        let entries = archive::list_entries(&archive_path)?;
        assert!(entries.contains(&Path::new("InfluxDB/meta.00").to_path_buf()));
        assert!(entries.contains(&Path::new("InfluxDB/shards/s1.00").to_path_buf()));
        Ok(())
    }

    #[tokio::test]
    async fn test_package_with_gzip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = staged_target(dir.path())?;
        let utilities = Utilities::default();
        let packager = Packager::new(&utilities, Some(Box::new(Gzip::new(&utilities, None, false)?)))?;

        let archive_path = packager.package(&target, &RunOptions::default()).await?;

        assert_eq!(archive_path, target.dump_path().join("InfluxDB.tar.gz"));
        assert!(!target.staging_path().exists());
        assert!(archive::list_entries(&archive_path)?.contains(&Path::new("InfluxDB/meta.00").to_path_buf()));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_staging_fails_with_archiver_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = DumpTarget::for_trigger(dir.path(), "nightly", "InfluxDB", None);
        fs::create_dir_all(target.dump_path())?;
        let packager = Packager::new(&Utilities::default(), None)?;

        let err = match packager.package(&target, &RunOptions::default()).await {
            Err(e) => e,
            Ok(path) => panic!("expected packaging failure, got {}", path.display()),
        };

        assert_eq!(err.phase(), Some(Phase::Packaging));
        let message = err.to_string();
        assert!(message.starts_with("Dump Failed!\n"));
        assert!(message.contains("tar"));
        assert!(message.contains("InfluxDB"));
        assert!(!target.archive_path("tar").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_compressor_keeps_staging() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = staged_target(dir.path())?;
        let compressor = Custom::new("cat >/dev/null; echo 'compressor exploded' >&2; exit 4", ".boom")?;
        let packager = Packager::new(&Utilities::default(), Some(Box::new(compressor)))?;

        let err = match packager.package(&target, &RunOptions::default()).await {
            Err(e) => e,
            Ok(path) => panic!("expected packaging failure, got {}", path.display()),
        };

        assert!(err.to_string().contains("compressor exploded"));
        assert!(target.staging_path().join("meta.00").is_file());
        assert!(target.staging_path().join("shards/s1.00").is_file());
        assert!(!target.archive_path("tar.boom").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_timed_out_packaging_removes_partial_archive() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = staged_target(dir.path())?;
        // Lets a few bytes through to the archive, then stalls.
        let compressor = Custom::new("head -c 100; sleep 5", ".slow")?;
        let packager = Packager::new(&Utilities::default(), Some(Box::new(compressor)))?;
        let options = RunOptions {
            timeout: Some(Duration::from_millis(500)),
            ..RunOptions::default()
        };

        let result = packager.package(&target, &options).await;

        assert!(matches!(result, Err(BackupError::TimedOut { .. })));
        assert!(!target.archive_path("tar.slow").exists());
        assert!(target.staging_path().join("meta.00").is_file());
        assert!(target.staging_path().join("shards/s1.00").is_file());
        Ok(())
    }
}
