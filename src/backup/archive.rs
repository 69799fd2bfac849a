// src/backup/archive.rs
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

fn is_gzip(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

/// Whether `list_entries` can read the archive at `path`.
pub fn is_supported(path: &Path) -> bool {
    is_gzip(path) || path.extension().is_some_and(|ext| ext == "tar")
}

/// Lists the entry paths of a `.tar` or `.tar.gz` archive.
///
/// Reads the whole archive, so a truncated or corrupt file is reported as an error.
pub fn list_entries(archive_path: &Path) -> Result<Vec<PathBuf>> {
    if !archive_path.is_file() {
        return Err(anyhow::anyhow!(
            "Archive for verification is not a file: {}",
            archive_path.display()
        ));
    }
    if !is_supported(archive_path) {
        return Err(anyhow::anyhow!(
            "Unsupported archive format: {}",
            archive_path.display()
        ));
    }

    let archive_file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive file: {}", archive_path.display()))?;
    let reader: Box<dyn Read> = if is_gzip(archive_path) {
        Box::new(GzDecoder::new(archive_file))
    } else {
        Box::new(archive_file)
    };
    let mut archive = tar::Archive::new(reader);

    let mut entries = Vec::new();
    for entry in archive
        .entries()
        .with_context(|| format!("Failed to read archive: {}", archive_path.display()))?
    {
        let mut entry = entry
            .with_context(|| format!("Corrupt entry in archive: {}", archive_path.display()))?;
        entries.push(entry.path()?.into_owned());
        // Drain the body so the checksum of the following header is validated.
        std::io::copy(&mut entry, &mut std::io::sink())?;
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::fs;

    fn write_archive(path: &Path, gzip: bool) -> anyhow::Result<()> {
        let file = File::create(path)?;
        let data = b"points";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        if gzip {
            let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
            builder.append_data(&mut header, "InfluxDB/meta.00", &data[..])?;
            builder.into_inner()?.finish()?;
        } else {
            let mut builder = tar::Builder::new(file);
            builder.append_data(&mut header, "InfluxDB/meta.00", &data[..])?;
            builder.finish()?;
        }
        Ok(())
    }

    #[test]
    fn test_lists_plain_and_gzip_archives() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let plain = dir.path().join("InfluxDB.tar");
        let gz = dir.path().join("InfluxDB.tar.gz");
        write_archive(&plain, false)?;
        write_archive(&gz, true)?;

        assert_eq!(list_entries(&plain)?, vec![PathBuf::from("InfluxDB/meta.00")]);
        assert_eq!(list_entries(&gz)?, vec![PathBuf::from("InfluxDB/meta.00")]);
        Ok(())
    }

    #[test]
    fn test_rejects_unsupported_and_missing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let bz = dir.path().join("InfluxDB.tar.bz2");
        fs::write(&bz, b"not really bzip2")?;

        assert!(!is_supported(&bz));
        assert!(list_entries(&bz).is_err());
        assert!(list_entries(&dir.path().join("missing.tar")).is_err());
        Ok(())
    }

    #[test]
    fn test_corrupt_gzip_is_an_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let gz = dir.path().join("InfluxDB.tar.gz");
        fs::write(&gz, b"garbage that is not gzip")?;

        assert!(list_entries(&gz).is_err());
        Ok(())
    }
}
