// pgbackup-scheduler/src/backup/archive.rs
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tar::Builder;
use tracing::{debug, info, warn};

use super::archive_path_for;
use crate::errors::CompressionFailure;

/// Compresses a raw dump into `<raw_path>.tar.gz` and removes the raw file.
///
/// The archive holds a single entry named after the raw file. The raw file is
/// only removed once the archive has been fully written and flushed; if its
/// removal fails the archive is still returned and the leftover is logged.
/// A partially written archive is removed when compression fails.
pub fn compress(raw_path: &Path) -> Result<PathBuf, CompressionFailure> {
    if !raw_path.is_file() {
        return Err(CompressionFailure::MissingInput(raw_path.to_path_buf()));
    }

    let archive_path = archive_path_for(raw_path);
    info!(
        raw = %raw_path.display(),
        archive = %archive_path.display(),
        "compressing dump"
    );

    if let Err(source) = write_archive(raw_path, &archive_path) {
        if archive_path.exists() {
            if let Err(e) = fs::remove_file(&archive_path) {
                warn!(
                    archive = %archive_path.display(),
                    error = %e,
                    "failed to remove partial archive"
                );
            }
        }
        return Err(CompressionFailure::Io {
            path: raw_path.to_path_buf(),
            source,
        });
    }

    match fs::remove_file(raw_path) {
        Ok(()) => debug!(raw = %raw_path.display(), "removed raw dump"),
        Err(e) => warn!(
            raw = %raw_path.display(),
            error = %e,
            "failed to remove raw dump after compression"
        ),
    }

    Ok(archive_path)
}

fn write_archive(raw_path: &Path, archive_path: &Path) -> io::Result<()> {
    let entry_name = raw_path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "raw dump path has no file name")
    })?;

    let archive_file = File::create(archive_path)?;
    let enc = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = Builder::new(enc);

    tar_builder.append_path_with_name(raw_path, entry_name)?;

    let encoder = tar_builder.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()
}
