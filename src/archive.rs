//! Batch staging and compression into deliverable bundles.

use crate::error::BundleError;
use crate::types::{Batch, Bundle};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Extension of produced bundles.
pub const BUNDLE_EXTENSION: &str = "tar.gz";

/// Name of the staging directory for batch `index`.
pub fn staging_dir_name(index: usize) -> String {
    format!("Folder_{}", index)
}

/// Delivery caption for a bundle.
pub fn bundle_caption(index: usize, member_count: usize) -> String {
    format!("Folder {} - {} files", index, member_count)
}

/// Picks a name for `name` that is not yet in `used`, adding ` (n)` if needed.
fn unique_member_name(used: &mut HashSet<String>, name: &str) -> String {
    let mut candidate = name.to_string();
    let mut n = 1;
    while used.contains(&candidate) {
        let path = Path::new(name);
        candidate = match (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|e| e.to_str()),
        ) {
            (Some(stem), Some(ext)) => format!("{} ({}).{}", stem, n, ext),
            _ => format!("{} ({})", name, n),
        };
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}

/// Writes `members` into a gzip-compressed tar at `archive_path`.
///
/// Entries are stored flat, under their file names, in the given order.
fn write_tar_gz(archive_path: &Path, members: &[PathBuf]) -> io::Result<()> {
    let file = std::fs::File::create(archive_path)?;
    let encoder = GzEncoder::new(io::BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.mode(tar::HeaderMode::Deterministic);

    for member in members {
        let name = member.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", member.display()),
            )
        })?;
        builder.append_path_with_name(member, name)?;
    }

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    Ok(())
}

/// Stages a batch under `work_dir/Folder_{index}` and compresses it into
/// `work_dir/Folder_{index}.tar.gz`.
///
/// The staging directory is reused if it exists, and the source files are
/// copied, not moved. Running this twice on the same batch yields a bundle with
/// the same member count and caption.
pub async fn archive_batch(batch: &Batch, work_dir: &Path) -> Result<Bundle, BundleError> {
    let index = batch.index;
    let fail = |reason: String| BundleError::Archive { index, reason };

    let dir_name = staging_dir_name(index);
    let staging_dir = work_dir.join(&dir_name);
    tokio::fs::create_dir_all(&staging_dir)
        .await
        .map_err(|e| fail(format!("creating {}: {}", staging_dir.display(), e)))?;

    let mut used_names = HashSet::new();
    let mut staged = Vec::with_capacity(batch.len());
    for file in &batch.files {
        let name = file
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| fail(format!("{} has no usable file name", file.path.display())))?;
        let target = staging_dir.join(unique_member_name(&mut used_names, name));
        tokio::fs::copy(&file.path, &target)
            .await
            .map_err(|e| fail(format!("copying {}: {}", file.path.display(), e)))?;
        staged.push(target);
    }

    let archive_path = work_dir.join(format!("{}.{}", dir_name, BUNDLE_EXTENSION));
    let output = archive_path.clone();
    tokio::task::spawn_blocking(move || write_tar_gz(&output, &staged))
        .await
        .map_err(|e| fail(format!("task join error: {}", e)))?
        .map_err(|e| fail(format!("compressing {}: {}", archive_path.display(), e)))?;

    let member_count = batch.len();
    info!(
        "📦 Archived folder {} ({} files, {} bytes) -> {}",
        index,
        member_count,
        batch.total_size(),
        archive_path.display()
    );

    Ok(Bundle {
        index,
        archive_path,
        member_count,
        caption: bundle_caption(index, member_count),
    })
}
