//! Filesystem layer extraction.
//!
//! Each image is composed of ordered gzip-compressed tar layers. Layers are
//! unpacked one after the other into the same directory, so a later layer
//! overwrites whatever an earlier one left at the same path.
//!
//! Only directories, regular files, and symbolic links are materialized.
//! Every other entry type is skipped. Symlink targets are written verbatim
//! and are not checked against the extraction root.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, BufReader};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use imagevol_common::error::{ImagevolError, Result};
use tar::EntryType;

/// Summary of a single extracted layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedLayer {
    /// Size of the compressed archive in bytes.
    pub size_bytes: u64,
    /// Number of entries written to the target.
    pub entries: usize,
    /// Number of entries skipped (unsupported type or unsafe path).
    pub skipped: usize,
}

/// Unpacks a gzip-compressed tar archive into `target`.
///
/// The target directory is created if missing. Extraction stops at the first
/// read, decompression, or I/O error; anything written before that point is
/// left in place and must be treated as unusable by the caller.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or decompressed, or if an
/// entry cannot be written.
pub fn extract_layer(archive_path: &Path, target: &Path) -> Result<ExtractedLayer> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting layer"
    );

    fs::create_dir_all(target).map_err(ImagevolError::io_at(target))?;

    let file = File::open(archive_path).map_err(ImagevolError::io_at(archive_path))?;
    let size_bytes = file
        .metadata()
        .map_err(ImagevolError::io_at(archive_path))?
        .len();

    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut summary = ExtractedLayer {
        size_bytes,
        ..ExtractedLayer::default()
    };

    let entries = archive
        .entries()
        .map_err(ImagevolError::io_at(archive_path))?;
    for entry in entries {
        let mut entry = entry.map_err(ImagevolError::io_at(archive_path))?;
        let raw_path = entry
            .path()
            .map_err(ImagevolError::io_at(archive_path))?
            .into_owned();

        let Some(relative) = sanitize_entry_path(&raw_path) else {
            tracing::warn!(entry = %raw_path.display(), "skipping entry escaping the layer root");
            summary.skipped += 1;
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let dest = target.join(&relative);
        let mode = entry
            .header()
            .mode()
            .map_err(ImagevolError::io_at(archive_path))?
            & 0o7777;

        match entry.header().entry_type() {
            EntryType::Directory => create_directory(&dest, mode)?,
            EntryType::Regular | EntryType::Continuous => {
                write_regular_file(&mut entry, &dest, mode)?;
            }
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .map_err(ImagevolError::io_at(archive_path))?
                    .ok_or_else(|| ImagevolError::Io {
                        path: dest.clone(),
                        source: io::Error::new(
                            io::ErrorKind::InvalidData,
                            "symlink entry without a target",
                        ),
                    })?
                    .into_owned();
                create_symlink(&link, &dest)?;
            }
            other => {
                tracing::debug!(entry = %raw_path.display(), kind = ?other, "unhandled tar entry type");
                summary.skipped += 1;
                continue;
            }
        }
        summary.entries += 1;
    }

    tracing::info!(
        archive = %archive_path.display(),
        entries = summary.entries,
        skipped = summary.skipped,
        size = size_bytes,
        "layer extracted"
    );
    Ok(summary)
}

/// Turns an archive path into a path relative to the extraction root.
///
/// Leading `/` and `.` components are dropped. Returns `None` for paths
/// containing `..` or platform prefixes.
fn sanitize_entry_path(path: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(relative)
}

/// Creates a directory (and missing parents) and applies `mode` to it.
fn create_directory(dest: &Path, mode: u32) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(dest) {
        if !meta.is_dir() {
            fs::remove_file(dest).map_err(ImagevolError::io_at(dest))?;
        }
    }
    fs::create_dir_all(dest).map_err(ImagevolError::io_at(dest))?;
    fs::set_permissions(dest, Permissions::from_mode(mode)).map_err(ImagevolError::io_at(dest))
}

/// Writes a regular file entry, truncating any file already at `dest` and
/// replacing a directory or symlink.
fn write_regular_file(reader: &mut impl io::Read, dest: &Path, mode: u32) -> Result<()> {
    ensure_parent(dest)?;
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(dest).map_err(ImagevolError::io_at(dest))?;
        }
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(dest).map_err(ImagevolError::io_at(dest))?;
        }
        _ => {}
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(dest)
        .map_err(ImagevolError::io_at(dest))?;
    let _ = io::copy(reader, &mut file).map_err(ImagevolError::io_at(dest))?;
    file.set_permissions(Permissions::from_mode(mode))
        .map_err(ImagevolError::io_at(dest))
}

/// Creates a symlink at `dest` pointing at `link`, replacing whatever is there.
fn create_symlink(link: &Path, dest: &Path) -> Result<()> {
    ensure_parent(dest)?;
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(dest).map_err(ImagevolError::io_at(dest))?;
        }
        Ok(_) => fs::remove_file(dest).map_err(ImagevolError::io_at(dest))?,
        Err(_) => {}
    }
    std::os::unix::fs::symlink(link, dest).map_err(ImagevolError::io_at(dest))
}

fn ensure_parent(dest: &Path) -> Result<()> {
    match dest.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(ImagevolError::io_at(parent)),
        None => Ok(()),
    }
}
