//! File scanning for upload.
//!
//! Recursively walks a directory and produces a list of files with
//! relative paths normalized to forward slashes. Every path segment must
//! be a legal server-side name.

use std::path::{Path, PathBuf};

use ghs_transfer::{TransferError, check_name_legal};

use crate::error::UploadError;

/// A local file found by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Absolute or caller-relative path on disk.
    pub path: PathBuf,
    /// Path below the scanned root, `/`-separated. For a directory root the
    /// directory name itself is the first component, the way a dropped
    /// folder keeps its name on the server.
    pub relative_path: String,
    pub size: u64,
}

/// Scans `root` and returns the files to upload plus their total size.
///
/// A plain file yields a single entry named by its file name. Entries are
/// sorted by relative path. A name containing `/` or `\` is rejected
/// rather than silently split into directories.
pub fn scan_files_for_upload(root: &Path) -> Result<(Vec<LocalFile>, u64), UploadError> {
    let metadata = std::fs::metadata(root)?;
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut files = Vec::new();
    let mut total_size = 0u64;

    if metadata.is_file() {
        if !check_name_legal(&name) {
            return Err(illegal_name(root));
        }
        total_size = metadata.len();
        files.push(LocalFile {
            path: root.to_path_buf(),
            relative_path: name,
            size: metadata.len(),
        });
        return Ok((files, total_size));
    }

    walk_dir(root, root, &name, &mut files, &mut total_size)?;
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    Ok((files, total_size))
}

fn walk_dir(
    root: &Path,
    current: &Path,
    root_name: &str,
    files: &mut Vec<LocalFile>,
    total_size: &mut u64,
) -> Result<(), UploadError> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            walk_dir(root, &path, root_name, files, total_size)?;
        } else if metadata.is_file() {
            let rel_path = path.strip_prefix(root).map_err(std::io::Error::other)?;

            let mut segments: Vec<String> = Vec::new();
            if !root_name.is_empty() {
                segments.push(root_name.to_string());
            }
            for component in rel_path.components() {
                let segment = component.as_os_str().to_string_lossy();
                if !check_name_legal(&segment) {
                    return Err(illegal_name(&path));
                }
                segments.push(segment.into_owned());
            }
            let relative_path = segments.join("/");

            files.push(LocalFile {
                path,
                relative_path,
                size: metadata.len(),
            });
            *total_size += metadata.len();
        }
    }

    Ok(())
}

fn illegal_name(path: &Path) -> UploadError {
    TransferError::InvalidPath(format!("illegal file name: {}", path.display())).into()
}
