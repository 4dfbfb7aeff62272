use std::path::{Component, Path};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::TransferError;

/// Characters `encodeURIComponent` leaves untouched.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Validates that a relative file path does not escape its base directory.
///
/// Rejects:
/// - Empty paths
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_upload_path(file_path: &str) -> Result<(), TransferError> {
    if file_path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let path = Path::new(file_path);

    if path.is_absolute() || file_path.starts_with('/') {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_path}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_path}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {file_path}"
                )));
            }
            Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {file_path}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

/// Returns `true` if `name` is usable as a single path segment.
pub fn check_name_legal(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\'])
}

/// Joins path parts with `/`, collapsing runs of separators.
pub fn path_join(parts: &[&str]) -> String {
    let joined = parts.join("/");
    let mut out = String::with_capacity(joined.len());
    for c in joined.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Builds the request path of an object.
///
/// `dir` is the destination directory as it appears in the URL (already
/// encoded); `relative` is the local relative path of the file, which is
/// validated and percent-encoded segment by segment.
pub fn object_path(dir: &str, relative: &str) -> Result<String, TransferError> {
    let normalized = relative.replace('\\', "/");
    validate_upload_path(&normalized)?;

    let encoded: Vec<String> = normalized
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(|s| utf8_percent_encode(s, COMPONENT).to_string())
        .collect();
    if encoded.is_empty() {
        return Err(TransferError::InvalidPath(format!(
            "no file name in path: {relative}"
        )));
    }

    let encoded = encoded.join("/");
    Ok(path_join(&["/", dir, &encoded]))
}
