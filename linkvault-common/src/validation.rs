//! Name and path validation shared across linkvault commands

use std::path::{Path, PathBuf};

/// Validate a user-supplied name for a VFS, collection, disc or backup.
///
/// Names become directory names and metadata keys, so they must be
/// non-empty, at most 255 characters, free of path separators, null bytes
/// and `..`, and must not start with `-` or `.`.
pub fn validate_name(kind: &str, name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{kind} name cannot be empty"));
    }
    if name.len() > 255 {
        return Err(format!("{kind} name too long (max 255 characters)"));
    }
    if name.contains('/') {
        return Err(format!("{kind} name cannot contain '/'"));
    }
    if name.contains('\0') {
        return Err(format!("{kind} name cannot contain null bytes"));
    }
    if name.contains("..") {
        return Err(format!("{kind} name cannot contain '..'"));
    }
    if name.starts_with('-') || name.starts_with('.') {
        return Err(format!("{kind} name cannot start with '-' or '.'"));
    }
    Ok(())
}

/// Whether `path` equals `base` or lies somewhere beneath it.
/// Comparison is component-wise, so `/mnt/a2` is not inside `/mnt/a`.
pub fn is_within(path: &Path, base: &Path) -> bool {
    path.starts_with(base)
}

/// Rewrite `path` from one directory prefix to another. Returns `None`
/// when `path` is not under `from`.
pub fn rebase(path: &Path, from: &Path, to: &Path) -> Option<PathBuf> {
    path.strip_prefix(from).ok().map(|rest| {
        if rest.as_os_str().is_empty() {
            to.to_path_buf()
        } else {
            to.join(rest)
        }
    })
}
