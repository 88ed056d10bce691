//! Filesystem helpers shared by the executor, collections and backups
//!
//! All helpers translate "already exists" / "already absent" into success
//! where the caller's semantics allow it; everything else becomes a fatal
//! `VaultError::Io` carrying the operation and path.

use std::fs;
use std::io;
use std::path::Path;

use linkvault_common::{VaultError, VaultResult};

/// Create a symlink at `link` pointing to `target`.
pub fn create_symlink(target: &Path, link: &Path, override_existing: bool) -> VaultResult<()> {
    log::debug!(
        "Creating symlink {} -> {} (override: {})",
        link.display(),
        target.display(),
        override_existing
    );
    if link.symlink_metadata().is_ok() {
        if !override_existing {
            return Err(VaultError::io(
                "create symlink",
                link,
                io::Error::new(io::ErrorKind::AlreadyExists, "destination already exists"),
            ));
        }
        fs::remove_file(link).map_err(|e| VaultError::io("replace symlink", link, e))?;
    }
    symlink(target, link).map_err(|e| VaultError::io("create symlink", link, e))
}

/// Re-create the symlink at `source_link` at `dest_link`, preserving its
/// target verbatim.
pub fn copy_symlink(source_link: &Path, dest_link: &Path) -> VaultResult<()> {
    let target =
        fs::read_link(source_link).map_err(|e| VaultError::io("read symlink", source_link, e))?;
    symlink(&target, dest_link).map_err(|e| VaultError::io("create symlink", dest_link, e))
}

/// Remove the symlink at `path`. A missing link is success when
/// `ignore_missing` is set.
pub fn remove_symlink(path: &Path, ignore_missing: bool) -> VaultResult<()> {
    match path.symlink_metadata() {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(path).map_err(|e| VaultError::io("remove symlink", path, e))
        }
        Ok(_) => Err(VaultError::io(
            "remove symlink",
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "path is not a symlink"),
        )),
        Err(_) if ignore_missing => {
            log::debug!("Symlink {} was already gone", path.display());
            Ok(())
        }
        Err(e) => Err(VaultError::io("remove symlink", path, e)),
    }
}

/// Move a regular file, falling back to copy + unlink when a plain rename
/// is not possible (discs are usually separate filesystems).
pub fn move_file(source: &Path, dest: &Path) -> VaultResult<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            log::debug!(
                "Rename {} -> {} failed ({}), copying across filesystems",
                source.display(),
                dest.display(),
                rename_err
            );
            fs::copy(source, dest).map_err(|e| VaultError::io("copy file", dest, e))?;
            fs::remove_file(source).map_err(|e| VaultError::io("remove file", source, e))
        }
    }
}

/// Move a directory entry of any kind (regular file or symlink),
/// overwriting an existing destination. Falls back to copy + unlink
/// across filesystems, preserving symlinks as symlinks.
pub fn move_entry(source: &Path, dest: &Path) -> VaultResult<()> {
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    let meta = source
        .symlink_metadata()
        .map_err(|e| VaultError::io("stat", source, e))?;
    if dest.symlink_metadata().is_ok() {
        fs::remove_file(dest).map_err(|e| VaultError::io("replace file", dest, e))?;
    }
    if meta.file_type().is_symlink() {
        copy_symlink(source, dest)?;
    } else {
        fs::copy(source, dest).map_err(|e| VaultError::io("copy file", dest, e))?;
    }
    fs::remove_file(source).map_err(|e| VaultError::io("remove file", source, e))
}

/// Move a whole tree, falling back to a symlink-preserving copy plus
/// removal when a rename is not possible. A missing source is success.
pub fn move_tree(source: &Path, dest: &Path) -> VaultResult<()> {
    if !source.exists() {
        log::debug!("Tree {} does not exist, nothing to move", source.display());
        return Ok(());
    }
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    copy_tree(source, dest)?;
    fs::remove_dir_all(source).map_err(|e| VaultError::io("remove directory", source, e))
}

/// Copy a regular file.
pub fn copy_file(source: &Path, dest: &Path) -> VaultResult<()> {
    fs::copy(source, dest)
        .map(|_| ())
        .map_err(|e| VaultError::io("copy file", dest, e))
}

/// Create a directory and any missing parents. An existing directory is
/// success.
pub fn ensure_dir(path: &Path) -> VaultResult<()> {
    fs::create_dir_all(path).map_err(|e| VaultError::io("create directory", path, e))
}

/// Recursively copy a tree without following symlinks: directories are
/// recreated, symlinks are re-created with their targets verbatim, regular
/// files are copied.
pub fn copy_tree(source: &Path, dest: &Path) -> VaultResult<()> {
    ensure_dir(dest)?;
    let entries = fs::read_dir(source).map_err(|e| VaultError::io("read directory", source, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| VaultError::io("read directory", source, e))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| VaultError::io("stat", &from, e))?;
        if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
        } else if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            copy_file(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_remove_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.bin");
        fs::write(&target, b"data").unwrap();
        let link = dir.path().join("link");

        create_symlink(&target, &link, false).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), target);

        // A second create without override fails, with override succeeds.
        assert!(create_symlink(&target, &link, false).is_err());
        create_symlink(&target, &link, true).unwrap();

        remove_symlink(&link, false).unwrap();
        assert!(link.symlink_metadata().is_err());
        assert!(remove_symlink(&link, false).is_err());
        remove_symlink(&link, true).unwrap();
    }

    #[test]
    fn test_copy_symlink_preserves_target() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("link");
        let copied = dir.path().join("copied");
        create_symlink(Path::new("/somewhere/else"), &link, false).unwrap();

        copy_symlink(&link, &copied).unwrap();
        assert_eq!(
            fs::read_link(&copied).unwrap(),
            Path::new("/somewhere/else")
        );
    }

    #[test]
    fn test_move_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.bin");
        let dest = dir.path().join("b.bin");
        fs::write(&source, b"payload").unwrap();

        move_file(&source, &dest).unwrap();
        assert!(!source.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
    }

    #[test]
    fn test_copy_tree_preserves_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/file.txt"), b"x").unwrap();
        create_symlink(Path::new("/absolute/target"), &src.join("link"), false).unwrap();

        let dst = dir.path().join("dst");
        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read(dst.join("sub/file.txt")).unwrap(), b"x");
        assert_eq!(
            fs::read_link(dst.join("link")).unwrap(),
            Path::new("/absolute/target")
        );
    }
}
