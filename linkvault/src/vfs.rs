//! VFS lifecycle operations and the virtual-tree walker

use std::fs;
use std::path::{Path, PathBuf};

use linkvault_common::config::{COLLECTIONS_DIR, FILTERS_DIR, VFS_META_FILE};
use linkvault_common::{VaultError, VaultResult, VfsMeta, is_vault_file, validate_name};

use crate::session::{META_DOC_VERSION, Session};

/// One directory visited by the walker, with its immediate children
/// split into subdirectories and files. Symlinks always count as files,
/// whatever they point at; linkvault-internal `.lv` files are omitted.
#[derive(Debug, Clone)]
pub struct WalkGroup {
    pub dir: PathBuf,
    pub subdirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

/// Walk a virtual tree depth-first in deterministic (name-sorted) order.
/// The walk order is what fixes tie-breaking wherever several links share
/// one target, so callers must not re-sort the result.
pub fn vfs_walk(root: &Path) -> VaultResult<Vec<WalkGroup>> {
    let mut groups = Vec::new();
    walk_into(root, &mut groups)?;
    Ok(groups)
}

fn walk_into(dir: &Path, groups: &mut Vec<WalkGroup>) -> VaultResult<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| VaultError::io("read directory", dir, e))?
        .filter_map(Result::ok)
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    let mut group = WalkGroup {
        dir: dir.to_path_buf(),
        subdirs: Vec::new(),
        files: Vec::new(),
    };
    for entry in &entries {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| VaultError::io("stat", &path, e))?;
        if file_type.is_dir() {
            group.subdirs.push(path);
        } else if !is_vault_file(&entry.file_name().to_string_lossy()) {
            group.files.push(path);
        }
    }
    let subdirs = group.subdirs.clone();
    groups.push(group);

    for subdir in subdirs {
        walk_into(&subdir, groups)?;
    }
    Ok(())
}

/// Turn a possibly-relative user path into an absolute one without
/// resolving symlinks.
pub fn absolutize(path: &Path) -> VaultResult<PathBuf> {
    std::path::absolute(path).map_err(|e| VaultError::io("resolve path", path, e))
}

/// Resolve the VFS a command should operate on: an explicit name wins,
/// otherwise the working directory must lie inside some virtual base.
pub fn select_vfs(session: &mut Session, name: Option<&str>) -> VaultResult<()> {
    let vfs = match name {
        Some(name) => session.vfs_by_name(name)?.ok_or_else(|| {
            VaultError::config(format!("VFS named \"{name}\" is not available"))
        })?,
        None => {
            let cwd = std::env::current_dir()
                .map_err(|e| VaultError::io("resolve path", Path::new("."), e))?;
            session.vfs_by_path(&cwd)?.ok_or_else(|| {
                VaultError::config(format!(
                    "no VFS contains the current directory {}; pass --vfs",
                    cwd.display()
                ))
            })?
        }
    };
    session.set_current_vfs(vfs);
    Ok(())
}

/// Select the VFS owning `path` (used by commands addressed by a virtual
/// path rather than by VFS name).
pub fn select_vfs_by_path(session: &mut Session, path: &Path) -> VaultResult<()> {
    let vfs = session.vfs_by_path(path)?.ok_or_else(|| {
        VaultError::config(format!("no VFS contains the path {}", path.display()))
    })?;
    session.set_current_vfs(vfs);
    Ok(())
}

/// Create a new VFS: an empty virtual base at `<parent>/<name>` plus its
/// metadata directory under the vault home.
pub fn new_vfs(session: &mut Session, name: &str, parent: &Path) -> VaultResult<()> {
    validate_name("VFS", name).map_err(VaultError::config)?;
    let parent = absolutize(parent)?;

    if session.vfs_by_name(name)?.is_some() {
        return Err(VaultError::config(format!(
            "a VFS named \"{name}\" already exists"
        )));
    }
    if !parent.is_dir() {
        return Err(VaultError::config(format!(
            "path {} is not an existing directory",
            parent.display()
        )));
    }
    if let Some(owner) = session.vfs_by_path(&parent)? {
        return Err(VaultError::config(format!(
            "path {} is already inside VFS \"{}\"",
            parent.display(),
            owner.name
        )));
    }

    let virtual_base = parent.join(name);
    fs::create_dir(&virtual_base)
        .map_err(|e| VaultError::io("create directory", &virtual_base, e))?;

    let vfs_dir = session.config.vfs_dir(name);
    for dir in [
        vfs_dir.clone(),
        vfs_dir.join(COLLECTIONS_DIR),
        vfs_dir.join(FILTERS_DIR),
    ] {
        fs::create_dir_all(&dir).map_err(|e| VaultError::io("create directory", &dir, e))?;
    }

    let meta = VfsMeta {
        name: name.to_string(),
        virtual_base,
    };
    session
        .store
        .write(&vfs_dir.join(VFS_META_FILE), &meta, META_DOC_VERSION, false)?;

    log::info!("VFS \"{}\" created at {}", name, meta.virtual_base.display());
    Ok(())
}

/// Delete a VFS: its virtual tree and all of its metadata.
pub fn del_vfs(session: &mut Session, name: &str) -> VaultResult<()> {
    let vfs = session
        .vfs_by_name(name)?
        .ok_or_else(|| VaultError::config(format!("VFS named \"{name}\" does not exist")))?;

    if vfs.virtual_base.is_dir() {
        fs::remove_dir_all(&vfs.virtual_base)
            .map_err(|e| VaultError::io("remove directory", &vfs.virtual_base, e))?;
    }
    let vfs_dir = session.config.vfs_dir(name);
    fs::remove_dir_all(&vfs_dir).map_err(|e| VaultError::io("remove directory", &vfs_dir, e))?;

    log::info!("VFS \"{name}\" deleted");
    Ok(())
}

pub fn list_vfs(session: &Session) -> VaultResult<()> {
    let all = session.all_vfs()?;
    if all.is_empty() {
        println!("No VFS has been created yet");
        return Ok(());
    }
    for vfs in all {
        println!("{}\t{}", vfs.name, vfs.virtual_base.display());
    }
    Ok(())
}

pub fn show_vfs_by_name(session: &Session, name: &str) -> VaultResult<()> {
    let vfs = session
        .vfs_by_name(name)?
        .ok_or_else(|| VaultError::config(format!("VFS named \"{name}\" does not exist")))?;
    print_vfs(&vfs);
    Ok(())
}

pub fn show_vfs_by_path(session: &Session, path: &Path) -> VaultResult<()> {
    let path = absolutize(path)?;
    let vfs = session.vfs_by_path(&path)?.ok_or_else(|| {
        VaultError::config(format!("no VFS contains the path {}", path.display()))
    })?;
    print_vfs(&vfs);
    Ok(())
}

fn print_vfs(vfs: &VfsMeta) {
    println!("Name: {}", vfs.name);
    println!("Virtual base: {}", vfs.virtual_base.display());
    println!(
        "Virtual base present: {}",
        if vfs.virtual_base.is_dir() { "yes" } else { "no" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::create_symlink;
    use linkvault_common::VaultConfig;

    fn session_in(dir: &Path) -> Session {
        let session = Session::new(VaultConfig {
            home: dir.join("vault-home"),
        });
        session.ensure_home().unwrap();
        session
    }

    #[test]
    fn test_new_vfs_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        fs::create_dir(dir.path().join("trees")).unwrap();

        new_vfs(&mut session, "media", &dir.path().join("trees")).unwrap();

        assert!(dir.path().join("trees/media").is_dir());
        let vfs = session.vfs_by_name("media").unwrap().unwrap();
        assert_eq!(vfs.virtual_base, dir.path().join("trees/media"));
        assert!(session.config.vfs_dir("media").join(COLLECTIONS_DIR).is_dir());
        assert!(session.config.vfs_dir("media").join(FILTERS_DIR).is_dir());

        // Duplicate names are rejected.
        assert!(new_vfs(&mut session, "media", &dir.path().join("trees")).is_err());
    }

    #[test]
    fn test_del_vfs_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        fs::create_dir(dir.path().join("trees")).unwrap();
        new_vfs(&mut session, "media", &dir.path().join("trees")).unwrap();

        del_vfs(&mut session, "media").unwrap();
        assert!(!dir.path().join("trees/media").exists());
        assert!(session.vfs_by_name("media").unwrap().is_none());
        assert!(del_vfs(&mut session, "media").is_err());
    }

    #[test]
    fn test_vfs_walk_is_sorted_and_skips_vault_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("b")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("z.txt"), b"z").unwrap();
        fs::write(root.join(".z.props.lv"), b"{}").unwrap();
        fs::write(root.join("a/m.txt"), b"m").unwrap();
        create_symlink(Path::new("/somewhere"), &root.join("a/link"), false).unwrap();

        let groups = vfs_walk(&root).unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].dir, root);
        assert_eq!(groups[0].subdirs, vec![root.join("a"), root.join("b")]);
        assert_eq!(groups[0].files, vec![root.join("z.txt")]);
        // Children follow their parent, in name order.
        assert_eq!(groups[1].dir, root.join("a"));
        assert_eq!(
            groups[1].files,
            vec![root.join("a/link"), root.join("a/m.txt")]
        );
        assert_eq!(groups[2].dir, root.join("b"));
    }
}
