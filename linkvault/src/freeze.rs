//! Freezing virtual directories
//!
//! A frozen directory is excluded from filters (and from the merge/dedup
//! style reorganizations built on them), but never from saves: freezing
//! protects the virtual arrangement, not the physical placement.

use std::fs;
use std::path::{Path, PathBuf};

use linkvault_common::config::FREEZE_PROP;
use linkvault_common::{VaultError, VaultResult, is_within};

use crate::props;
use crate::session::Session;
use crate::vfs::absolutize;

/// Whether this directory itself carries the frozen mark.
pub fn is_frozen(session: &Session, virtual_dir: &Path) -> VaultResult<bool> {
    Ok(props::get_prop(session, virtual_dir, FREEZE_PROP)?.as_deref() == Some("true"))
}

/// The nearest frozen ancestor (including the directory itself), if any.
pub fn frozen_parent(session: &Session, virtual_dir: &Path) -> VaultResult<Option<PathBuf>> {
    let virtual_base = session.current_vfs()?.virtual_base.clone();
    let mut current = virtual_dir.to_path_buf();
    while is_within(&current, &virtual_base) {
        if is_frozen(session, &current)? {
            return Ok(Some(current));
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
    Ok(None)
}

pub fn freeze_dir(session: &mut Session, virtual_dir: &Path) -> VaultResult<()> {
    let virtual_dir = absolutize(virtual_dir)?;
    if !virtual_dir.is_dir() {
        return Err(VaultError::config(format!(
            "path {} is not a virtual directory",
            virtual_dir.display()
        )));
    }
    if is_frozen(session, &virtual_dir)? {
        log::info!("Directory {} is already frozen", virtual_dir.display());
        return Ok(());
    }
    if let Some(parent) = frozen_parent(session, &virtual_dir)? {
        log::info!("Parent directory {} is already frozen", parent.display());
        return Ok(());
    }
    props::set_prop(session, &virtual_dir, FREEZE_PROP, "true", true)?;
    log::info!("Directory {} has been frozen", virtual_dir.display());
    Ok(())
}

pub fn unfreeze_dir(session: &mut Session, virtual_dir: &Path) -> VaultResult<()> {
    let virtual_dir = absolutize(virtual_dir)?;
    let Some(parent) = frozen_parent(session, &virtual_dir)? else {
        log::info!("Directory {} is not frozen", virtual_dir.display());
        return Ok(());
    };
    if !is_frozen(session, &virtual_dir)? {
        log::info!(
            "Parent directory {} is frozen; unfreeze it instead",
            parent.display()
        );
        return Ok(());
    }
    props::del_prop(session, &virtual_dir, FREEZE_PROP)?;
    log::info!("Directory {} has been unfrozen", virtual_dir.display());
    Ok(())
}

/// Collect the topmost frozen directories under `path` (frozen subtrees
/// are not entered).
pub fn frozen_dirs_under(session: &Session, path: &Path) -> VaultResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    collect_frozen(session, path, &mut found)?;
    Ok(found)
}

fn collect_frozen(session: &Session, dir: &Path, found: &mut Vec<PathBuf>) -> VaultResult<()> {
    if is_frozen(session, dir)? {
        found.push(dir.to_path_buf());
        return Ok(());
    }
    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| VaultError::io("read directory", dir, e))?
        .filter_map(Result::ok)
        .collect();
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let path = entry.path();
        let is_dir = entry
            .file_type()
            .map(|ft| ft.is_dir())
            .unwrap_or(false);
        if is_dir {
            collect_frozen(session, &path, found)?;
        }
    }
    Ok(())
}

pub fn list_frozen_dirs(session: &Session, path: &Path) -> VaultResult<()> {
    let path = absolutize(path)?;
    let frozen = frozen_dirs_under(session, &path)?;
    if frozen.is_empty() {
        println!("No frozen directories were found");
        return Ok(());
    }
    println!("Frozen directories:");
    for dir in frozen {
        println!("  {}", dir.display());
    }
    Ok(())
}
