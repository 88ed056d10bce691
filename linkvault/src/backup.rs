//! VFS backups: snapshots of the metadata directory plus the virtual tree
//!
//! A backup never touches collection content or discs; it captures the
//! organization (links, props, registries) so a risky reorganization can
//! be rolled back.

use std::fs;
use std::path::Path;

use chrono::Utc;
use linkvault_common::config::{BACKUP_META_FILE, BACKUP_VFS_DIR, BACKUP_VIRTUAL_DIR};
use linkvault_common::{BackupMeta, VaultError, VaultResult};
use uuid::Uuid;

use crate::fsutil;
use crate::session::{META_DOC_VERSION, Session};

/// Snapshot the current VFS. Returns the generated backup name.
pub fn create_backup(session: &mut Session, comment: Option<String>) -> VaultResult<String> {
    let vfs = session.current_vfs()?.clone();
    let name = format!("{}_{}", vfs.name, Uuid::new_v4());
    let backup_dir = session.config.backup_dir().join(&name);
    log::debug!("Creating backup directory {}", backup_dir.display());
    fs::create_dir(&backup_dir)
        .map_err(|e| VaultError::io("create directory", &backup_dir, e))?;

    fsutil::copy_tree(&session.vfs_dir()?, &backup_dir.join(BACKUP_VFS_DIR))?;
    fsutil::copy_tree(&vfs.virtual_base, &backup_dir.join(BACKUP_VIRTUAL_DIR))?;

    let meta = BackupMeta {
        name: name.clone(),
        comment,
        vfs: vfs.name.clone(),
        virtual_base: vfs.virtual_base.clone(),
        created: Utc::now(),
    };
    session.store.write(
        &backup_dir.join(BACKUP_META_FILE),
        &meta,
        META_DOC_VERSION,
        false,
    )?;

    log::info!("Backup \"{name}\" created");
    Ok(name)
}

fn read_backup_meta(session: &Session, dir: &Path) -> VaultResult<BackupMeta> {
    session
        .store
        .read(&dir.join(BACKUP_META_FILE), META_DOC_VERSION)?
        .ok_or_else(|| VaultError::meta(dir.join(BACKUP_META_FILE), "backup metadata missing"))
}

/// List backups, optionally only those of one VFS.
pub fn list_backups(session: &Session, vfs_filter: Option<&str>) -> VaultResult<()> {
    let backup_dir = session.config.backup_dir();
    let mut entries: Vec<_> = fs::read_dir(&backup_dir)
        .map_err(|e| VaultError::io("read directory", &backup_dir, e))?
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    let mut shown = 0usize;
    for entry in entries {
        let meta = match read_backup_meta(session, &entry.path()) {
            Ok(meta) => meta,
            Err(err) => {
                log::warn!("Skipping unreadable backup {}: {err}", entry.path().display());
                continue;
            }
        };
        if vfs_filter.is_some_and(|name| name != meta.vfs) {
            continue;
        }
        println!(
            "{}\tvfs: {}\tcreated: {}\t{}",
            meta.name,
            meta.vfs,
            meta.created.format("%Y-%m-%d %H:%M:%S UTC"),
            meta.comment.as_deref().unwrap_or("")
        );
        shown += 1;
    }
    if shown == 0 {
        println!("No backups found");
    }
    Ok(())
}

pub fn del_backup(session: &Session, name: &str) -> VaultResult<()> {
    let backup_dir = session.config.backup_dir().join(name);
    if !backup_dir.is_dir() {
        return Err(VaultError::config(format!("no backup named \"{name}\"")));
    }
    fs::remove_dir_all(&backup_dir)
        .map_err(|e| VaultError::io("remove directory", &backup_dir, e))?;
    log::info!("Backup \"{name}\" deleted");
    Ok(())
}

/// Restore a backup: the current VFS metadata and virtual tree are moved
/// into a staging directory first, and moved back if the restore fails.
pub fn restore_backup(session: &mut Session, name: &str) -> VaultResult<()> {
    let backup_dir = session.config.backup_dir().join(name);
    if !backup_dir.is_dir() {
        return Err(VaultError::config(format!("no backup named \"{name}\"")));
    }
    let meta = read_backup_meta(session, &backup_dir)?;
    let vfs_dir = session.config.vfs_dir(&meta.vfs);

    let staging = session
        .config
        .backup_dir()
        .join(format!(".restore-{}", Uuid::new_v4()));
    fs::create_dir(&staging).map_err(|e| VaultError::io("create directory", &staging, e))?;
    log::debug!("Staging current state under {}", staging.display());
    fsutil::move_tree(&meta.virtual_base, &staging.join(BACKUP_VIRTUAL_DIR))?;
    fsutil::move_tree(&vfs_dir, &staging.join(BACKUP_VFS_DIR))?;

    let restore = (|| -> VaultResult<()> {
        fsutil::copy_tree(&backup_dir.join(BACKUP_VFS_DIR), &vfs_dir)?;
        fsutil::copy_tree(
            &backup_dir.join(BACKUP_VIRTUAL_DIR),
            &meta.virtual_base,
        )?;
        Ok(())
    })();

    if let Err(restore_err) = restore {
        log::error!("Restore failed, rolling back to the previous state");
        let _ = fs::remove_dir_all(&meta.virtual_base);
        let _ = fs::remove_dir_all(&vfs_dir);
        if let Err(rollback_err) = fsutil::move_tree(&staging.join(BACKUP_VIRTUAL_DIR), &meta.virtual_base)
            .and_then(|_| fsutil::move_tree(&staging.join(BACKUP_VFS_DIR), &vfs_dir))
        {
            log::error!("Rollback also failed: {rollback_err}");
        }
        return Err(restore_err);
    }

    fs::remove_dir_all(&staging).map_err(|e| VaultError::io("remove directory", &staging, e))?;
    session.invalidate_collections();
    session.invalidate_discs();
    session.invalidate_save_maps();
    log::info!("Backup \"{name}\" restored");
    Ok(())
}
