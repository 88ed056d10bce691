//! Collection operations: mirroring actual trees into the VFS
//!
//! Adding a collection walks the actual tree once, recreates its
//! directory structure under the virtual base and plants one symlink per
//! file, while recording a stat entry for every file in the collection's
//! stats document. Syncing reconciles an existing collection against the
//! actual tree after out-of-band changes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use linkvault_common::{
    CollectionMeta, FileRecord, VaultError, VaultResult, format_bytes, validate_name,
};

use crate::fsutil;
use crate::session::{META_DOC_VERSION, Session};
use crate::vfs::{absolutize, vfs_walk};

/// Mirror an actual directory into the current VFS as a new collection.
pub fn add_collection(session: &mut Session, name: &str, actual_base: &Path) -> VaultResult<()> {
    let vfs = session.current_vfs()?.clone();
    validate_name("collection", name).map_err(VaultError::config)?;
    let actual_base = absolutize(actual_base)?;

    if session.collection_by_name(name)?.is_some() {
        return Err(VaultError::config(format!(
            "collection \"{}\" already exists in VFS \"{}\"",
            name, vfs.name
        )));
    }
    if let Some(owner) = session.collection_by_path(&actual_base)? {
        return Err(VaultError::config(format!(
            "path {} is already part of collection \"{}\"",
            actual_base.display(),
            owner.name
        )));
    }
    if !actual_base.is_dir() {
        return Err(VaultError::config(format!(
            "path {} is not an existing directory",
            actual_base.display()
        )));
    }

    let col_dir = session.collection_dir(name)?;
    fs::create_dir_all(&col_dir).map_err(|e| VaultError::io("create directory", &col_dir, e))?;

    let virtual_base = vfs.virtual_base.join(name);
    let meta = CollectionMeta {
        name: name.to_string(),
        actual_base: actual_base.clone(),
        virtual_base: virtual_base.clone(),
    };
    session.store.write(
        &session.collection_meta_file(name)?,
        &meta,
        META_DOC_VERSION,
        false,
    )?;

    // Mirror the actual tree: directories become real virtual
    // directories, files become symlinks (source symlinks keep their
    // target), and every file gains a stat record.
    let mut records: BTreeMap<_, FileRecord> = BTreeMap::new();
    let mut file_count = 0usize;
    for group in vfs_walk(&actual_base)? {
        let virtual_dir = linkvault_common::rebase(&group.dir, &actual_base, &virtual_base)
            .expect("walked path is under its base");
        fsutil::ensure_dir(&virtual_dir)?;

        for file in &group.files {
            let link_path = virtual_dir.join(file.file_name().expect("walked file has a name"));
            let meta = file
                .symlink_metadata()
                .map_err(|e| VaultError::io("stat", file, e))?;
            if meta.file_type().is_symlink() {
                log::debug!("Source file {} is itself a symlink", file.display());
                fsutil::copy_symlink(file, &link_path)?;
            } else {
                fsutil::create_symlink(file, &link_path, false)?;
            }
            let record = FileRecord::from_metadata(file.clone(), &meta);
            log::debug!(
                "Added actual file {} ({} bytes)",
                file.display(),
                record.size
            );
            records.insert(file.clone(), record);
            file_count += 1;
        }
    }

    session.store.write(
        &session.collection_stats_file(name)?,
        &records,
        META_DOC_VERSION,
        false,
    )?;
    session.invalidate_collections();
    session.stats.insert(name.to_string(), records);

    log::info!(
        "Collection \"{}\" added to VFS \"{}\" ({} files)",
        name,
        vfs.name,
        file_count
    );
    Ok(())
}

/// Reconcile a collection with its actual tree: drop records and links of
/// files that vanished, and record + link files that appeared.
pub fn sync_collection(session: &mut Session, name: &str) -> VaultResult<()> {
    let vfs = session.current_vfs()?.clone();
    let col = session.collection_by_name(name)?.ok_or_else(|| {
        VaultError::config(format!(
            "collection \"{}\" is not available in VFS \"{}\"",
            name, vfs.name
        ))
    })?;
    if !col.actual_base.is_dir() {
        return Err(VaultError::config(format!(
            "collection base {} is not available",
            col.actual_base.display()
        )));
    }

    let known: Vec<_> = session.collection_stats(name)?.keys().cloned().collect();
    session.actual_to_virtual()?;

    // Files that vanished from the actual tree lose their links and
    // their stat records.
    let mut removed = 0usize;
    for actual_path in known {
        let meta = actual_path.symlink_metadata();
        if meta.map(|m| m.is_file() || m.file_type().is_symlink()).unwrap_or(false) {
            continue;
        }
        if let Some(links) = session.links_for_actual(&actual_path)? {
            for link in links {
                fsutil::remove_symlink(&link, true)?;
            }
        }
        session.remove_record(&actual_path)?;
        removed += 1;
    }

    // Files that appeared gain a stat record and a link at the original
    // mirror location.
    let mut added = 0usize;
    for group in vfs_walk(&col.actual_base)? {
        for file in &group.files {
            if session.stats_for_actual(file)?.is_some() {
                continue;
            }
            let meta = file
                .symlink_metadata()
                .map_err(|e| VaultError::io("stat", file, e))?;
            session.add_record(FileRecord::from_metadata(file.clone(), &meta))?;

            let link_path = linkvault_common::rebase(file, &col.actual_base, &col.virtual_base)
                .expect("walked path is under its base");
            if let Some(parent) = link_path.parent() {
                fsutil::ensure_dir(parent)?;
            }
            fsutil::create_symlink(file, &link_path, false)?;
            added += 1;
        }
    }

    session.invalidate_a2v();
    log::info!(
        "Collection \"{name}\" synced: {added} files added, {removed} files removed"
    );
    Ok(())
}

pub fn list_collections(session: &mut Session) -> VaultResult<()> {
    let collections = session.collections()?;
    if collections.is_empty() {
        println!("No collections have been added");
        return Ok(());
    }
    for col in collections {
        println!("{}\t{}", col.name, col.actual_base.display());
    }
    Ok(())
}

pub fn show_collection_by_name(session: &mut Session, name: &str) -> VaultResult<()> {
    let col = session
        .collection_by_name(name)?
        .ok_or_else(|| VaultError::config(format!("collection \"{name}\" does not exist")))?;
    print_collection(session, &col)
}

pub fn show_collection_by_path(session: &mut Session, path: &Path) -> VaultResult<()> {
    let path = absolutize(path)?;
    let col = session.collection_by_path(&path)?.ok_or_else(|| {
        VaultError::config(format!(
            "no collection contains the path {}",
            path.display()
        ))
    })?;
    print_collection(session, &col)
}

fn print_collection(session: &mut Session, col: &CollectionMeta) -> VaultResult<()> {
    let stats = session.collection_stats(&col.name)?;
    let total: u64 = stats.values().map(|record| record.size).sum();
    println!("Name: {}", col.name);
    println!("Actual base: {}", col.actual_base.display());
    println!("Virtual base: {}", col.virtual_base.display());
    println!("Files: {}", stats.len());
    println!("Total size: {}", format_bytes(total));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::VaultFixture;

    #[test]
    fn test_add_collection_mirrors_tree() {
        let fx = VaultFixture::new();
        let mut session = fx.session();
        fx.write_actual("disc-a/photos/summer/beach.jpg", 30);
        fx.write_actual("disc-a/photos/winter.jpg", 20);

        add_collection(&mut session, "photos", &fx.actual_path("disc-a/photos")).unwrap();

        let vb = fx.virtual_base();
        assert!(vb.join("photos/summer").is_dir());
        let link = vb.join("photos/summer/beach.jpg");
        assert_eq!(
            VaultFixture::link_target(&link),
            fx.actual_path("disc-a/photos/summer/beach.jpg")
        );
        let record = session
            .stats_for_actual(&fx.actual_path("disc-a/photos/winter.jpg"))
            .unwrap()
            .unwrap();
        assert_eq!(record.size, 20);
    }

    #[test]
    fn test_add_collection_rejects_duplicates_and_nesting() {
        let fx = VaultFixture::new();
        let mut session = fx.session();
        fx.write_actual("disc-a/photos/pic.jpg", 5);

        add_collection(&mut session, "photos", &fx.actual_path("disc-a/photos")).unwrap();
        assert!(add_collection(&mut session, "photos", &fx.actual_path("disc-a/photos")).is_err());
        // A path inside an existing collection cannot become a collection.
        assert!(
            add_collection(&mut session, "nested", &fx.actual_path("disc-a/photos")).is_err()
        );
    }

    #[test]
    fn test_sync_collection_reconciles() {
        let fx = VaultFixture::new();
        let mut session = fx.session();
        fx.write_actual("disc-a/photos/keep.jpg", 10);
        fx.write_actual("disc-a/photos/gone.jpg", 10);
        add_collection(&mut session, "photos", &fx.actual_path("disc-a/photos")).unwrap();

        fs::remove_file(fx.actual_path("disc-a/photos/gone.jpg")).unwrap();
        fx.write_actual("disc-a/photos/new.jpg", 15);

        sync_collection(&mut session, "photos").unwrap();

        let vb = fx.virtual_base();
        assert!(!vb.join("photos/gone.jpg").symlink_metadata().is_ok());
        assert!(vb.join("photos/new.jpg").symlink_metadata().is_ok());
        assert!(
            session
                .stats_for_actual(&fx.actual_path("disc-a/photos/gone.jpg"))
                .unwrap()
                .is_none()
        );
        assert_eq!(
            session
                .stats_for_actual(&fx.actual_path("disc-a/photos/new.jpg"))
                .unwrap()
                .unwrap()
                .size,
            15
        );
    }
}
