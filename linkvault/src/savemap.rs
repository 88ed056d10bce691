//! Save-map registry: declared virtual-dir → actual-dir placements

use std::path::{Path, PathBuf};

use linkvault_common::{SaveMapping, VaultError, VaultResult, rebase};

use crate::session::{META_DOC_VERSION, Session};
use crate::vfs::absolutize;

/// Declare that a virtual directory must be materialized into an actual
/// directory during saves.
pub fn add_save_map(session: &mut Session, virtual_dir: &Path, actual_dir: &Path) -> VaultResult<()> {
    let vfs = session.current_vfs()?.clone();
    let virtual_dir = absolutize(virtual_dir)?;
    let actual_dir = absolutize(actual_dir)?;

    let owner = session.vfs_by_path(&virtual_dir)?.ok_or_else(|| {
        VaultError::config(format!(
            "no VFS contains the virtual directory {}",
            virtual_dir.display()
        ))
    })?;
    if owner.name != vfs.name {
        return Err(VaultError::config(format!(
            "virtual directory {} belongs to another VFS \"{}\"",
            virtual_dir.display(),
            owner.name
        )));
    }
    if session.collection_by_path(&actual_dir)?.is_none() {
        return Err(VaultError::config(format!(
            "actual directory {} is not part of any collection",
            actual_dir.display()
        )));
    }
    if let Some(existing) = session.save_map_for_virtual(&virtual_dir)? {
        return Err(VaultError::config(format!(
            "virtual directory {} is already mapped under {}",
            virtual_dir.display(),
            existing.virtual_dir.display()
        )));
    }
    if let Some(existing) = session.save_map_for_actual(&actual_dir)? {
        return Err(VaultError::config(format!(
            "actual directory {} is already mapped under {}",
            actual_dir.display(),
            existing.actual_dir.display()
        )));
    }

    let mut mappings = session.save_maps()?;
    mappings.push(SaveMapping {
        virtual_dir,
        actual_dir,
    });
    let path = session.save_maps_file()?;
    session
        .store
        .write(&path, &mappings, META_DOC_VERSION, false)?;
    session.invalidate_save_maps();

    log::info!("Save mapping added");
    Ok(())
}

/// Remove every save mapping of the current VFS.
pub fn del_save_maps(session: &mut Session) -> VaultResult<()> {
    let path = session.save_maps_file()?;
    session
        .store
        .write(&path, &Vec::<SaveMapping>::new(), META_DOC_VERSION, false)?;
    session.invalidate_save_maps();
    log::info!("All save mappings deleted");
    Ok(())
}

pub fn list_save_maps(session: &mut Session) -> VaultResult<()> {
    let mappings = session.save_maps()?;
    if mappings.is_empty() {
        println!("No save mappings have been added");
        return Ok(());
    }
    for mapping in mappings {
        println!(
            "{} -> {}",
            mapping.virtual_dir.display(),
            mapping.actual_dir.display()
        );
    }
    Ok(())
}

/// Required destination of a virtual path under the save maps. Unmapped
/// paths are a configuration error: pre-flight validation guarantees the
/// mapping is exhaustive before a save starts.
pub fn resolve_virtual(session: &mut Session, virtual_path: &Path) -> VaultResult<PathBuf> {
    let mapping = session.save_map_for_virtual(virtual_path)?.ok_or_else(|| {
        VaultError::config(format!(
            "no save mapping covers the virtual path {}",
            virtual_path.display()
        ))
    })?;
    Ok(rebase(virtual_path, &mapping.virtual_dir, &mapping.actual_dir)
        .expect("mapping matched by prefix"))
}

/// Inverse of `resolve_virtual`; `None` when no mapping covers the path.
pub fn resolve_actual(session: &mut Session, actual_path: &Path) -> VaultResult<Option<PathBuf>> {
    Ok(session
        .save_map_for_actual(actual_path)?
        .map(|mapping| {
            rebase(actual_path, &mapping.actual_dir, &mapping.virtual_dir)
                .expect("mapping matched by prefix")
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection;
    use crate::testutil::VaultFixture;

    fn setup(fx: &VaultFixture) -> Session {
        let mut session = fx.session();
        fx.write_actual("disc-a/photos/pic.jpg", 10);
        collection::add_collection(&mut session, "photos", &fx.actual_path("disc-a/photos"))
            .unwrap();
        session
    }

    #[test]
    fn test_add_and_resolve() {
        let fx = VaultFixture::new();
        let mut session = setup(&fx);
        let vdir = fx.virtual_base().join("photos");

        add_save_map(&mut session, &vdir, &fx.actual_path("disc-a/photos")).unwrap();

        let resolved = resolve_virtual(&mut session, &vdir.join("sub/pic.jpg")).unwrap();
        assert_eq!(resolved, fx.actual_path("disc-a/photos/sub/pic.jpg"));

        let back = resolve_actual(&mut session, &fx.actual_path("disc-a/photos/pic.jpg"))
            .unwrap()
            .unwrap();
        assert_eq!(back, vdir.join("pic.jpg"));
        assert!(
            resolve_actual(&mut session, &fx.actual_path("disc-b/other.jpg"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_overlapping_mappings_rejected() {
        let fx = VaultFixture::new();
        let mut session = setup(&fx);
        let vdir = fx.virtual_base().join("photos");

        add_save_map(&mut session, &vdir, &fx.actual_path("disc-a/photos")).unwrap();
        // Same virtual dir, and a nested one, both rejected.
        assert!(add_save_map(&mut session, &vdir, &fx.actual_path("disc-a/photos")).is_err());
        std::fs::create_dir_all(fx.virtual_base().join("photos/sub")).unwrap();
        assert!(
            add_save_map(
                &mut session,
                &vdir.join("sub"),
                &fx.actual_path("disc-a/photos")
            )
            .is_err()
        );
    }

    #[test]
    fn test_unmapped_virtual_path_is_config_error() {
        let fx = VaultFixture::new();
        let mut session = setup(&fx);
        let result = resolve_virtual(&mut session, &fx.virtual_base().join("photos/pic.jpg"));
        assert!(matches!(result, Err(VaultError::Config { .. })));
    }

    #[test]
    fn test_actual_dir_outside_collections_rejected() {
        let fx = VaultFixture::new();
        let mut session = setup(&fx);
        std::fs::create_dir_all(fx.actual_path("disc-b/elsewhere")).unwrap();
        assert!(
            add_save_map(
                &mut session,
                &fx.virtual_base().join("photos"),
                &fx.actual_path("disc-b/elsewhere")
            )
            .is_err()
        );
    }
}
