//! Disc registry: named physical volumes with optional capacity limits

use std::path::Path;

use linkvault_common::{DiscMeta, VaultError, VaultResult, format_bytes, validate_name};
use walkdir::WalkDir;

use crate::session::{META_DOC_VERSION, Session};
use crate::vfs::absolutize;

/// Register a new disc.
pub fn add_disc(
    session: &mut Session,
    name: &str,
    base_path: &Path,
    capacity: Option<u64>,
) -> VaultResult<()> {
    let vfs = session.current_vfs()?.clone();
    validate_name("disc", name).map_err(VaultError::config)?;
    let base_path = absolutize(base_path)?;

    if !base_path.is_dir() {
        return Err(VaultError::config(format!(
            "path {} is not an existing directory",
            base_path.display()
        )));
    }
    if session.disc_by_name(name)?.is_some() {
        return Err(VaultError::config(format!(
            "disc named \"{}\" already exists in VFS \"{}\"",
            name, vfs.name
        )));
    }
    if let Some(owner) = session.disc_by_path(&base_path)? {
        return Err(VaultError::config(format!(
            "path {} is already part of disc \"{}\" based at {}",
            base_path.display(),
            owner.name,
            owner.base_path.display()
        )));
    }

    let mut discs = session.discs()?;
    discs.push(DiscMeta {
        name: name.to_string(),
        base_path,
        capacity,
    });
    let path = session.discs_file()?;
    session.store.write(&path, &discs, META_DOC_VERSION, false)?;
    session.invalidate_discs();

    log::info!("Disc \"{name}\" added");
    Ok(())
}

/// Remove a disc from the registry. Its content is left untouched.
pub fn del_disc(session: &mut Session, name: &str) -> VaultResult<()> {
    let vfs = session.current_vfs()?.clone();
    let mut discs = session.discs()?;
    let before = discs.len();
    discs.retain(|disc| disc.name != name);
    if discs.len() == before {
        return Err(VaultError::config(format!(
            "disc named \"{}\" is not available in VFS \"{}\"",
            name, vfs.name
        )));
    }
    let path = session.discs_file()?;
    session.store.write(&path, &discs, META_DOC_VERSION, false)?;
    session.invalidate_discs();

    log::info!("Disc \"{name}\" deleted");
    Ok(())
}

/// Current physical usage of a disc: the sum of `lstat` sizes of
/// everything under its base. Symlinks count with their own link size,
/// never their target's.
pub fn disc_size(disc: &DiscMeta) -> VaultResult<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(&disc.base_path).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| disc.base_path.clone());
            VaultError::io(
                "scan disc",
                path,
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk error")),
            )
        })?;
        if !entry.file_type().is_dir() {
            let meta = entry
                .metadata()
                .map_err(|e| {
                    VaultError::io(
                        "stat",
                        entry.path().to_path_buf(),
                        e.into_io_error()
                            .unwrap_or_else(|| std::io::Error::other("stat error")),
                    )
                })?;
            total += meta.len();
        }
    }
    Ok(total)
}

/// Remaining headroom of a capacity-limited disc, clamped at zero when
/// the disc is already over capacity. `None` for unlimited discs.
pub fn capacity_left(disc: &DiscMeta) -> VaultResult<Option<u64>> {
    match disc.capacity {
        None => Ok(None),
        Some(capacity) => {
            let used = disc_size(disc)?;
            Ok(Some(capacity.saturating_sub(used)))
        }
    }
}

pub fn list_discs(session: &mut Session) -> VaultResult<()> {
    let discs = session.discs()?;
    if discs.is_empty() {
        println!("No discs have been added");
        return Ok(());
    }
    for disc in discs {
        let capacity = disc
            .capacity
            .map(format_bytes)
            .unwrap_or_else(|| "unlimited".to_string());
        if disc.base_path.is_dir() {
            let used = disc_size(&disc)?;
            println!(
                "{}\t{}\tcapacity: {}\tused: {}",
                disc.name,
                disc.base_path.display(),
                capacity,
                format_bytes(used)
            );
        } else {
            println!(
                "{}\t{}\tcapacity: {}\t(disconnected)",
                disc.name,
                disc.base_path.display(),
                capacity
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::VaultFixture;

    #[test]
    fn test_add_disc_validations() {
        let fx = VaultFixture::new();
        let mut session = fx.session();
        std::fs::create_dir_all(fx.actual_path("disc-a")).unwrap();

        add_disc(&mut session, "disc-a", &fx.actual_path("disc-a"), None).unwrap();
        // Duplicate name.
        assert!(add_disc(&mut session, "disc-a", &fx.actual_path("disc-a"), None).is_err());
        // Base inside an existing disc.
        std::fs::create_dir_all(fx.actual_path("disc-a/nested")).unwrap();
        assert!(
            add_disc(&mut session, "nested", &fx.actual_path("disc-a/nested"), None).is_err()
        );
        // Missing directory.
        assert!(add_disc(&mut session, "ghost", &fx.actual_path("ghost"), None).is_err());
    }

    #[test]
    fn test_disc_size_uses_lstat_semantics() {
        let fx = VaultFixture::new();
        let mut session = fx.session();
        fx.write_actual("disc-a/files/one.bin", 100);
        fx.write_actual("disc-a/files/deep/two.bin", 50);
        fx.add_disc(&mut session, "disc-a", "disc-a", None);
        let disc = session.disc_by_name("disc-a").unwrap().unwrap();

        let base = disc_size(&disc).unwrap();
        assert_eq!(base, 150);

        // A symlink adds its own (small) size, not its target's 100 bytes.
        crate::fsutil::create_symlink(
            &fx.actual_path("disc-a/files/one.bin"),
            &fx.actual_path("disc-a/link"),
            false,
        )
        .unwrap();
        let with_link = disc_size(&disc).unwrap();
        assert!(with_link > base);
        assert!(with_link < base + 100);
    }

    #[test]
    fn test_capacity_left_clamps_at_zero() {
        let fx = VaultFixture::new();
        let mut session = fx.session();
        fx.write_actual("disc-a/big.bin", 500);
        fx.add_disc(&mut session, "disc-a", "disc-a", Some(300));
        let disc = session.disc_by_name("disc-a").unwrap().unwrap();

        assert_eq!(capacity_left(&disc).unwrap(), Some(0));

        let unlimited = DiscMeta {
            name: "u".to_string(),
            base_path: fx.actual_path("disc-a"),
            capacity: None,
        };
        assert_eq!(capacity_left(&unlimited).unwrap(), None);
    }
}
