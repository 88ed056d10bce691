//! Properties on virtual paths, stored in `.lv` sidecar documents
//!
//! A directory's properties live inside it (`<dir>/.<name>.props.lv`); a
//! file's properties live next to it. Sidecars carry the vault extension
//! so walkers never mistake them for content.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use linkvault_common::config::{PROP_FILE_SUFFIX, VAULT_FILE_EXT};
use linkvault_common::{VaultError, VaultResult};

use crate::session::{META_DOC_VERSION, Session};
use crate::vfs::absolutize;

fn sidecar_name(path: &Path) -> VaultResult<String> {
    let name = path
        .file_name()
        .ok_or_else(|| {
            VaultError::config(format!("path {} has no file name", path.display()))
        })?
        .to_string_lossy()
        .to_string();
    Ok(format!(".{name}.{PROP_FILE_SUFFIX}.{VAULT_FILE_EXT}"))
}

/// Sidecar path of a virtual directory (inside the directory).
pub fn dir_prop_path(dir: &Path) -> VaultResult<PathBuf> {
    Ok(dir.join(sidecar_name(dir)?))
}

/// Sidecar path of a virtual file (next to the file).
pub fn file_prop_path(file: &Path) -> VaultResult<PathBuf> {
    let parent = file.parent().ok_or_else(|| {
        VaultError::config(format!("path {} has no parent directory", file.display()))
    })?;
    Ok(parent.join(sidecar_name(file)?))
}

/// Sidecar path of any virtual path: directories keep their sidecar
/// inside, symlinks next to them. Anything else is not a virtual entry.
pub fn prop_path(virtual_path: &Path) -> VaultResult<PathBuf> {
    let meta = virtual_path
        .symlink_metadata()
        .map_err(|e| VaultError::io("stat", virtual_path, e))?;
    if meta.file_type().is_symlink() {
        file_prop_path(virtual_path)
    } else if meta.is_dir() {
        dir_prop_path(virtual_path)
    } else {
        Err(VaultError::config(format!(
            "path {} is neither a directory nor a symlink",
            virtual_path.display()
        )))
    }
}

pub fn load_props(session: &Session, virtual_path: &Path) -> VaultResult<BTreeMap<String, String>> {
    let path = prop_path(virtual_path)?;
    Ok(session
        .store
        .read(&path, META_DOC_VERSION)?
        .unwrap_or_default())
}

pub fn get_prop(
    session: &Session,
    virtual_path: &Path,
    prop: &str,
) -> VaultResult<Option<String>> {
    Ok(load_props(session, virtual_path)?.get(prop).cloned())
}

pub fn set_prop(
    session: &mut Session,
    virtual_path: &Path,
    prop: &str,
    value: &str,
    override_existing: bool,
) -> VaultResult<()> {
    let mut props = load_props(session, virtual_path)?;
    if props.contains_key(prop) && !override_existing {
        return Err(VaultError::config(format!(
            "property \"{}\" already exists for {}",
            prop,
            virtual_path.display()
        )));
    }
    props.insert(prop.to_string(), value.to_string());
    let path = prop_path(virtual_path)?;
    session.store.write(&path, &props, META_DOC_VERSION, false)
}

pub fn del_prop(session: &mut Session, virtual_path: &Path, prop: &str) -> VaultResult<()> {
    let mut props = load_props(session, virtual_path)?;
    if props.remove(prop).is_none() {
        return Err(VaultError::config(format!(
            "no property \"{}\" on {}",
            prop,
            virtual_path.display()
        )));
    }
    let path = prop_path(virtual_path)?;
    session.store.write(&path, &props, META_DOC_VERSION, false)
}

pub fn list_props(session: &Session, virtual_path: &Path) -> VaultResult<()> {
    let virtual_path = absolutize(virtual_path)?;
    let props = load_props(session, &virtual_path)?;
    if props.is_empty() {
        println!("No properties set on {}", virtual_path.display());
        return Ok(());
    }
    for (prop, value) in props {
        println!("{prop} = {value}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::VaultFixture;

    #[test]
    fn test_sidecar_placement() {
        let fx = VaultFixture::new();
        let dir = fx.virtual_base();
        assert_eq!(
            dir_prop_path(&dir.join("films")).unwrap(),
            dir.join("films/.films.props.lv")
        );
        assert_eq!(
            file_prop_path(&dir.join("films/x.mkv")).unwrap(),
            dir.join("films/.x.mkv.props.lv")
        );
    }

    #[test]
    fn test_set_get_del_round_trip() {
        let fx = VaultFixture::new();
        let mut session = fx.session();
        let dir = fx.virtual_base();

        set_prop(&mut session, &dir, "rating", "5", true).unwrap();
        assert_eq!(
            get_prop(&session, &dir, "rating").unwrap().as_deref(),
            Some("5")
        );

        // Refusing to override, then overriding.
        assert!(set_prop(&mut session, &dir, "rating", "4", false).is_err());
        set_prop(&mut session, &dir, "rating", "4", true).unwrap();
        assert_eq!(
            get_prop(&session, &dir, "rating").unwrap().as_deref(),
            Some("4")
        );

        del_prop(&mut session, &dir, "rating").unwrap();
        assert_eq!(get_prop(&session, &dir, "rating").unwrap(), None);
        assert!(del_prop(&mut session, &dir, "rating").is_err());
    }

    #[test]
    fn test_props_rejected_on_plain_files() {
        let fx = VaultFixture::new();
        let mut session = fx.session();
        let plain = fx.virtual_base().join("plain.txt");
        std::fs::write(&plain, b"x").unwrap();
        assert!(set_prop(&mut session, &plain, "p", "v", true).is_err());
    }
}
