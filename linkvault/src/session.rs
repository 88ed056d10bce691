//! The session object owning configuration, the metadata store and all
//! lazily-built caches
//!
//! The session is created once per CLI invocation and passed by reference
//! into every operation. Caches are invalidated through the explicit
//! `invalidate_*` methods by whichever operation mutates the underlying
//! metadata. The location-index accessors (per-collection stats and the
//! actual→virtual map) live in `index.rs`; their cache fields are declared
//! here.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use linkvault_common::config::{
    COLLECTIONS_DIR, COLLECTION_META_FILE, COLLECTION_STATS_FILE, DISCS_FILE, FILTERS_DIR,
    SAVE_MAPS_FILE, SAVE_STATUS_FILE, VFS_META_FILE,
};
use linkvault_common::{
    CollectionMeta, DiscMeta, FileRecord, SaveMapping, VaultConfig, VaultError, VaultResult,
    VfsMeta, is_within,
};

use crate::store::MetaStore;

/// Schema version of all registry and stats documents.
pub const META_DOC_VERSION: u32 = 1;
/// Schema version of the persisted save status.
pub const SAVE_STATUS_DOC_VERSION: u32 = 1;

pub struct Session {
    pub config: VaultConfig,
    pub store: MetaStore,
    current_vfs: Option<VfsMeta>,

    // Lazily-built caches.
    discs: Option<Vec<DiscMeta>>,
    save_maps: Option<Vec<SaveMapping>>,
    collections: Option<Vec<CollectionMeta>>,
    pub(crate) stats: HashMap<String, BTreeMap<PathBuf, FileRecord>>,
    pub(crate) dirty_stats: HashSet<String>,
    pub(crate) a2v: Option<BTreeMap<PathBuf, Vec<PathBuf>>>,
}

impl Session {
    pub fn new(config: VaultConfig) -> Self {
        Self {
            config,
            store: MetaStore::new(),
            current_vfs: None,
            discs: None,
            save_maps: None,
            collections: None,
            stats: HashMap::new(),
            dirty_stats: HashSet::new(),
            a2v: None,
        }
    }

    // Home layout ---------------------------------------------------------

    /// Create the vault home layout if missing. A present but unusable
    /// home (a file where a directory should be) is a configuration error.
    pub fn ensure_home(&self) -> VaultResult<()> {
        for dir in [
            self.config.home.clone(),
            self.config.data_dir(),
            self.config.backup_dir(),
        ] {
            if dir.is_dir() {
                continue;
            }
            if dir.exists() {
                return Err(VaultError::config(format!(
                    "vault home path {} exists but is not a directory",
                    dir.display()
                )));
            }
            fs::create_dir_all(&dir)
                .map_err(|e| VaultError::io("create vault home", &dir, e))?;
            log::debug!("Created vault home directory {}", dir.display());
        }
        Ok(())
    }

    // Current VFS ---------------------------------------------------------

    pub fn set_current_vfs(&mut self, vfs: VfsMeta) {
        log::debug!("Using VFS \"{}\"", vfs.name);
        self.current_vfs = Some(vfs);
    }

    pub fn current_vfs(&self) -> VaultResult<&VfsMeta> {
        self.current_vfs
            .as_ref()
            .ok_or_else(|| VaultError::config("no VFS selected for this command"))
    }

    /// Metadata directory of the current VFS.
    pub fn vfs_dir(&self) -> VaultResult<PathBuf> {
        Ok(self.config.vfs_dir(&self.current_vfs()?.name))
    }

    pub fn collections_dir(&self) -> VaultResult<PathBuf> {
        Ok(self.vfs_dir()?.join(COLLECTIONS_DIR))
    }

    pub fn collection_dir(&self, name: &str) -> VaultResult<PathBuf> {
        Ok(self.collections_dir()?.join(name))
    }

    pub fn collection_meta_file(&self, name: &str) -> VaultResult<PathBuf> {
        Ok(self.collection_dir(name)?.join(COLLECTION_META_FILE))
    }

    pub fn collection_stats_file(&self, name: &str) -> VaultResult<PathBuf> {
        Ok(self.collection_dir(name)?.join(COLLECTION_STATS_FILE))
    }

    pub fn filters_dir(&self) -> VaultResult<PathBuf> {
        Ok(self.vfs_dir()?.join(FILTERS_DIR))
    }

    pub fn discs_file(&self) -> VaultResult<PathBuf> {
        Ok(self.vfs_dir()?.join(DISCS_FILE))
    }

    pub fn save_maps_file(&self) -> VaultResult<PathBuf> {
        Ok(self.vfs_dir()?.join(SAVE_MAPS_FILE))
    }

    pub fn save_status_file(&self) -> VaultResult<PathBuf> {
        Ok(self.vfs_dir()?.join(SAVE_STATUS_FILE))
    }

    // VFS registry --------------------------------------------------------

    /// Read metadata for every VFS under the vault home.
    pub fn all_vfs(&self) -> VaultResult<Vec<VfsMeta>> {
        let data_dir = self.config.data_dir();
        if !data_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut result = Vec::new();
        let mut entries: Vec<_> = fs::read_dir(&data_dir)
            .map_err(|e| VaultError::io("read directory", &data_dir, e))?
            .filter_map(Result::ok)
            .collect();
        entries.sort_by_key(|entry| entry.file_name());
        for entry in entries {
            if !entry.path().is_dir() {
                continue;
            }
            let meta_path = entry.path().join(VFS_META_FILE);
            match self.store.read::<VfsMeta>(&meta_path, META_DOC_VERSION)? {
                Some(meta) => result.push(meta),
                None => log::warn!(
                    "Skipping VFS directory without metadata: {}",
                    entry.path().display()
                ),
            }
        }
        Ok(result)
    }

    pub fn vfs_by_name(&self, name: &str) -> VaultResult<Option<VfsMeta>> {
        Ok(self.all_vfs()?.into_iter().find(|vfs| vfs.name == name))
    }

    /// Find the VFS whose virtual base contains `path`.
    pub fn vfs_by_path(&self, path: &Path) -> VaultResult<Option<VfsMeta>> {
        Ok(self
            .all_vfs()?
            .into_iter()
            .find(|vfs| is_within(path, &vfs.virtual_base)))
    }

    // Disc registry -------------------------------------------------------

    pub fn discs(&mut self) -> VaultResult<Vec<DiscMeta>> {
        if self.discs.is_none() {
            let path = self.discs_file()?;
            let list: Vec<DiscMeta> = self
                .store
                .read(&path, META_DOC_VERSION)?
                .unwrap_or_default();
            log::debug!("Loaded {} discs", list.len());
            self.discs = Some(list);
        }
        Ok(self.discs.clone().unwrap_or_default())
    }

    pub fn disc_by_name(&mut self, name: &str) -> VaultResult<Option<DiscMeta>> {
        Ok(self.discs()?.into_iter().find(|disc| disc.name == name))
    }

    /// Find the disc owning `path` by longest matching base prefix.
    /// Nested bases are not rejected here, so longest-prefix keeps the
    /// answer deterministic either way.
    pub fn disc_by_path(&mut self, path: &Path) -> VaultResult<Option<DiscMeta>> {
        Ok(self
            .discs()?
            .into_iter()
            .filter(|disc| is_within(path, &disc.base_path))
            .max_by_key(|disc| disc.base_path.components().count()))
    }

    pub fn invalidate_discs(&mut self) {
        log::debug!("Invalidating disc cache");
        self.discs = None;
    }

    // Save-map registry ---------------------------------------------------

    pub fn save_maps(&mut self) -> VaultResult<Vec<SaveMapping>> {
        if self.save_maps.is_none() {
            let path = self.save_maps_file()?;
            let list: Vec<SaveMapping> = self
                .store
                .read(&path, META_DOC_VERSION)?
                .unwrap_or_default();
            log::debug!("Loaded {} save mappings", list.len());
            self.save_maps = Some(list);
        }
        Ok(self.save_maps.clone().unwrap_or_default())
    }

    pub fn save_map_for_virtual(&mut self, path: &Path) -> VaultResult<Option<SaveMapping>> {
        Ok(self
            .save_maps()?
            .into_iter()
            .filter(|mapping| is_within(path, &mapping.virtual_dir))
            .max_by_key(|mapping| mapping.virtual_dir.components().count()))
    }

    pub fn save_map_for_actual(&mut self, path: &Path) -> VaultResult<Option<SaveMapping>> {
        Ok(self
            .save_maps()?
            .into_iter()
            .filter(|mapping| is_within(path, &mapping.actual_dir))
            .max_by_key(|mapping| mapping.actual_dir.components().count()))
    }

    pub fn invalidate_save_maps(&mut self) {
        log::debug!("Invalidating save-map cache");
        self.save_maps = None;
    }

    // Collection registry -------------------------------------------------

    pub fn collections(&mut self) -> VaultResult<Vec<CollectionMeta>> {
        if self.collections.is_none() {
            let dir = self.collections_dir()?;
            let mut list = Vec::new();
            if dir.is_dir() {
                let mut entries: Vec<_> = fs::read_dir(&dir)
                    .map_err(|e| VaultError::io("read directory", &dir, e))?
                    .filter_map(Result::ok)
                    .collect();
                entries.sort_by_key(|entry| entry.file_name());
                for entry in entries {
                    if !entry.path().is_dir() {
                        continue;
                    }
                    let meta_path = entry.path().join(COLLECTION_META_FILE);
                    match self
                        .store
                        .read::<CollectionMeta>(&meta_path, META_DOC_VERSION)?
                    {
                        Some(meta) => list.push(meta),
                        None => log::warn!(
                            "Skipping collection directory without metadata: {}",
                            entry.path().display()
                        ),
                    }
                }
            }
            log::debug!("Loaded {} collections", list.len());
            self.collections = Some(list);
        }
        Ok(self.collections.clone().unwrap_or_default())
    }

    pub fn collection_by_name(&mut self, name: &str) -> VaultResult<Option<CollectionMeta>> {
        Ok(self.collections()?.into_iter().find(|col| col.name == name))
    }

    /// Find the collection whose actual base contains `path`.
    pub fn collection_by_path(&mut self, path: &Path) -> VaultResult<Option<CollectionMeta>> {
        Ok(self
            .collections()?
            .into_iter()
            .filter(|col| is_within(path, &col.actual_base))
            .max_by_key(|col| col.actual_base.components().count()))
    }

    /// Drop the collection list along with everything derived from it.
    pub fn invalidate_collections(&mut self) {
        log::debug!("Invalidating collection caches");
        self.collections = None;
        self.invalidate_index();
    }

    /// Drop the location-index caches (per-collection stats and the
    /// actual→virtual map) without touching the collection list. Stats
    /// maps with unflushed mutations are kept so no delayed write is lost.
    pub fn invalidate_index(&mut self) {
        log::debug!("Invalidating location index caches");
        let dirty = self.dirty_stats.clone();
        self.stats.retain(|name, _| dirty.contains(name));
        self.a2v = None;
    }

    pub fn invalidate_a2v(&mut self) {
        self.a2v = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_session(home: &Path) -> Session {
        let config = VaultConfig {
            home: home.to_path_buf(),
        };
        let session = Session::new(config);
        session.ensure_home().unwrap();
        session
    }

    #[test]
    fn test_ensure_home_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("vault");
        let session = test_session(&home);
        assert!(session.config.data_dir().is_dir());
        assert!(session.config.backup_dir().is_dir());
    }

    #[test]
    fn test_ensure_home_rejects_file_in_the_way() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("vault");
        fs::write(&home, b"not a dir").unwrap();
        let config = VaultConfig { home };
        let session = Session::new(config);
        assert!(matches!(
            session.ensure_home(),
            Err(VaultError::Config { .. })
        ));
    }

    #[test]
    fn test_current_vfs_unset_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());
        assert!(matches!(
            session.current_vfs(),
            Err(VaultError::Config { .. })
        ));
    }

    #[test]
    fn test_disc_by_path_prefers_longest_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = test_session(dir.path());
        session.set_current_vfs(VfsMeta {
            name: "main".to_string(),
            virtual_base: dir.path().join("virtual"),
        });
        let discs = vec![
            DiscMeta {
                name: "outer".to_string(),
                base_path: "/mnt".into(),
                capacity: None,
            },
            DiscMeta {
                name: "inner".to_string(),
                base_path: "/mnt/deep".into(),
                capacity: None,
            },
        ];
        let path = session.discs_file().unwrap();
        session
            .store
            .write(&path, &discs, META_DOC_VERSION, false)
            .unwrap();

        let found = session
            .disc_by_path(Path::new("/mnt/deep/file.bin"))
            .unwrap()
            .unwrap();
        assert_eq!(found.name, "inner");
        let found = session
            .disc_by_path(Path::new("/mnt/shallow.bin"))
            .unwrap()
            .unwrap();
        assert_eq!(found.name, "outer");
        assert!(
            session
                .disc_by_path(Path::new("/elsewhere"))
                .unwrap()
                .is_none()
        );
    }
}
