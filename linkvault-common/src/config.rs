// Centralized configuration for Linkvault

use std::path::PathBuf;

use serde::Deserialize;

/// Name of the directory under the vault home holding per-VFS metadata.
pub const DATA_DIR: &str = "data";
/// Name of the directory under the vault home holding VFS backups.
pub const BACKUP_DIR: &str = "backup";
/// Per-VFS directory holding one subdirectory per collection.
pub const COLLECTIONS_DIR: &str = "collections";
/// Per-VFS directory holding one subdirectory per applied filter.
pub const FILTERS_DIR: &str = "filters";

/// Metadata document names.
pub const VFS_META_FILE: &str = "meta.json";
pub const COLLECTION_META_FILE: &str = "meta.json";
pub const COLLECTION_STATS_FILE: &str = "stats.json";
pub const DISCS_FILE: &str = "discs.json";
pub const SAVE_MAPS_FILE: &str = "save-maps.json";
pub const SAVE_STATUS_FILE: &str = "save-status.json";
pub const BACKUP_META_FILE: &str = "meta.json";
/// Subdirectories inside one backup.
pub const BACKUP_VFS_DIR: &str = "vfs";
pub const BACKUP_VIRTUAL_DIR: &str = "virtual";

/// Extension marking linkvault-internal files inside the virtual tree.
/// Walkers never treat these as content.
pub const VAULT_FILE_EXT: &str = "lv";
/// Suffix (before the vault extension) of property sidecar files.
pub const PROP_FILE_SUFFIX: &str = "props";

/// Nominal byte weight of a directory in transfer aggregation. Keeps
/// directory creation steps visible to the capacity math without letting
/// them compete with real content.
pub const DIR_NOMINAL_SIZE: u64 = 1;

/// Property name used to mark a virtual directory as frozen.
pub const FREEZE_PROP: &str = "frozen";

/// Optional overrides read from the config file.
#[derive(Debug, Default, Deserialize)]
struct FileOverrides {
    home: Option<PathBuf>,
}

/// Linkvault configuration with file and environment overrides.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Vault home directory, holding `data/` and `backup/`.
    pub home: PathBuf,
}

impl Default for VaultConfig {
    fn default() -> Self {
        let home = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".linkvault")
            .join("home");
        Self { home }
    }
}

impl VaultConfig {
    /// Path of the optional configuration file
    /// (`~/.config/linkvault/config.toml`).
    pub fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("linkvault").join("config.toml"))
    }

    /// Resolve the configuration: defaults, then the config file, then
    /// environment variables.
    ///
    /// Supported environment variables:
    /// - `LINKVAULT_HOME`: override the vault home directory
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(path) = Self::config_file_path() {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                match toml::from_str::<FileOverrides>(&contents) {
                    Ok(overrides) => {
                        if let Some(home) = overrides.home {
                            config.home = home;
                        }
                    }
                    Err(err) => {
                        log::warn!("Ignoring invalid config file {}: {}", path.display(), err);
                    }
                }
            }
        }

        if let Ok(home) = std::env::var("LINKVAULT_HOME") {
            config.home = PathBuf::from(home);
        }

        config
    }

    /// Directory holding per-VFS metadata.
    pub fn data_dir(&self) -> PathBuf {
        self.home.join(DATA_DIR)
    }

    /// Directory holding VFS backups.
    pub fn backup_dir(&self) -> PathBuf {
        self.home.join(BACKUP_DIR)
    }

    /// Metadata directory of one VFS.
    pub fn vfs_dir(&self, vfs_name: &str) -> PathBuf {
        self.data_dir().join(vfs_name)
    }
}

/// Check whether a file name marks a linkvault-internal file.
pub fn is_vault_file(name: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .is_some_and(|ext| ext == VAULT_FILE_EXT)
}
