//! Metadata records persisted by the metadata store
//!
//! Every record here is a plain serde struct written as part of a
//! versioned JSON document. Registry documents (discs, save maps) hold
//! lists of these records; collection stat documents map actual paths to
//! `FileRecord`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::PathBuf;

/// A virtual file system: a named tree of symlinks mirroring one or more
/// collections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VfsMeta {
    pub name: String,
    /// Root directory of the virtual tree.
    pub virtual_base: PathBuf,
}

/// A registered content collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionMeta {
    pub name: String,
    /// Directory holding the collection's physical content.
    pub actual_base: PathBuf,
    /// Directory inside the VFS the collection was originally mirrored to.
    pub virtual_base: PathBuf,
}

/// Cached stat metadata of one physical file. The location index is the
/// set of these records across all collections, keyed by actual path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub actual_path: PathBuf,
    /// Inode change time, seconds since the epoch.
    pub ctime: i64,
    /// Content modification time, seconds since the epoch.
    pub mtime: i64,
    pub size: u64,
}

impl FileRecord {
    /// Build a record from `lstat`-style metadata.
    pub fn from_metadata(actual_path: impl Into<PathBuf>, meta: &Metadata) -> Self {
        #[cfg(unix)]
        let (ctime, mtime) = {
            use std::os::unix::fs::MetadataExt;
            (meta.ctime(), meta.mtime())
        };
        #[cfg(not(unix))]
        let (ctime, mtime) = {
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            (modified, modified)
        };

        Self {
            actual_path: actual_path.into(),
            ctime,
            mtime,
            size: meta.len(),
        }
    }
}

/// A named physical storage volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscMeta {
    pub name: String,
    /// Mount point or directory where the disc's content lives.
    pub base_path: PathBuf,
    /// Advisory capacity in bytes. `None` means unlimited.
    #[serde(default)]
    pub capacity: Option<u64>,
}

/// Declared mapping from a virtual directory to the physical directory it
/// must be materialized into during a save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaveMapping {
    pub virtual_dir: PathBuf,
    pub actual_dir: PathBuf,
}

/// Record of one VFS backup under the vault home.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupMeta {
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    /// Name of the VFS the backup was taken from.
    pub vfs: String,
    /// Virtual base at backup time, used to restore in place.
    pub virtual_base: PathBuf,
    pub created: DateTime<Utc>,
}
