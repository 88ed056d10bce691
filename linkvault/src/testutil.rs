//! Shared fixtures for filesystem-backed tests
//!
//! A `VaultFixture` is one temporary directory holding a vault home, a
//! VFS named "main" (virtual base at `<tmp>/trees/main`) and a `discs/`
//! area for simulated physical volumes.

use std::fs;
use std::path::{Path, PathBuf};

use linkvault_common::{DiscMeta, VaultConfig};

use crate::session::{META_DOC_VERSION, Session};
use crate::vfs;

pub struct VaultFixture {
    _tmp: tempfile::TempDir,
    pub root: PathBuf,
}

impl VaultFixture {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        fs::create_dir_all(root.join("trees")).unwrap();
        fs::create_dir_all(root.join("discs")).unwrap();

        let mut session = Session::new(VaultConfig {
            home: root.join("home"),
        });
        session.ensure_home().unwrap();
        vfs::new_vfs(&mut session, "main", &root.join("trees")).unwrap();

        Self { _tmp: tmp, root }
    }

    /// A fresh session with the fixture's VFS selected.
    pub fn session(&self) -> Session {
        let mut session = Session::new(VaultConfig {
            home: self.root.join("home"),
        });
        session.ensure_home().unwrap();
        let vfs = session.vfs_by_name("main").unwrap().unwrap();
        session.set_current_vfs(vfs);
        session
    }

    pub fn virtual_base(&self) -> PathBuf {
        self.root.join("trees/main")
    }

    /// Path inside the simulated disc area.
    pub fn actual_path(&self, rel: &str) -> PathBuf {
        self.root.join("discs").join(rel)
    }

    /// Create an actual file of `size` zero bytes, with parents.
    pub fn write_actual(&self, rel: &str, size: usize) -> PathBuf {
        let path = self.actual_path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, vec![0u8; size]).unwrap();
        path
    }

    /// Register a disc rooted at `discs/<rel>`, creating the directory.
    pub fn add_disc(&self, session: &mut Session, name: &str, rel: &str, capacity: Option<u64>) {
        let base = self.actual_path(rel);
        fs::create_dir_all(&base).unwrap();
        let mut discs: Vec<DiscMeta> = session.discs().unwrap();
        discs.push(DiscMeta {
            name: name.to_string(),
            base_path: base,
            capacity,
        });
        let path = session.discs_file().unwrap();
        session
            .store
            .write(&path, &discs, META_DOC_VERSION, false)
            .unwrap();
        session.invalidate_discs();
    }

    /// Read a symlink's target, panicking when the path is not a link.
    pub fn link_target(path: &Path) -> PathBuf {
        fs::read_link(path).unwrap()
    }
}
