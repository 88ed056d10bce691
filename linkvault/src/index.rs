//! Location index: cached stat records per collection and the derived
//! actual→virtual map
//!
//! Stat records are persisted per collection in its stats document.
//! Mutations only mark the collection dirty; `flush_stats` writes every
//! dirty document once, at command exit, mirroring the delayed-write
//! behaviour of the registries. The actual→virtual map is never persisted:
//! it is rebuilt from a full walk of the virtual tree whenever needed,
//! because a full rebuild is the only strategy that stays correct when
//! several links share one target and discovery order decides which link
//! is canonical.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use linkvault_common::{FileRecord, VaultError, VaultResult};

use crate::session::{META_DOC_VERSION, Session};
use crate::vfs;

impl Session {
    /// Stat records of one collection, keyed by actual path.
    pub fn collection_stats(
        &mut self,
        name: &str,
    ) -> VaultResult<&BTreeMap<PathBuf, FileRecord>> {
        if !self.stats.contains_key(name) {
            let path = self.collection_stats_file(name)?;
            let map: BTreeMap<PathBuf, FileRecord> = self
                .store
                .read(&path, META_DOC_VERSION)?
                .unwrap_or_default();
            log::debug!("Loaded {} stat records for collection {}", map.len(), name);
            self.stats.insert(name.to_string(), map);
        }
        Ok(&self.stats[name])
    }

    /// All stat records across every collection. Overlapping actual paths
    /// between collections are reported, last one wins.
    pub fn all_stats(&mut self) -> VaultResult<BTreeMap<PathBuf, FileRecord>> {
        let mut merged = BTreeMap::new();
        for col in self.collections()? {
            let before = merged.len();
            let stats = self.collection_stats(&col.name)?;
            let added = stats.len();
            merged.extend(stats.iter().map(|(k, v)| (k.clone(), v.clone())));
            let overlap = before + added - merged.len();
            if overlap > 0 {
                log::warn!(
                    "Collection {} overlaps {} stat records from other collections",
                    col.name,
                    overlap
                );
            }
        }
        Ok(merged)
    }

    /// Look up the stat record of an actual path.
    pub fn stats_for_actual(&mut self, actual_path: &Path) -> VaultResult<Option<FileRecord>> {
        let Some(col) = self.collection_by_path(actual_path)? else {
            return Ok(None);
        };
        Ok(self.collection_stats(&col.name)?.get(actual_path).cloned())
    }

    /// Look up the stat record behind a virtual symlink.
    pub fn stats_for_symlink(&mut self, link_path: &Path) -> VaultResult<Option<FileRecord>> {
        let target =
            fs::read_link(link_path).map_err(|e| VaultError::io("read symlink", link_path, e))?;
        self.stats_for_actual(&target)
    }

    /// Insert or replace a stat record. The owning collection's stats
    /// document is marked dirty and written out by `flush_stats`.
    pub fn add_record(&mut self, record: FileRecord) -> VaultResult<()> {
        let col = self
            .collection_by_path(&record.actual_path)?
            .ok_or_else(|| {
                VaultError::config(format!(
                    "actual path {} is not part of any collection",
                    record.actual_path.display()
                ))
            })?;
        self.collection_stats(&col.name)?;
        let map = self.stats.get_mut(&col.name).expect("stats just loaded");
        log::debug!(
            "Recording stats for {} ({} bytes)",
            record.actual_path.display(),
            record.size
        );
        map.insert(record.actual_path.clone(), record);
        self.dirty_stats.insert(col.name);
        Ok(())
    }

    /// Remove a stat record, along with its derived actual→virtual entry.
    pub fn remove_record(&mut self, actual_path: &Path) -> VaultResult<()> {
        let col = self.collection_by_path(actual_path)?.ok_or_else(|| {
            VaultError::config(format!(
                "actual path {} is not part of any collection",
                actual_path.display()
            ))
        })?;
        self.collection_stats(&col.name)?;
        let map = self.stats.get_mut(&col.name).expect("stats just loaded");
        map.remove(actual_path);
        self.dirty_stats.insert(col.name);
        if let Some(a2v) = self.a2v.as_mut() {
            a2v.remove(actual_path);
        }
        Ok(())
    }

    /// Write every dirty stats document. Called once at command exit (and
    /// after a save finishes), matching the delayed-write contract.
    pub fn flush_stats(&mut self) -> VaultResult<()> {
        let dirty: Vec<String> = self.dirty_stats.drain().collect();
        for name in dirty {
            let path = self.collection_stats_file(&name)?;
            let map = self.stats.get(&name).cloned().unwrap_or_default();
            self.store.write(&path, &map, META_DOC_VERSION, false)?;
        }
        Ok(())
    }

    /// The derived map from actual path to the ordered list of virtual
    /// symlinks resolving to it. Built by one full walk of the virtual
    /// tree; symlinks without a stat record are orphans and excluded.
    pub fn actual_to_virtual(&mut self) -> VaultResult<&BTreeMap<PathBuf, Vec<PathBuf>>> {
        if self.a2v.is_none() {
            let virtual_base = self.current_vfs()?.virtual_base.clone();
            log::debug!("Building actual-to-virtual map for {}", virtual_base.display());
            let mut map: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
            let mut mapped = 0usize;
            for group in vfs::vfs_walk(&virtual_base)? {
                for file in &group.files {
                    let is_link = file
                        .symlink_metadata()
                        .map(|m| m.file_type().is_symlink())
                        .unwrap_or(false);
                    if !is_link {
                        continue;
                    }
                    if let Some(stats) = self.stats_for_symlink(file)? {
                        map.entry(stats.actual_path).or_default().push(file.clone());
                        mapped += 1;
                    }
                }
            }
            log::debug!("Actual-to-virtual map built, {mapped} links mapped");
            self.a2v = Some(map);
        }
        Ok(self.a2v.as_ref().expect("map just built"))
    }

    /// Links currently resolving to `actual_path`, if any.
    pub fn links_for_actual(&mut self, actual_path: &Path) -> VaultResult<Option<Vec<PathBuf>>> {
        Ok(self.actual_to_virtual()?.get(actual_path).cloned())
    }

    // In-place adjustments used by the save executor while it relocates
    // content. They keep the already-built map consistent with the
    // executor's own mutations without paying for a rebuild per file.

    pub(crate) fn a2v_set(&mut self, actual_path: PathBuf, links: Vec<PathBuf>) {
        if let Some(a2v) = self.a2v.as_mut() {
            a2v.insert(actual_path, links);
        }
    }

    pub(crate) fn a2v_remove(&mut self, actual_path: &Path) {
        if let Some(a2v) = self.a2v.as_mut() {
            a2v.remove(actual_path);
        }
    }

    pub(crate) fn a2v_remove_link(&mut self, actual_path: &Path, link: &Path) {
        if let Some(a2v) = self.a2v.as_mut() {
            if let Some(links) = a2v.get_mut(actual_path) {
                links.retain(|candidate| candidate != link);
                if links.is_empty() {
                    a2v.remove(actual_path);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection;
    use crate::testutil::VaultFixture;

    #[test]
    fn test_stats_lookup_and_mutation() {
        let fx = VaultFixture::new();
        let mut session = fx.session();
        fx.write_actual("disc-a/photos/one.jpg", 100);
        fx.write_actual("disc-a/photos/two.jpg", 50);
        collection::add_collection(&mut session, "photos", &fx.actual_path("disc-a/photos"))
            .unwrap();

        let one = fx.actual_path("disc-a/photos/one.jpg");
        let record = session.stats_for_actual(&one).unwrap().unwrap();
        assert_eq!(record.size, 100);

        session.remove_record(&one).unwrap();
        assert!(session.stats_for_actual(&one).unwrap().is_none());

        // Dirty stats only hit disk on flush.
        let mut fresh = fx.session();
        fresh.set_current_vfs(session.current_vfs().unwrap().clone());
        assert!(fresh.stats_for_actual(&one).unwrap().is_some());
        session.flush_stats().unwrap();
        let mut fresh = fx.session();
        fresh.set_current_vfs(session.current_vfs().unwrap().clone());
        assert!(fresh.stats_for_actual(&one).unwrap().is_none());
    }

    #[test]
    fn test_actual_to_virtual_groups_links() {
        let fx = VaultFixture::new();
        let mut session = fx.session();
        fx.write_actual("disc-a/photos/one.jpg", 100);
        collection::add_collection(&mut session, "photos", &fx.actual_path("disc-a/photos"))
            .unwrap();

        // A second link to the same target, discovered after the first.
        let virtual_base = session.current_vfs().unwrap().virtual_base.clone();
        crate::fsutil::create_symlink(
            &fx.actual_path("disc-a/photos/one.jpg"),
            &virtual_base.join("photos/zz-extra.jpg"),
            false,
        )
        .unwrap();

        let map = session.actual_to_virtual().unwrap();
        let links = &map[&fx.actual_path("disc-a/photos/one.jpg")];
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], virtual_base.join("photos/one.jpg"));
        assert_eq!(links[1], virtual_base.join("photos/zz-extra.jpg"));
    }

    #[test]
    fn test_orphan_links_are_excluded() {
        let fx = VaultFixture::new();
        let mut session = fx.session();
        fx.write_actual("disc-a/photos/one.jpg", 10);
        collection::add_collection(&mut session, "photos", &fx.actual_path("disc-a/photos"))
            .unwrap();

        let virtual_base = session.current_vfs().unwrap().virtual_base.clone();
        crate::fsutil::create_symlink(
            Path::new("/nowhere/untracked.bin"),
            &virtual_base.join("photos/orphan.bin"),
            false,
        )
        .unwrap();

        let map = session.actual_to_virtual().unwrap();
        assert!(!map.contains_key(Path::new("/nowhere/untracked.bin")));
        assert_eq!(map.len(), 1);
    }
}
