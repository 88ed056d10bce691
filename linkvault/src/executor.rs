//! Save executor: walks the persisted scheme and performs the work
//!
//! Execution is strictly sequential: scheme steps in order, and within a
//! step, status entries in order. The save status is rewritten after
//! every completed unit, which is the sole durability mechanism — there
//! is no write-ahead log. The physical operation happens before the
//! persistence call, so a crash in that narrow window can leave a moved
//! file already relinked while its status still reads pending; on retry
//! the stale unit is skipped through the source-equals-destination check
//! or surfaces as a warning. This matches the documented recovery
//! contract rather than closing the window.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use linkvault_common::{
    SaveMode, SaveStatus, SchemeStep, VaultError, VaultResult, format_bytes,
};
use walkdir::WalkDir;

use crate::console::{Console, print_save_options};
use crate::fsutil;
use crate::planner;
use crate::savemap;
use crate::session::{SAVE_STATUS_DOC_VERSION, Session};

/// CLI-facing options of one `save` invocation.
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    pub mode: SaveMode,
    /// Discard prior progress and replan from scratch.
    pub restart: bool,
    /// Delete the save-status document after full completion.
    pub delete_save_file: bool,
}

/// Run a save with the real connectivity probe.
pub fn run_save(session: &mut Session, options: SaveOptions, console: &Console) -> VaultResult<()> {
    run_save_with_probe(session, options, console, &|path: &Path| path.is_dir())
}

/// Run a save with an injectable disc-connectivity probe.
pub fn run_save_with_probe(
    session: &mut Session,
    options: SaveOptions,
    console: &Console,
    probe: &dyn Fn(&Path) -> bool,
) -> VaultResult<()> {
    let save_path = session.save_status_file()?;

    let status = if options.restart || !save_path.exists() {
        log::info!("Performing validations before saving");
        let status = planner::generate_save_status(session, options.mode)?;
        session
            .store
            .write(&save_path, &status, SAVE_STATUS_DOC_VERSION, false)?;
        status
    } else {
        log::info!("Loading existing save progress");
        let status: SaveStatus = session
            .store
            .read(&save_path, SAVE_STATUS_DOC_VERSION)
            .map_err(|e| match e {
                VaultError::Meta { path, detail } => VaultError::meta(
                    path,
                    format!("{detail}; pass --restart to discard the unfinished save"),
                ),
                other => other,
            })?
            .ok_or_else(|| VaultError::meta(&save_path, "unfinished save file disappeared"))?;
        if status.mode != options.mode {
            log::warn!(
                "Resuming unfinished save in {} mode (requested {})",
                status.mode.as_str(),
                options.mode.as_str()
            );
        }
        status
    };

    let mut run = SaveRun {
        session,
        status,
        save_path: save_path.clone(),
        console,
        probe,
    };

    let result = run.execute();
    // Whatever happened, the delayed stat documents must hit disk so the
    // persisted index matches the persisted status.
    if let Err(flush_err) = run.session.flush_stats() {
        log::warn!("Failed to flush stat documents: {flush_err}");
    }

    match result {
        Ok(()) => {}
        Err(VaultError::Interrupted) => {
            log::info!("Save paused; progress has been persisted");
            return Ok(());
        }
        Err(other) => return Err(other),
    }

    if options.delete_save_file {
        run.session.store.remove(&save_path)?;
        log::info!("Deleted save progress file");
    }
    log::info!("Save complete");
    Ok(())
}

struct SaveRun<'a> {
    session: &'a mut Session,
    status: SaveStatus,
    save_path: PathBuf,
    console: &'a Console,
    probe: &'a dyn Fn(&Path) -> bool,
}

impl SaveRun<'_> {
    fn execute(&mut self) -> VaultResult<()> {
        // The link-count map drives the move/copy decision per file and is
        // adjusted in place as content relocates.
        self.session.actual_to_virtual()?;

        let total = self.status.scheme.len();
        log::info!("Performing disc transfers and deletions");
        for step_idx in 0..total {
            if self.status.scheme[step_idx].is_completed() {
                log::debug!("Scheme step {} is already completed", step_idx + 1);
                continue;
            }
            let step = self.status.scheme[step_idx].clone();
            log::info!(
                "Executing part {} of {} of the save scheme: {}",
                step_idx + 1,
                total,
                step.describe()
            );
            match &step {
                SchemeStep::Deletion { disc, .. } => {
                    self.ensure_connected(disc)?;
                    self.run_deletion_step(step_idx, disc)?;
                }
                SchemeStep::Transfer {
                    source_disc,
                    dest_disc,
                    ..
                } => {
                    self.ensure_connected(source_disc)?;
                    if dest_disc != source_disc {
                        self.ensure_connected(dest_disc)?;
                    }
                    self.run_transfer_step(step_idx, source_disc, dest_disc)?;
                }
            }
            self.status.scheme[step_idx].mark_completed();
            self.persist()?;
        }
        log::info!("Disc transfers and deletions completed successfully");

        if !self.status.cleanup_done {
            log::info!("Cleaning up discs");
            self.cleanup()?;
            self.status.cleanup_done = true;
            self.persist()?;
            log::info!("Disc cleanup complete");
        }
        Ok(())
    }

    fn run_deletion_step(&mut self, step_idx: usize, disc: &str) -> VaultResult<()> {
        let count = self
            .status
            .deletions_for(disc)
            .map(|group| group.entries.len())
            .unwrap_or(0);
        for entry_idx in 0..count {
            let entry = self.status.deletions_for(disc).expect("group exists").entries[entry_idx]
                .clone();
            if entry.completed {
                continue;
            }
            self.checkpoint(step_idx)?;
            self.delete_file(disc, entry_idx, &entry.actual_path)?;
        }
        Ok(())
    }

    fn delete_file(&mut self, disc: &str, entry_idx: usize, actual_path: &Path) -> VaultResult<()> {
        log::debug!("Deleting file {}", actual_path.display());
        match fs::remove_file(actual_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("File {} was already gone", actual_path.display());
            }
            Err(e) => return Err(VaultError::io("delete file", actual_path, e)),
        }
        self.status
            .deletions_for_mut(disc)
            .expect("group exists")
            .entries[entry_idx]
            .completed = true;
        self.persist()?;
        self.session.remove_record(actual_path)?;
        Ok(())
    }

    fn run_transfer_step(
        &mut self,
        step_idx: usize,
        source_disc: &str,
        dest_disc: &str,
    ) -> VaultResult<()> {
        let count = self
            .status
            .transfers_for(source_disc, dest_disc)
            .map(|pair| pair.entries.len())
            .unwrap_or(0);
        for entry_idx in 0..count {
            if self.status.scheme[step_idx].is_completed() {
                // The step's byte budget ran out: the remaining entries
                // roll into a later step for the same pair.
                log::debug!("Scheme step budget exhausted, deferring remaining entries");
                break;
            }
            let entry = self
                .status
                .transfers_for(source_disc, dest_disc)
                .expect("pair exists")
                .entries[entry_idx]
                .clone();
            if entry.completed {
                continue;
            }
            self.checkpoint(step_idx)?;

            let meta = entry
                .virtual_path
                .symlink_metadata()
                .map_err(|e| VaultError::io("stat", &entry.virtual_path, e))?;
            let is_dir = meta.is_dir() && !meta.file_type().is_symlink();
            if is_dir {
                self.save_dir(source_disc, dest_disc, entry_idx, &entry.virtual_path)?;
            } else {
                self.save_file(step_idx, source_disc, dest_disc, entry_idx, &entry.virtual_path)?;
            }
        }
        Ok(())
    }

    /// Materialize a virtual directory at its destination. Nothing is
    /// transferred: an existing destination directory is success.
    fn save_dir(
        &mut self,
        source_disc: &str,
        dest_disc: &str,
        entry_idx: usize,
        virtual_path: &Path,
    ) -> VaultResult<()> {
        let dest = savemap::resolve_virtual(self.session, virtual_path)?;
        log::debug!(
            "Saving directory {} -> {}",
            virtual_path.display(),
            dest.display()
        );
        fsutil::ensure_dir(&dest)?;
        self.mark_transfer_completed(source_disc, dest_disc, entry_idx);
        self.persist()
    }

    fn save_file(
        &mut self,
        step_idx: usize,
        source_disc: &str,
        dest_disc: &str,
        entry_idx: usize,
        virtual_path: &Path,
    ) -> VaultResult<()> {
        let mode = self.status.mode;
        let dest_path = savemap::resolve_virtual(self.session, virtual_path)?;
        let Some(stats) = self.session.stats_for_symlink(virtual_path)? else {
            log::warn!(
                "Stats missing for symlink {}, skipping the unit",
                virtual_path.display()
            );
            self.mark_transfer_completed(source_disc, dest_disc, entry_idx);
            return self.persist();
        };
        log::debug!(
            "Saving file {} -> {} ({} mode)",
            stats.actual_path.display(),
            dest_path.display(),
            mode.as_str()
        );

        // Already in place: nothing physical to do.
        if dest_path == stats.actual_path {
            self.mark_transfer_completed(source_disc, dest_disc, entry_idx);
            self.credit_bytes(step_idx, stats.size);
            return self.persist();
        }

        // A non-final step must not exceed its byte budget; the file
        // rolls into a later step for the same pair.
        let budget_left = match &self.status.scheme[step_idx] {
            SchemeStep::Transfer {
                byte_budget,
                bytes_done,
                is_final_for_pair: false,
                ..
            } => Some(byte_budget.saturating_sub(*bytes_done)),
            _ => None,
        };
        if let Some(left) = budget_left {
            if left < stats.size {
                log::debug!(
                    "Step budget left {} cannot hold {} bytes, completing step",
                    left,
                    stats.size
                );
                self.status.scheme[step_idx].mark_completed();
                return self.persist();
            }
        }

        if let Some(parent) = dest_path.parent() {
            fsutil::ensure_dir(parent)?;
        }

        // A retried unit may have left a half-written destination behind;
        // transfers overwrite it unconditionally.
        let dest_is_link = dest_path
            .symlink_metadata()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if dest_is_link {
            fsutil::remove_symlink(&dest_path, true)?;
        }

        let links = self.session.links_for_actual(&stats.actual_path)?;
        let move_content =
            mode == SaveMode::Move && links.as_ref().is_some_and(|l| l.len() == 1);
        let source_is_link = stats
            .actual_path
            .symlink_metadata()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        if move_content {
            if source_is_link {
                fsutil::copy_symlink(&stats.actual_path, &dest_path)?;
                fsutil::remove_symlink(&stats.actual_path, true)?;
            } else {
                fsutil::move_file(&stats.actual_path, &dest_path)?;
            }
            self.session.a2v_remove(&stats.actual_path);
        } else {
            if source_is_link {
                fsutil::copy_symlink(&stats.actual_path, &dest_path)?;
            } else {
                fsutil::copy_file(&stats.actual_path, &dest_path)?;
            }
            if mode == SaveMode::Move {
                match &links {
                    Some(l) if l.len() > 1 => self
                        .session
                        .a2v_remove_link(&stats.actual_path, virtual_path),
                    _ => self.session.a2v_remove(&stats.actual_path),
                }
            }
        }
        self.session
            .a2v_set(dest_path.clone(), vec![virtual_path.to_path_buf()]);

        self.mark_transfer_completed(source_disc, dest_disc, entry_idx);
        self.credit_bytes(step_idx, stats.size);
        self.persist()?;

        // Copy mode never repoints the VFS: the new placement is a
        // storage-layer copy, the virtual tree keeps its original target.
        if mode == SaveMode::Move {
            fsutil::remove_symlink(virtual_path, false)?;
            fsutil::create_symlink(&dest_path, virtual_path, false)?;
        }

        if move_content {
            self.session.remove_record(&stats.actual_path)?;
        }
        let mut record = stats;
        record.actual_path = dest_path;
        self.session.add_record(record)?;
        Ok(())
    }

    /// Remove actual directories that ended up empty and have no live
    /// virtual counterpart, bottom-up per collection. A disconnected disc
    /// here aborts the save: a partial cleanup pass could misclassify
    /// directories on the next run.
    fn cleanup(&mut self) -> VaultResult<()> {
        for col in self.session.collections()? {
            let disc = self
                .session
                .disc_by_path(&col.actual_base)?
                .ok_or_else(|| {
                    VaultError::config(format!(
                        "no disc is registered for collection \"{}\"",
                        col.name
                    ))
                })?;
            self.ensure_connected(&disc.name)?;

            let mut deletable: HashSet<PathBuf> = HashSet::new();
            let mut ordered: Vec<PathBuf> = Vec::new();
            for entry in WalkDir::new(&col.actual_base)
                .min_depth(1)
                .contents_first(true)
            {
                let entry = entry.map_err(|e| {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| col.actual_base.clone());
                    VaultError::io(
                        "scan directory",
                        path,
                        e.into_io_error()
                            .unwrap_or_else(|| std::io::Error::other("walk error")),
                    )
                })?;
                if !entry.file_type().is_dir() {
                    continue;
                }
                if self.dir_is_deletable(entry.path(), &deletable)? {
                    deletable.insert(entry.path().to_path_buf());
                    ordered.push(entry.path().to_path_buf());
                }
            }

            log::debug!(
                "Cleanup of collection \"{}\": {} directories to delete",
                col.name,
                ordered.len()
            );
            for dir in ordered {
                log::debug!("Removing directory {}", dir.display());
                fs::remove_dir(&dir).map_err(|e| VaultError::io("remove directory", &dir, e))?;
            }
        }
        Ok(())
    }

    /// A directory is deletable when it holds no files or links, every
    /// subdirectory below it was already judged deletable in this pass,
    /// and its save-mapped virtual counterpart is gone.
    fn dir_is_deletable(&mut self, dir: &Path, deletable: &HashSet<PathBuf>) -> VaultResult<bool> {
        if let Some(virtual_dir) = savemap::resolve_actual(self.session, dir)? {
            if virtual_dir.is_dir() {
                return Ok(false);
            }
        }
        let entries = fs::read_dir(dir).map_err(|e| VaultError::io("read directory", dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| VaultError::io("read directory", dir, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| VaultError::io("stat", entry.path(), e))?;
            if !file_type.is_dir() || !deletable.contains(&entry.path()) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Block until the disc's base path answers the connectivity probe.
    /// Non-interactive runs fail immediately; interactive runs prompt and
    /// re-probe until the medium appears or the operator gives up.
    fn ensure_connected(&mut self, disc_name: &str) -> VaultResult<()> {
        let disc = self.session.disc_by_name(disc_name)?.ok_or_else(|| {
            VaultError::config(format!("disc \"{disc_name}\" is not registered"))
        })?;
        if (self.probe)(&disc.base_path) {
            return Ok(());
        }
        if !self.console.is_interactive() {
            return Err(VaultError::disconnected(disc_name, disc.base_path));
        }

        log::info!(
            "Please connect disc \"{}\" at {} (press Enter to retry, type \"quit\" to abort)",
            disc_name,
            disc.base_path.display()
        );
        loop {
            if self.console.exit_requested() {
                return Err(VaultError::Interrupted);
            }
            if let Some(line) = self.console.wait_line(Duration::from_secs(1)) {
                if line.trim() == "quit" {
                    return Err(VaultError::disconnected(disc_name, disc.base_path));
                }
            }
            if (self.probe)(&disc.base_path) {
                log::info!("Disc \"{disc_name}\" is connected, resuming");
                return Ok(());
            }
        }
    }

    /// React to operator input gathered since the last unit of work.
    fn checkpoint(&mut self, step_idx: usize) -> VaultResult<()> {
        if self.console.exit_requested() {
            return Err(VaultError::Interrupted);
        }
        if self.console.take_show_options() {
            print_save_options();
        }
        if self.console.take_show_progress() {
            self.print_step_progress(step_idx);
        }
        if self.console.take_show_schemes() {
            self.print_schemes();
        }
        Ok(())
    }

    fn print_step_progress(&self, step_idx: usize) {
        match &self.status.scheme[step_idx] {
            SchemeStep::Deletion { disc, .. } => {
                if let Some(group) = self.status.deletions_for(disc) {
                    let done = group.entries.iter().filter(|e| e.completed).count();
                    log::info!(
                        "Deleting files from disc {}: {} of {} completed",
                        disc,
                        done,
                        group.entries.len()
                    );
                }
            }
            SchemeStep::Transfer {
                source_disc,
                dest_disc,
                bytes_done,
                ..
            } => {
                if let Some(pair) = self.status.transfers_for(source_disc, dest_disc) {
                    let done = pair.entries.iter().filter(|e| e.completed).count();
                    log::info!(
                        "Transferring from disc {} to disc {}: {} of {} completed ({})",
                        source_disc,
                        dest_disc,
                        done,
                        pair.entries.len(),
                        format_bytes(*bytes_done)
                    );
                }
            }
        }
    }

    fn print_schemes(&self) {
        println!("Details of all scheme steps:");
        for (i, step) in self.status.scheme.iter().enumerate() {
            println!(
                "Step {}\tcompleted: {}\t{}",
                i + 1,
                step.is_completed(),
                step.describe()
            );
        }
    }

    fn mark_transfer_completed(&mut self, source_disc: &str, dest_disc: &str, entry_idx: usize) {
        self.status
            .transfers_for_mut(source_disc, dest_disc)
            .expect("pair exists")
            .entries[entry_idx]
            .completed = true;
    }

    fn credit_bytes(&mut self, step_idx: usize, size: u64) {
        if let SchemeStep::Transfer { bytes_done, .. } = &mut self.status.scheme[step_idx] {
            *bytes_done += size;
        }
    }

    fn persist(&mut self) -> VaultResult<()> {
        self.session
            .store
            .write(&self.save_path, &self.status, SAVE_STATUS_DOC_VERSION, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::add_collection;
    use crate::savemap::add_save_map;
    use crate::testutil::VaultFixture;
    use linkvault_common::{PairTransfers, TransferStatus};
    use std::cell::Cell;

    /// disc-a holds collection "alpha" (one.bin 100, sub/two.bin 40),
    /// disc-b holds collection "beta" (keep.bin 10). Alpha is mapped
    /// across onto disc-b, beta onto itself.
    fn cross_mapped_setup(fx: &VaultFixture) -> Session {
        let mut session = fx.session();
        fx.write_actual("disc-a/alpha/one.bin", 100);
        fx.write_actual("disc-a/alpha/sub/two.bin", 40);
        fx.write_actual("disc-b/beta/keep.bin", 10);
        fx.add_disc(&mut session, "disc-a", "disc-a", None);
        fx.add_disc(&mut session, "disc-b", "disc-b", None);
        add_collection(&mut session, "alpha", &fx.actual_path("disc-a/alpha")).unwrap();
        add_collection(&mut session, "beta", &fx.actual_path("disc-b/beta")).unwrap();
        add_save_map(
            &mut session,
            &fx.virtual_base().join("alpha"),
            &fx.actual_path("disc-b/beta/alpha"),
        )
        .unwrap();
        add_save_map(
            &mut session,
            &fx.virtual_base().join("beta"),
            &fx.actual_path("disc-b/beta"),
        )
        .unwrap();
        session
    }

    fn options(mode: SaveMode) -> SaveOptions {
        SaveOptions {
            mode,
            restart: false,
            delete_save_file: false,
        }
    }

    #[test]
    fn test_copy_save_is_non_destructive() {
        let fx = VaultFixture::new();
        let mut session = cross_mapped_setup(&fx);
        let console = Console::disabled();

        run_save(&mut session, options(SaveMode::Copy), &console).unwrap();

        // New placements exist with full content.
        assert_eq!(
            fs::read(fx.actual_path("disc-b/beta/alpha/one.bin"))
                .unwrap()
                .len(),
            100
        );
        assert!(fx.actual_path("disc-b/beta/alpha/sub/two.bin").is_file());
        // Sources are untouched.
        assert!(fx.actual_path("disc-a/alpha/one.bin").is_file());
        assert!(fx.actual_path("disc-a/alpha/sub/two.bin").is_file());
        // Copy mode never repoints the virtual links.
        assert_eq!(
            VaultFixture::link_target(&fx.virtual_base().join("alpha/one.bin")),
            fx.actual_path("disc-a/alpha/one.bin")
        );

        // The index gained records for the copies and kept the originals.
        let mut fresh = fx.session();
        assert!(
            fresh
                .stats_for_actual(&fx.actual_path("disc-a/alpha/one.bin"))
                .unwrap()
                .is_some()
        );
        assert!(
            fresh
                .stats_for_actual(&fx.actual_path("disc-b/beta/alpha/one.bin"))
                .unwrap()
                .is_some()
        );

        // The persisted status is fully completed, with cleanup skipped.
        let status: SaveStatus = fresh
            .store
            .read(&fresh.save_status_file().unwrap(), SAVE_STATUS_DOC_VERSION)
            .unwrap()
            .unwrap();
        assert!(status.all_steps_completed());
        assert!(status.cleanup_done);
    }

    #[test]
    fn test_move_save_relocates_deletes_and_cleans_up() {
        let fx = VaultFixture::new();
        let mut session = cross_mapped_setup(&fx);
        // An indexed file whose virtual link was deleted: move mode must
        // remove it from disc.
        fx.write_actual("disc-a/alpha/orphan.bin", 30);
        crate::collection::sync_collection(&mut session, "alpha").unwrap();
        fs::remove_file(fx.virtual_base().join("alpha/orphan.bin")).unwrap();
        session.invalidate_a2v();

        let console = Console::disabled();
        let mut opts = options(SaveMode::Move);
        opts.delete_save_file = true;
        run_save(&mut session, opts, &console).unwrap();

        // Content moved, sources gone.
        assert_eq!(
            fs::read(fx.actual_path("disc-b/beta/alpha/one.bin"))
                .unwrap()
                .len(),
            100
        );
        assert!(!fx.actual_path("disc-a/alpha/one.bin").exists());
        assert!(fx.actual_path("disc-b/beta/alpha/sub/two.bin").is_file());
        // The orphan was deleted, not transferred.
        assert!(!fx.actual_path("disc-a/alpha/orphan.bin").exists());
        // Links are repointed at the new placements.
        assert_eq!(
            VaultFixture::link_target(&fx.virtual_base().join("alpha/one.bin")),
            fx.actual_path("disc-b/beta/alpha/one.bin")
        );
        // Cleanup removed the emptied, unmapped source directory.
        assert!(!fx.actual_path("disc-a/alpha/sub").exists());
        // The save file was deleted on request.
        assert!(!session.save_status_file().unwrap().exists());

        // The index follows the moves.
        let mut fresh = fx.session();
        assert!(
            fresh
                .stats_for_actual(&fx.actual_path("disc-a/alpha/one.bin"))
                .unwrap()
                .is_none()
        );
        assert_eq!(
            fresh
                .stats_for_actual(&fx.actual_path("disc-b/beta/alpha/one.bin"))
                .unwrap()
                .unwrap()
                .size,
            100
        );
    }

    #[test]
    fn test_completed_save_resumes_as_a_no_op() {
        let fx = VaultFixture::new();
        let mut session = cross_mapped_setup(&fx);
        let console = Console::disabled();
        run_save(&mut session, options(SaveMode::Move), &console).unwrap();

        // Sources are gone now; a second invocation must skip every unit
        // instead of retrying moves that would fail.
        let mut second = fx.session();
        run_save(&mut second, options(SaveMode::Move), &console).unwrap();

        assert!(fx.actual_path("disc-b/beta/alpha/one.bin").is_file());
        assert!(!fx.actual_path("disc-a/alpha/one.bin").exists());
    }

    #[test]
    fn test_resume_skips_entries_already_completed() {
        let fx = VaultFixture::new();
        let mut session = cross_mapped_setup(&fx);

        // Plan, then simulate a prior run that finished the first (a,b)
        // entry before being killed.
        let mut status = planner::generate_save_status(&mut session, SaveMode::Move).unwrap();
        let one = fx.virtual_base().join("alpha/one.bin");
        {
            let pair = status.transfers_for_mut("disc-a", "disc-b").unwrap();
            assert_eq!(pair.entries[0].virtual_path, one);
            pair.entries[0].completed = true;
        }
        for step in &mut status.scheme {
            if let SchemeStep::Transfer {
                source_disc,
                dest_disc,
                bytes_done,
                ..
            } = step
            {
                if source_disc == "disc-a" && dest_disc == "disc-b" {
                    *bytes_done += 100;
                }
            }
        }
        let save_path = session.save_status_file().unwrap();
        session
            .store
            .write(&save_path, &status, SAVE_STATUS_DOC_VERSION, false)
            .unwrap();

        let console = Console::disabled();
        run_save(&mut session, options(SaveMode::Move), &console).unwrap();

        // The completed entry was not re-executed: its source file and
        // its link are untouched.
        assert!(fx.actual_path("disc-a/alpha/one.bin").is_file());
        assert_eq!(
            VaultFixture::link_target(&one),
            fx.actual_path("disc-a/alpha/one.bin")
        );
        // The pending entry was executed.
        assert!(fx.actual_path("disc-b/beta/alpha/sub/two.bin").is_file());
        assert!(!fx.actual_path("disc-a/alpha/sub/two.bin").exists());
    }

    #[test]
    fn test_disconnected_disc_fails_without_console() {
        let fx = VaultFixture::new();
        let mut session = cross_mapped_setup(&fx);
        let console = Console::disabled();

        let err = run_save_with_probe(
            &mut session,
            options(SaveMode::Move),
            &console,
            &|_: &Path| false,
        )
        .unwrap_err();
        assert!(matches!(err, VaultError::DiscDisconnected { .. }));
        // Nothing moved.
        assert!(fx.actual_path("disc-a/alpha/one.bin").is_file());
    }

    #[test]
    fn test_executor_proceeds_after_reconnection() {
        let fx = VaultFixture::new();
        let mut session = cross_mapped_setup(&fx);
        // Interactive console with no input: the reconnect loop times out
        // on the line channel and re-probes.
        let (_tx, rx) = std::sync::mpsc::channel();
        let console = Console::with_lines(rx);

        let calls = Cell::new(0u32);
        let probe = |_: &Path| {
            calls.set(calls.get() + 1);
            calls.get() > 1
        };
        run_save_with_probe(&mut session, options(SaveMode::Move), &console, &probe).unwrap();

        assert!(fx.actual_path("disc-b/beta/alpha/one.bin").is_file());
        assert!(calls.get() > 1);
    }

    #[test]
    fn test_exit_request_pauses_cleanly() {
        let fx = VaultFixture::new();
        let mut session = cross_mapped_setup(&fx);
        let console = Console::disabled();
        console.request_exit();

        run_save(&mut session, options(SaveMode::Move), &console).unwrap();

        // Nothing was transferred, but the planned status is on disk for
        // the next invocation.
        assert!(fx.actual_path("disc-a/alpha/one.bin").is_file());
        let status: SaveStatus = session
            .store
            .read(&session.save_status_file().unwrap(), SAVE_STATUS_DOC_VERSION)
            .unwrap()
            .unwrap();
        assert!(!status.all_steps_completed());
    }

    #[test]
    fn test_byte_budget_defers_entries_to_later_step() {
        let fx = VaultFixture::new();
        let mut session = fx.session();
        fx.write_actual("disc-a/alpha/f1.bin", 60);
        fx.write_actual("disc-a/alpha/f2.bin", 60);
        fx.write_actual("disc-b/beta/g1.bin", 60);
        fx.add_disc(&mut session, "disc-a", "disc-a", None);
        fx.add_disc(&mut session, "disc-b", "disc-b", Some(70));
        add_collection(&mut session, "alpha", &fx.actual_path("disc-a/alpha")).unwrap();
        add_collection(&mut session, "beta", &fx.actual_path("disc-b/beta")).unwrap();
        add_save_map(
            &mut session,
            &fx.virtual_base().join("alpha"),
            &fx.actual_path("disc-b/beta/in"),
        )
        .unwrap();
        add_save_map(
            &mut session,
            &fx.virtual_base().join("beta"),
            &fx.actual_path("disc-a/alpha/back"),
        )
        .unwrap();

        // Hand-written capacity-constrained scheme: 60 of a->b now, then
        // b->a frees space, then the final 60 of a->b.
        let vb = fx.virtual_base();
        let status = SaveStatus {
            mode: SaveMode::Move,
            transfers: vec![
                PairTransfers {
                    source_disc: "disc-a".to_string(),
                    dest_disc: "disc-b".to_string(),
                    entries: vec![
                        TransferStatus::new(vb.join("alpha/f1.bin")),
                        TransferStatus::new(vb.join("alpha/f2.bin")),
                    ],
                },
                PairTransfers {
                    source_disc: "disc-b".to_string(),
                    dest_disc: "disc-a".to_string(),
                    entries: vec![TransferStatus::new(vb.join("beta/g1.bin"))],
                },
            ],
            deletions: Vec::new(),
            scheme: vec![
                SchemeStep::transfer("disc-b", "disc-a", 60, true),
                SchemeStep::transfer("disc-a", "disc-b", 60, false),
                SchemeStep::transfer("disc-a", "disc-b", 60, true),
            ],
            cleanup_done: true,
        };
        let save_path = session.save_status_file().unwrap();
        session
            .store
            .write(&save_path, &status, SAVE_STATUS_DOC_VERSION, false)
            .unwrap();

        let console = Console::disabled();
        run_save(&mut session, options(SaveMode::Move), &console).unwrap();

        // All three files reached their destinations.
        assert!(fx.actual_path("disc-b/beta/in/f1.bin").is_file());
        assert!(fx.actual_path("disc-b/beta/in/f2.bin").is_file());
        assert!(fx.actual_path("disc-a/alpha/back/g1.bin").is_file());
        assert!(!fx.actual_path("disc-a/alpha/f1.bin").exists());
        assert!(!fx.actual_path("disc-a/alpha/f2.bin").exists());

        // The non-final step carried exactly one file; the final step for
        // the pair carried the deferred one.
        let status: SaveStatus = session
            .store
            .read(&save_path, SAVE_STATUS_DOC_VERSION)
            .unwrap()
            .unwrap();
        assert!(status.all_steps_completed());
        for idx in [1, 2] {
            match &status.scheme[idx] {
                SchemeStep::Transfer { bytes_done, .. } => assert_eq!(*bytes_done, 60),
                other => panic!("unexpected step {other:?}"),
            }
        }
    }
}
