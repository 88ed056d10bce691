//! Transfer/deletion planner: pre-flight validation and scheme generation
//!
//! The planner turns the current state of the world (disc registry, save
//! maps, location index) into a `SaveStatus`: the exhaustive per-unit
//! transfer and deletion lists plus an ordered scheme of disc-level steps
//! that respects capacity limits.
//!
//! Move-mode scheme generation is a greedy pairwise heuristic, not a
//! globally optimal solver: disc pairs are visited in registration order,
//! deletions and same-disc relocations are flushed first (they free or
//! don't consume headroom), and inter-disc transfers are bounded by the
//! receiving disc's simulated headroom. When one full pass leaves
//! outstanding work the pass repeats on the residual state, which covers
//! the case where a third disc must buffer content. A pass that makes no
//! progress means the transfers cannot fit, and planning fails.

use std::collections::BTreeMap;

use linkvault_common::config::DIR_NOMINAL_SIZE;
use linkvault_common::{
    DiscDeletions, DiscMeta, DeletionStatus, PairTransfers, SaveMode, SaveStatus, SchemeStep,
    TransferStatus, VaultError, VaultResult, format_bytes, is_within,
};

use crate::disc;
use crate::filter;
use crate::session::Session;
use crate::vfs::vfs_walk;

type PairKey = (String, String);

/// Everything the scheme generators need, computed once per save.
#[derive(Debug)]
pub struct PlanInputs {
    pub discs: Vec<DiscMeta>,
    pub transfers: Vec<PairTransfers>,
    pub deletions: Vec<DiscDeletions>,
    pub transfer_sizes: BTreeMap<PairKey, u64>,
    pub deletion_sizes: BTreeMap<String, u64>,
    pub disc_sizes: BTreeMap<String, u64>,
}

/// Run all pre-flight validations and gather the plan inputs. Any failure
/// aborts the save before a single byte moves.
pub fn preflight(session: &mut Session, mode: SaveMode) -> VaultResult<PlanInputs> {
    validate_no_filters(session)?;
    validate_exhaustive_discs(session)?;
    validate_exhaustive_save_maps(session)?;
    validate_save_map_consistency(session)?;

    let discs = session.discs()?;
    let transfers = enumerate_transfers(session)?;
    let transfer_sizes = compute_transfer_sizes(session, &discs, &transfers)?;

    let (deletions, deletion_sizes) = match mode {
        SaveMode::Move => {
            let deletions = enumerate_deletions(session)?;
            let sizes = compute_deletion_sizes(session, &deletions)?;
            (deletions, sizes)
        }
        SaveMode::Copy => {
            let empty = discs
                .iter()
                .map(|d| (d.name.clone(), 0u64))
                .collect::<BTreeMap<_, _>>();
            (Vec::new(), empty)
        }
    };

    let mut disc_sizes = BTreeMap::new();
    for d in &discs {
        disc_sizes.insert(d.name.clone(), disc::disc_size(d)?);
    }

    let inputs = PlanInputs {
        discs,
        transfers,
        deletions,
        transfer_sizes,
        deletion_sizes,
        disc_sizes,
    };
    validate_space(&inputs, mode)?;
    Ok(inputs)
}

/// Build the full save status for a fresh save attempt.
pub fn generate_save_status(session: &mut Session, mode: SaveMode) -> VaultResult<SaveStatus> {
    log::info!("Evaluating save scheme in {} mode", mode.as_str());
    let inputs = preflight(session, mode)?;

    let scheme = match mode {
        SaveMode::Copy => generate_copy_scheme(&inputs),
        SaveMode::Move => generate_move_scheme(&inputs)?,
    };
    log::debug!("Scheme generated with {} steps", scheme.len());
    for (i, step) in scheme.iter().enumerate() {
        log::debug!("Scheme step {}: {}", i + 1, step.describe());
    }

    let deletions = match mode {
        SaveMode::Move => inputs.deletions,
        // Copy mode never deletes; keep one empty list per disc so the
        // status document has a uniform shape.
        SaveMode::Copy => inputs
            .discs
            .iter()
            .map(|d| DiscDeletions {
                disc: d.name.clone(),
                entries: Vec::new(),
            })
            .collect(),
    };

    Ok(SaveStatus {
        mode,
        transfers: inputs.transfers,
        deletions,
        scheme,
        cleanup_done: mode == SaveMode::Copy,
    })
}

// Enumeration ------------------------------------------------------------

/// Walk the whole virtual tree and record one transfer obligation per
/// mapped directory and per resolvable symlink, grouped by
/// (source disc, destination disc). Directories count under their
/// destination's self pair: nothing is physically transferred for them.
fn enumerate_transfers(session: &mut Session) -> VaultResult<Vec<PairTransfers>> {
    let vfs = session.current_vfs()?.clone();
    let discs = session.discs()?;

    let mut pairs: Vec<PairTransfers> = Vec::new();
    let mut slot: BTreeMap<PairKey, usize> = BTreeMap::new();
    for d1 in &discs {
        for d2 in &discs {
            slot.insert((d1.name.clone(), d2.name.clone()), pairs.len());
            pairs.push(PairTransfers {
                source_disc: d1.name.clone(),
                dest_disc: d2.name.clone(),
                entries: Vec::new(),
            });
        }
    }

    let mut dir_count = 0usize;
    let mut file_count = 0usize;
    for group in vfs_walk(&vfs.virtual_base)? {
        let Some(mapping) = session.save_map_for_virtual(&group.dir)? else {
            log::debug!("No save mapping for virtual directory {}", group.dir.display());
            continue;
        };
        let dest_disc = session
            .disc_by_path(&mapping.actual_dir)?
            .ok_or_else(|| {
                VaultError::config(format!(
                    "no disc is registered for mapped directory {}",
                    mapping.actual_dir.display()
                ))
            })?
            .name;

        let key = (dest_disc.clone(), dest_disc.clone());
        pairs[slot[&key]]
            .entries
            .push(TransferStatus::new(group.dir.clone()));
        dir_count += 1;

        for file in &group.files {
            let is_link = file
                .symlink_metadata()
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);
            if !is_link {
                log::warn!(
                    "File {} is not a symlink, ignoring it for disc transfers",
                    file.display()
                );
                continue;
            }
            let Some(stats) = session.stats_for_symlink(file)? else {
                log::warn!(
                    "Stats not available for symlink {}, ignoring it for disc transfers",
                    file.display()
                );
                continue;
            };
            let source_disc = session
                .disc_by_path(&stats.actual_path)?
                .ok_or_else(|| {
                    VaultError::config(format!(
                        "no disc is registered for actual path {}",
                        stats.actual_path.display()
                    ))
                })?
                .name;
            let key = (source_disc, dest_disc.clone());
            pairs[slot[&key]].entries.push(TransferStatus::new(file.clone()));
            file_count += 1;
        }
    }

    log::debug!(
        "Enumerated transfers: {dir_count} directories, {file_count} files"
    );
    Ok(pairs)
}

/// Every indexed actual file with no remaining virtual link must be
/// deleted from its disc. Directories are never deleted this way.
fn enumerate_deletions(session: &mut Session) -> VaultResult<Vec<DiscDeletions>> {
    let discs = session.discs()?;
    let all_stats = session.all_stats()?;
    session.actual_to_virtual()?;

    let mut deletions: Vec<DiscDeletions> = discs
        .iter()
        .map(|d| DiscDeletions {
            disc: d.name.clone(),
            entries: Vec::new(),
        })
        .collect();

    let mut count = 0usize;
    for actual_path in all_stats.keys() {
        let linked = session
            .actual_to_virtual()?
            .contains_key(actual_path.as_path());
        if linked {
            continue;
        }
        let disc = session.disc_by_path(actual_path)?.ok_or_else(|| {
            VaultError::config(format!(
                "no disc is registered for actual path {}",
                actual_path.display()
            ))
        })?;
        let entry = deletions
            .iter_mut()
            .find(|d| d.disc == disc.name)
            .expect("deletion list exists for every disc");
        entry.entries.push(DeletionStatus::new(actual_path.clone()));
        count += 1;
        log::debug!("Actual file {} scheduled for deletion", actual_path.display());
    }

    log::debug!("Enumerated {count} deletions");
    Ok(deletions)
}

fn compute_transfer_sizes(
    session: &mut Session,
    discs: &[DiscMeta],
    transfers: &[PairTransfers],
) -> VaultResult<BTreeMap<PairKey, u64>> {
    let mut sizes: BTreeMap<PairKey, u64> = BTreeMap::new();
    for d1 in discs {
        for d2 in discs {
            sizes.insert((d1.name.clone(), d2.name.clone()), 0);
        }
    }
    for pair in transfers {
        let key = (pair.source_disc.clone(), pair.dest_disc.clone());
        let mut total = 0u64;
        for entry in &pair.entries {
            let path = &entry.virtual_path;
            let meta = path
                .symlink_metadata()
                .map_err(|e| VaultError::io("stat", path, e))?;
            if meta.file_type().is_symlink() {
                if let Some(stats) = session.stats_for_symlink(path)? {
                    total += stats.size;
                }
            } else if meta.is_dir() {
                total += DIR_NOMINAL_SIZE;
            }
        }
        *sizes.get_mut(&key).expect("all pairs pre-seeded") += total;
    }
    log::debug!("Transfer sizes: {sizes:?}");
    Ok(sizes)
}

fn compute_deletion_sizes(
    session: &mut Session,
    deletions: &[DiscDeletions],
) -> VaultResult<BTreeMap<String, u64>> {
    let mut sizes = BTreeMap::new();
    for group in deletions {
        let mut total = 0u64;
        for entry in &group.entries {
            if let Some(stats) = session.stats_for_actual(&entry.actual_path)? {
                total += stats.size;
            }
        }
        sizes.insert(group.disc.clone(), total);
    }
    log::debug!("Deletion sizes: {sizes:?}");
    Ok(sizes)
}

// Validation -------------------------------------------------------------

/// Saving with filters applied would save a partial view of the VFS.
fn validate_no_filters(session: &mut Session) -> VaultResult<()> {
    let filters = filter::all_filter_names(session)?;
    if !filters.is_empty() {
        return Err(VaultError::config(format!(
            "the following filters must be cleared before saving: {}",
            filters.join(", ")
        )));
    }
    Ok(())
}

/// Every collection base must lie on a registered disc.
fn validate_exhaustive_discs(session: &mut Session) -> VaultResult<()> {
    for col in session.collections()? {
        if session.disc_by_path(&col.actual_base)?.is_none() {
            return Err(VaultError::config(format!(
                "no disc has been registered for collection \"{}\" with actual base {}",
                col.name,
                col.actual_base.display()
            )));
        }
    }
    Ok(())
}

/// Every top-level entry of the virtual base must fall under a mapping.
fn validate_exhaustive_save_maps(session: &mut Session) -> VaultResult<()> {
    let vfs = session.current_vfs()?.clone();
    let mut entries: Vec<_> = std::fs::read_dir(&vfs.virtual_base)
        .map_err(|e| VaultError::io("read directory", &vfs.virtual_base, e))?
        .filter_map(Result::ok)
        .collect();
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        if linkvault_common::is_vault_file(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        if session.save_map_for_virtual(&path)?.is_none() {
            return Err(VaultError::config(format!(
                "no save mapping for virtual directory {} in VFS \"{}\"",
                path.display(),
                vfs.name
            )));
        }
    }
    Ok(())
}

/// Overlapping virtual roots would map one path to two destinations.
fn validate_save_map_consistency(session: &mut Session) -> VaultResult<()> {
    let mappings = session.save_maps()?;
    for (i, a) in mappings.iter().enumerate() {
        for b in mappings.iter().skip(i + 1) {
            if is_within(&a.virtual_dir, &b.virtual_dir)
                || is_within(&b.virtual_dir, &a.virtual_dir)
            {
                return Err(VaultError::config(format!(
                    "save mappings overlap: {} and {}",
                    a.virtual_dir.display(),
                    b.virtual_dir.display()
                )));
            }
        }
    }
    Ok(())
}

/// For every capacity-limited disc, the space freed by outbound work plus
/// the existing headroom must cover the inbound bytes.
fn validate_space(inputs: &PlanInputs, mode: SaveMode) -> VaultResult<()> {
    for disc in &inputs.discs {
        let Some(capacity) = disc.capacity else {
            log::debug!("Skipping space validation for unlimited disc {}", disc.name);
            continue;
        };

        let mut freed: u128 = match mode {
            SaveMode::Move => inputs.deletion_sizes[&disc.name] as u128,
            SaveMode::Copy => 0,
        };
        let mut inbound: u128 = 0;
        for other in &inputs.discs {
            if other.name == disc.name {
                continue;
            }
            inbound += inputs.transfer_sizes[&(other.name.clone(), disc.name.clone())] as u128;
            if mode == SaveMode::Move {
                freed += inputs.transfer_sizes[&(disc.name.clone(), other.name.clone())] as u128;
            }
        }

        let used = inputs.disc_sizes[&disc.name] as u128;
        let available = (capacity as u128 + freed).saturating_sub(used);
        log::debug!(
            "Disc {}: required {} inbound, available {}",
            disc.name,
            inbound,
            available
        );
        if available < inbound {
            return Err(VaultError::config(format!(
                "disc \"{}\" will not have enough space for the transfers: required {}, available {}",
                disc.name,
                format_bytes(inbound.min(u64::MAX as u128) as u64),
                format_bytes(available.min(u64::MAX as u128) as u64)
            )));
        }
    }
    Ok(())
}

// Scheme generation ------------------------------------------------------

/// Copy mode: one final step per ordered pair with pending bytes. Copying
/// never frees source space, so no pair ever needs to be split.
fn generate_copy_scheme(inputs: &PlanInputs) -> Vec<SchemeStep> {
    let mut scheme = Vec::new();
    for d1 in &inputs.discs {
        for d2 in &inputs.discs {
            let size = inputs.transfer_sizes[&(d1.name.clone(), d2.name.clone())];
            if size > 0 {
                scheme.push(SchemeStep::transfer(&d1.name, &d2.name, size, true));
            }
        }
    }
    scheme
}

/// Move mode: greedy pairwise passes, bounded by simulated headroom.
fn generate_move_scheme(inputs: &PlanInputs) -> VaultResult<Vec<SchemeStep>> {
    let mut remaining_t = inputs.transfer_sizes.clone();
    let mut remaining_d = inputs.deletion_sizes.clone();
    // Simulated headroom per disc, starting from capacity minus current
    // usage (clamped at zero if the disc is already over capacity).
    let mut headroom: BTreeMap<String, Option<u64>> = inputs
        .discs
        .iter()
        .map(|d| {
            let h = d
                .capacity
                .map(|cap| cap.saturating_sub(inputs.disc_sizes[&d.name]));
            (d.name.clone(), h)
        })
        .collect();

    let total_left = |t: &BTreeMap<PairKey, u64>, d: &BTreeMap<String, u64>| -> u128 {
        t.values().map(|v| *v as u128).sum::<u128>()
            + d.values().map(|v| *v as u128).sum::<u128>()
    };

    let mut scheme = Vec::new();
    while total_left(&remaining_t, &remaining_d) > 0 {
        let before = total_left(&remaining_t, &remaining_d);

        'pass: for i in 0..inputs.discs.len() {
            for j in 0..inputs.discs.len() {
                let d1 = inputs.discs[i].name.clone();
                let d2 = inputs.discs[j].name.clone();
                log::debug!("Considering disc pair {d1} / {d2}");

                // Deletions first: they free capacity transfers may need.
                for disc in [&d1, &d2] {
                    let pending = remaining_d[disc];
                    if pending > 0 {
                        scheme.push(SchemeStep::deletion(disc));
                        *remaining_d.get_mut(disc).expect("seeded") = 0;
                        if let Some(Some(h)) = headroom.get_mut(disc).map(Option::as_mut) {
                            *h += pending;
                        }
                    }
                }

                // Same-disc relocations consume no headroom.
                for disc in [&d1, &d2] {
                    let key = (disc.clone(), disc.clone());
                    let pending = remaining_t[&key];
                    if pending > 0 {
                        scheme.push(SchemeStep::transfer(disc, disc, pending, true));
                        *remaining_t.get_mut(&key).expect("seeded") = 0;
                    }
                }

                // Inter-disc transfers, bounded by the receiver's headroom.
                let key12 = (d1.clone(), d2.clone());
                let key21 = (d2.clone(), d1.clone());
                let need12 = remaining_t[&key12];
                let need21 = remaining_t[&key21];
                let bound12 = match headroom[&d2] {
                    Some(h) => need12.min(h),
                    None => need12,
                };
                let bound21 = match headroom[&d1] {
                    Some(h) => need21.min(h),
                    None => need21,
                };
                if bound12 > 0 {
                    let left = remaining_t.get_mut(&key12).expect("seeded");
                    *left -= bound12;
                    let is_final = *left == 0;
                    scheme.push(SchemeStep::transfer(&d1, &d2, bound12, is_final));
                }
                if bound21 > 0 {
                    let left = remaining_t.get_mut(&key21).expect("seeded");
                    *left -= bound21;
                    let is_final = *left == 0;
                    scheme.push(SchemeStep::transfer(&d2, &d1, bound21, is_final));
                }
                if let Some(Some(h)) = headroom.get_mut(&d1).map(Option::as_mut) {
                    *h = *h - bound21 + bound12;
                }
                if let Some(Some(h)) = headroom.get_mut(&d2).map(Option::as_mut) {
                    *h = *h - bound12 + bound21;
                }

                if total_left(&remaining_t, &remaining_d) == 0 {
                    break 'pass;
                }
            }
        }

        let after = total_left(&remaining_t, &remaining_d);
        if after > 0 && after == before {
            return Err(VaultError::config(
                "unable to schedule the remaining transfers within the disc capacity limits",
            ));
        }
        if after > 0 {
            log::debug!("Scheme pass left {after} bytes outstanding, running another pass");
        }
    }

    Ok(scheme)
}
