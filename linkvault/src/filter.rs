//! Filters: temporary narrowing of the virtual tree
//!
//! Applying a filter moves every link that fails the predicate (and its
//! prop sidecar) out of the virtual tree into the per-VFS filter
//! directory, preserving relative structure, then prunes the virtual dirs
//! left empty. Clearing merges every filter tree back. Frozen subtrees
//! are never filtered. An applied filter blocks saves: the planner
//! refuses to persist a partial view of the VFS.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use linkvault_common::{VaultError, VaultResult, is_vault_file, rebase};
use once_cell::sync::Lazy;
use walkdir::WalkDir;

use crate::freeze;
use crate::fsutil;
use crate::props;
use crate::session::Session;

static EXT_CATEGORIES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for ext in ["jpg", "jpeg", "png", "gif", "webp", "heic", "bmp", "svg", "tif", "tiff"] {
        map.insert(ext, "image");
    }
    for ext in ["mkv", "mp4", "avi", "mov", "webm", "m4v", "mpg", "mpeg", "wmv"] {
        map.insert(ext, "video");
    }
    for ext in ["mp3", "flac", "ogg", "wav", "aac", "m4a", "opus", "wma"] {
        map.insert(ext, "audio");
    }
    for ext in [
        "pdf", "txt", "md", "doc", "docx", "odt", "rtf", "xls", "xlsx", "ppt", "pptx", "epub",
        "csv",
    ] {
        map.insert(ext, "document");
    }
    for ext in ["zip", "tar", "gz", "bz2", "xz", "zst", "7z", "rar", "iso"] {
        map.insert(ext, "archive");
    }
    map
});

pub const CATEGORY_UNKNOWN: &str = "unknown";

/// Category of a file by extension; `unknown` when unrecognized.
pub fn category_of(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .and_then(|ext| EXT_CATEGORIES.get(ext.as_str()).copied())
        .unwrap_or(CATEGORY_UNKNOWN)
}

/// All known categories, for CLI validation.
pub fn all_categories() -> Vec<&'static str> {
    let mut list: Vec<_> = EXT_CATEGORIES.values().copied().collect();
    list.sort_unstable();
    list.dedup();
    list.push(CATEGORY_UNKNOWN);
    list
}

/// A filter predicate. Each variant owns one filter name, so at most one
/// filter of each kind can be applied at a time.
#[derive(Debug, Clone)]
pub enum FilterSpec {
    /// Keep files whose extension category is listed.
    Extension { categories: Vec<String> },
    /// Keep files whose size falls in the range; a negative bound is
    /// open.
    Size { lower: i64, upper: i64 },
    /// Keep paths carrying any of the given properties (with the given
    /// value, or "true" when none is specified).
    Prop { props: Vec<(String, Option<String>)> },
}

impl FilterSpec {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Extension { .. } => "filter-by-ext",
            Self::Size { .. } => "filter-by-size",
            Self::Prop { .. } => "filter-by-prop",
        }
    }

    fn matches(&self, session: &mut Session, path: &Path) -> VaultResult<bool> {
        let meta = path
            .symlink_metadata()
            .map_err(|e| VaultError::io("stat", path, e))?;
        let is_dir = meta.is_dir() && !meta.file_type().is_symlink();
        match self {
            Self::Extension { categories } => {
                if is_dir {
                    return Ok(false);
                }
                Ok(categories.iter().any(|c| c == category_of(path)))
            }
            Self::Size { lower, upper } => {
                if is_dir || !meta.file_type().is_symlink() {
                    return Ok(false);
                }
                let Some(stats) = session.stats_for_symlink(path)? else {
                    return Ok(false);
                };
                let size = stats.size as i64;
                Ok((*lower < 0 || size >= *lower) && (*upper < 0 || size <= *upper))
            }
            Self::Prop { props } => {
                for (prop, value) in props {
                    let expected = value.as_deref().unwrap_or("true");
                    if props::get_prop(session, path, prop)?.as_deref() == Some(expected) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

/// Names of currently applied filters.
pub fn all_filter_names(session: &Session) -> VaultResult<Vec<String>> {
    let dir = session.filters_dir()?;
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = fs::read_dir(&dir)
        .map_err(|e| VaultError::io("read directory", &dir, e))?
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    Ok(names)
}

/// Apply a filter to the current VFS.
pub fn apply_filter(session: &mut Session, spec: &FilterSpec) -> VaultResult<()> {
    let vfs = session.current_vfs()?.clone();
    let filter_root = session.filters_dir()?.join(spec.name());
    if filter_root.is_dir() {
        return Err(VaultError::config(format!(
            "filter \"{}\" has already been applied",
            spec.name()
        )));
    }
    fs::create_dir_all(&filter_root)
        .map_err(|e| VaultError::io("create directory", &filter_root, e))?;

    let mut counts = FilterCounts::default();
    filter_dir(
        session,
        spec,
        &vfs.virtual_base,
        &vfs.virtual_base,
        &filter_root,
        &mut counts,
    )?;
    prune_empty_dirs(session, &vfs.virtual_base, &vfs.virtual_base)?;
    session.invalidate_a2v();

    log::info!(
        "Filter \"{}\" applied. Files remaining: {} of {}",
        spec.name(),
        counts.kept,
        counts.kept + counts.moved
    );
    Ok(())
}

#[derive(Default)]
struct FilterCounts {
    kept: usize,
    moved: usize,
}

fn filter_dir(
    session: &mut Session,
    spec: &FilterSpec,
    dir: &Path,
    virtual_base: &Path,
    filter_root: &Path,
    counts: &mut FilterCounts,
) -> VaultResult<()> {
    if freeze::is_frozen(session, dir)? {
        log::debug!("Skipping frozen directory {}", dir.display());
        return Ok(());
    }

    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| VaultError::io("read directory", dir, e))?
        .filter_map(Result::ok)
        .collect();
    entries.sort_by_key(|entry| entry.file_name());
    let mut subdirs = Vec::new();
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| VaultError::io("stat", &path, e))?;
        if file_type.is_dir() {
            subdirs.push(path);
        } else if !is_vault_file(&entry.file_name().to_string_lossy()) {
            files.push(path);
        }
    }

    // A directory that matches as a whole keeps its entire subtree.
    if spec.matches(session, dir)? {
        log::debug!("Directory passed the filter: {}", dir.display());
        counts.kept += files.len();
        return Ok(());
    }

    let mut failed = Vec::new();
    for file in &files {
        if spec.matches(session, file)? {
            counts.kept += 1;
        } else {
            failed.push(file.clone());
        }
    }
    counts.moved += failed.len();

    // Mirror this directory into the filter tree when it loses files (or
    // has none at all), carrying its prop sidecar along.
    if (files.is_empty() || !failed.is_empty()) && dir != virtual_base {
        let dest_dir = rebase(dir, virtual_base, filter_root).expect("dir under virtual base");
        fsutil::ensure_dir(&dest_dir)?;
        let sidecar = props::dir_prop_path(dir)?;
        if sidecar.exists() {
            let sidecar_dest = props::dir_prop_path(&dest_dir)?;
            fsutil::copy_file(&sidecar, &sidecar_dest)?;
        }
    }

    for file in failed {
        let dest = rebase(&file, virtual_base, filter_root).expect("file under virtual base");
        log::debug!("Filtering out {}", file.display());
        fsutil::move_entry(&file, &dest)?;
        let sidecar = props::file_prop_path(&file)?;
        if sidecar.exists() {
            let sidecar_dest =
                rebase(&sidecar, virtual_base, filter_root).expect("sidecar under virtual base");
            fsutil::move_entry(&sidecar, &sidecar_dest)?;
        }
    }

    for subdir in subdirs {
        filter_dir(session, spec, &subdir, virtual_base, filter_root, counts)?;
    }
    Ok(())
}

/// Remove virtual directories left holding nothing but sidecars. Frozen
/// directories are kept, as is the virtual base itself.
fn prune_empty_dirs(session: &Session, dir: &Path, virtual_base: &Path) -> VaultResult<bool> {
    if freeze::is_frozen(session, dir)? {
        return Ok(false);
    }
    let mut can_delete = dir != virtual_base;
    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| VaultError::io("read directory", dir, e))?
        .filter_map(Result::ok)
        .collect();
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| VaultError::io("stat", &path, e))?;
        if file_type.is_dir() {
            if !prune_empty_dirs(session, &path, virtual_base)? {
                can_delete = false;
            }
        } else if !is_vault_file(&entry.file_name().to_string_lossy()) {
            can_delete = false;
        }
    }
    if can_delete {
        log::debug!("Removing emptied virtual directory {}", dir.display());
        fs::remove_dir_all(dir).map_err(|e| VaultError::io("remove directory", dir, e))?;
    }
    Ok(can_delete)
}

/// Merge every filter tree back into the virtual base and remove the
/// filter directories.
pub fn clear_filters(session: &mut Session) -> VaultResult<()> {
    let vfs = session.current_vfs()?.clone();
    let names = all_filter_names(session)?;
    if names.is_empty() {
        log::info!("No filters to clear");
        return Ok(());
    }
    let roots: Vec<PathBuf> = names
        .iter()
        .map(|name| session.filters_dir().map(|d| d.join(name)))
        .collect::<VaultResult<_>>()?;

    check_merge_conflicts(session, &vfs.virtual_base, &roots)?;

    for root in &roots {
        log::debug!("Merging filter tree {}", root.display());
        for entry in WalkDir::new(root).min_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.clone());
                VaultError::io(
                    "scan directory",
                    path,
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walk error")),
                )
            })?;
            let target = rebase(entry.path(), root, &vfs.virtual_base)
                .expect("walked path under filter root");
            if entry.file_type().is_dir() {
                fsutil::ensure_dir(&target)?;
            } else {
                fsutil::move_entry(entry.path(), &target)?;
            }
        }
        fs::remove_dir_all(root).map_err(|e| VaultError::io("remove directory", root, e))?;
    }

    session.invalidate_a2v();
    log::info!("The following filters have been cleared: {}", names.join(", "));
    Ok(())
}

/// A relative path occupied by incompatible entries in two trees cannot
/// be merged. Several trees may share a directory (they are re-created)
/// or a sidecar (last write wins); anything else is a conflict.
fn check_merge_conflicts(
    session: &Session,
    virtual_base: &Path,
    roots: &[PathBuf],
) -> VaultResult<()> {
    let mut by_rel: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for tree in std::iter::once(virtual_base).chain(roots.iter().map(PathBuf::as_path)) {
        for entry in WalkDir::new(tree).min_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| tree.to_path_buf());
                VaultError::io(
                    "scan directory",
                    path,
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walk error")),
                )
            })?;
            let rel = entry
                .path()
                .strip_prefix(tree)
                .expect("walked path under tree")
                .to_path_buf();
            by_rel.entry(rel).or_default().push(entry.path().to_path_buf());
        }
    }

    for (rel, candidates) in by_rel {
        if candidates.len() < 2 {
            continue;
        }
        let mut all_plain_dirs = true;
        let mut all_sidecars = true;
        for path in &candidates {
            let is_dir = path.is_dir();
            if !is_dir || freeze::is_frozen(session, path)? {
                all_plain_dirs = false;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if is_dir || !is_vault_file(&name) {
                all_sidecars = false;
            }
        }
        if !all_plain_dirs && !all_sidecars {
            return Err(VaultError::config(format!(
                "conflict detected while clearing filters at relative path {}",
                rel.display()
            )));
        }
    }
    Ok(())
}

pub fn list_filters(session: &Session) -> VaultResult<()> {
    let names = all_filter_names(session)?;
    if names.is_empty() {
        println!("No filters have been applied");
        return Ok(());
    }
    println!("Applied filters:");
    for name in names {
        println!("  {name}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::add_collection;
    use crate::testutil::VaultFixture;

    fn filtered_setup(fx: &VaultFixture) -> Session {
        let mut session = fx.session();
        fx.write_actual("disc-a/media/film.mkv", 500);
        fx.write_actual("disc-a/media/song.mp3", 50);
        fx.write_actual("disc-a/media/notes/readme.txt", 5);
        add_collection(&mut session, "media", &fx.actual_path("disc-a/media")).unwrap();
        session
    }

    #[test]
    fn test_category_table() {
        assert_eq!(category_of(Path::new("a/b/movie.MKV")), "video");
        assert_eq!(category_of(Path::new("song.flac")), "audio");
        assert_eq!(category_of(Path::new("weird.xyz")), CATEGORY_UNKNOWN);
        assert_eq!(category_of(Path::new("no-extension")), CATEGORY_UNKNOWN);
        assert!(all_categories().contains(&"image"));
    }

    #[test]
    fn test_extension_filter_moves_non_matching_links() {
        let fx = VaultFixture::new();
        let mut session = filtered_setup(&fx);
        let vb = fx.virtual_base();

        apply_filter(
            &mut session,
            &FilterSpec::Extension {
                categories: vec!["video".to_string()],
            },
        )
        .unwrap();

        // The video link stays, the rest moved to the filter tree.
        assert!(vb.join("media/film.mkv").symlink_metadata().is_ok());
        assert!(vb.join("media/song.mp3").symlink_metadata().is_err());
        let filter_root = session.filters_dir().unwrap().join("filter-by-ext");
        assert!(filter_root.join("media/song.mp3").symlink_metadata().is_ok());
        assert!(
            filter_root
                .join("media/notes/readme.txt")
                .symlink_metadata()
                .is_ok()
        );
        // The emptied "notes" directory was pruned from the virtual tree.
        assert!(!vb.join("media/notes").exists());

        // Applying the same filter twice is a configuration error.
        let err = apply_filter(
            &mut session,
            &FilterSpec::Extension {
                categories: vec!["video".to_string()],
            },
        )
        .unwrap_err();
        assert!(matches!(err, VaultError::Config { .. }));
    }

    #[test]
    fn test_clear_filters_restores_links() {
        let fx = VaultFixture::new();
        let mut session = filtered_setup(&fx);
        let vb = fx.virtual_base();

        let before: Vec<_> = crate::vfs::vfs_walk(&vb)
            .unwrap()
            .into_iter()
            .flat_map(|g| g.files)
            .collect();

        apply_filter(
            &mut session,
            &FilterSpec::Size {
                lower: 100,
                upper: -1,
            },
        )
        .unwrap();
        assert!(vb.join("media/song.mp3").symlink_metadata().is_err());

        clear_filters(&mut session).unwrap();
        assert!(all_filter_names(&session).unwrap().is_empty());

        let after: Vec<_> = crate::vfs::vfs_walk(&vb)
            .unwrap()
            .into_iter()
            .flat_map(|g| g.files)
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_frozen_directories_are_not_filtered() {
        let fx = VaultFixture::new();
        let mut session = filtered_setup(&fx);
        let vb = fx.virtual_base();
        crate::freeze::freeze_dir(&mut session, &vb.join("media/notes")).unwrap();

        apply_filter(
            &mut session,
            &FilterSpec::Extension {
                categories: vec!["video".to_string()],
            },
        )
        .unwrap();

        // The frozen subtree kept its non-matching file.
        assert!(vb.join("media/notes/readme.txt").symlink_metadata().is_ok());
    }

    #[test]
    fn test_prop_filter_keeps_marked_paths() {
        let fx = VaultFixture::new();
        let mut session = filtered_setup(&fx);
        let vb = fx.virtual_base();
        props::set_prop(&mut session, &vb.join("media/song.mp3"), "pinned", "true", true)
            .unwrap();

        apply_filter(
            &mut session,
            &FilterSpec::Prop {
                props: vec![("pinned".to_string(), None)],
            },
        )
        .unwrap();

        assert!(vb.join("media/song.mp3").symlink_metadata().is_ok());
        assert!(vb.join("media/film.mkv").symlink_metadata().is_err());
        // The kept link's sidecar stayed with it.
        assert_eq!(
            props::get_prop(&session, &vb.join("media/song.mp3"), "pinned")
                .unwrap()
                .as_deref(),
            Some("true")
        );
    }
}
